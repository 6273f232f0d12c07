pub mod activation;
pub mod combining;
pub mod fully_connected;
pub mod sparse_binary;
pub mod sparse_input;

pub use activation::{Activation, ActivationKind};
pub use combining::{CombineOp, Combining};
pub use fully_connected::FullyConnected;
pub use sparse_binary::SparseBinaryInput;
pub use sparse_input::SparseInput;

use std::sync::Arc;

use crate::gradient::Gradients;
use crate::storage::WeightsStoragePtr;
use crate::values::{self, Values};

/// Dense inputs and error terms at or below this magnitude are skipped by the
/// dense kernels; activations such as CReLU leave many exact or near zeros.
pub(crate) const ACTIVATION_EPSILON: f32 = 1.0e-10;

/// How an input node consumes the caller-supplied input descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    /// Full list of input values as floats.
    Full,
    /// List of sparse `(index, value)` inputs.
    Sparse,
    /// List of sparse binary inputs; an active feature is always 1.0.
    SparseBinary,
}

/// Non-zero entry of a sparse float input vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActiveFeature {
    pub index: u32,
    pub value: f32,
}

/// Borrowed per-call view of a node's inputs. Forward and backward receive
/// the same view, so no input data is stashed in the run context.
#[derive(Clone, Copy)]
pub enum Inputs<'a> {
    Dense(&'a [f32]),
    Pair {
        primary: &'a [f32],
        secondary: &'a [f32],
    },
    Sparse(&'a [ActiveFeature]),
    SparseBinary(&'a [u16]),
}

impl<'a> Inputs<'a> {
    pub(crate) fn dense(self) -> &'a [f32] {
        match self {
            Inputs::Dense(inputs) => inputs,
            _ => unreachable!("node wired for dense inputs"),
        }
    }

    pub(crate) fn pair(self) -> (&'a [f32], &'a [f32]) {
        match self {
            Inputs::Pair { primary, secondary } => (primary, secondary),
            _ => unreachable!("node wired for two dense inputs"),
        }
    }

    pub(crate) fn sparse(self) -> &'a [ActiveFeature] {
        match self {
            Inputs::Sparse(features) => features,
            _ => unreachable!("node wired for sparse inputs"),
        }
    }

    pub(crate) fn sparse_binary(self) -> &'a [u16] {
        match self {
            Inputs::SparseBinary(features) => features,
            _ => unreachable!("node wired for sparse binary inputs"),
        }
    }
}

/// Per-node scratch reused across samples: the node's outputs plus the error
/// buffers its backward kernel fills for the predecessor(s).
pub struct NodeScratch {
    pub outputs: Values,
    pub input_error: Values,
    /// Only sized for combining nodes; error for the second predecessor.
    pub secondary_input_error: Values,
}

impl NodeScratch {
    pub(crate) fn new(num_outputs: usize, num_inputs: usize, num_secondary: usize) -> Self {
        Self {
            outputs: values::zeroed(num_outputs),
            input_error: values::zeroed(num_inputs),
            secondary_input_error: values::zeroed(num_secondary),
        }
    }
}

pub type NodePtr = Arc<dyn Node>;

/// Base trait for all computation node kinds.
///
/// `run` computes outputs from the given inputs; `backpropagate` consumes the
/// loss derivative w.r.t. this node's outputs, fills the error buffers for
/// the predecessor(s) and accumulates weight gradients when trainable.
pub trait Node: Send + Sync {
    fn num_inputs(&self) -> u32;
    fn num_outputs(&self) -> u32;

    fn input_mode(&self) -> InputMode {
        InputMode::Full
    }

    fn is_input_node(&self) -> bool {
        false
    }

    fn is_combining(&self) -> bool {
        false
    }

    fn is_trainable(&self) -> bool {
        self.storage().is_some()
    }

    fn storage(&self) -> Option<&WeightsStoragePtr> {
        None
    }

    /// Predecessor on the given port; combining nodes expose two ports.
    fn predecessor(&self, port: usize) -> Option<&NodePtr>;

    fn create_scratch(&self) -> NodeScratch;

    fn run(&self, inputs: Inputs<'_>, ctx: &mut NodeScratch, variant: u32);

    fn backpropagate(
        &self,
        error: &[f32],
        inputs: Inputs<'_>,
        ctx: &mut NodeScratch,
        gradients: Option<&mut Gradients>,
        variant: u32,
    );
}

/// Clamped variant lookup against a gradient buffer's variant count.
pub(crate) fn gradient_variant_index(gradients: &Gradients, requested: u32) -> usize {
    debug_assert!(!gradients.variants.is_empty());
    (requested as usize).min(gradients.variants.len() - 1)
}
