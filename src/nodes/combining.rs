use std::sync::Arc;

use crate::errors::{NetError, NetResult};
use crate::gradient::Gradients;

use super::{InputMode, Inputs, Node, NodePtr, NodeScratch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CombineOp {
    /// Output is primary followed by secondary.
    Concat,
    /// Element-wise sum; both inputs must have the same width.
    Sum,
}

/// Merges the outputs of two predecessor nodes. No weights.
pub struct Combining {
    op: CombineOp,
    num_outputs: u32,
    primary: NodePtr,
    secondary: NodePtr,
}

impl Combining {
    pub fn concat(primary: &NodePtr, secondary: &NodePtr) -> NodePtr {
        Arc::new(Self {
            op: CombineOp::Concat,
            num_outputs: primary.num_outputs() + secondary.num_outputs(),
            primary: primary.clone(),
            secondary: secondary.clone(),
        })
    }

    pub fn sum(primary: &NodePtr, secondary: &NodePtr) -> NetResult<NodePtr> {
        if primary.num_outputs() != secondary.num_outputs() {
            return Err(NetError::ShapeMismatch {
                expected: vec![primary.num_outputs() as usize],
                found: vec![secondary.num_outputs() as usize],
            });
        }
        Ok(Arc::new(Self {
            op: CombineOp::Sum,
            num_outputs: primary.num_outputs(),
            primary: primary.clone(),
            secondary: secondary.clone(),
        }))
    }

    pub fn op(&self) -> CombineOp {
        self.op
    }
}

impl Node for Combining {
    fn num_inputs(&self) -> u32 {
        self.num_outputs
    }

    fn num_outputs(&self) -> u32 {
        self.num_outputs
    }

    fn input_mode(&self) -> InputMode {
        InputMode::Full
    }

    fn is_combining(&self) -> bool {
        true
    }

    fn predecessor(&self, port: usize) -> Option<&NodePtr> {
        match port {
            0 => Some(&self.primary),
            1 => Some(&self.secondary),
            _ => None,
        }
    }

    fn create_scratch(&self) -> NodeScratch {
        NodeScratch::new(
            self.num_outputs as usize,
            self.primary.num_outputs() as usize,
            self.secondary.num_outputs() as usize,
        )
    }

    fn run(&self, inputs: Inputs<'_>, ctx: &mut NodeScratch, _variant: u32) {
        let (primary, secondary) = inputs.pair();
        debug_assert_eq!(primary.len(), self.primary.num_outputs() as usize);
        debug_assert_eq!(secondary.len(), self.secondary.num_outputs() as usize);
        debug_assert_eq!(ctx.outputs.len(), self.num_outputs as usize);

        match self.op {
            CombineOp::Concat => {
                ctx.outputs[..primary.len()].copy_from_slice(primary);
                ctx.outputs[primary.len()..].copy_from_slice(secondary);
            }
            CombineOp::Sum => {
                for ((output, &a), &b) in ctx.outputs.iter_mut().zip(primary).zip(secondary) {
                    *output = a + b;
                }
            }
        }
    }

    fn backpropagate(
        &self,
        error: &[f32],
        _inputs: Inputs<'_>,
        ctx: &mut NodeScratch,
        _gradients: Option<&mut Gradients>,
        _variant: u32,
    ) {
        debug_assert_eq!(error.len(), self.num_outputs as usize);
        debug_assert_eq!(ctx.input_error.len(), self.primary.num_outputs() as usize);
        debug_assert_eq!(
            ctx.secondary_input_error.len(),
            self.secondary.num_outputs() as usize
        );

        match self.op {
            CombineOp::Concat => {
                let split = ctx.input_error.len();
                ctx.input_error.copy_from_slice(&error[..split]);
                ctx.secondary_input_error.copy_from_slice(&error[split..]);
            }
            CombineOp::Sum => {
                ctx.input_error.copy_from_slice(error);
                ctx.secondary_input_error.copy_from_slice(error);
            }
        }
    }
}
