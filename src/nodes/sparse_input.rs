use std::sync::Arc;

use crate::errors::{NetError, NetResult};
use crate::gradient::Gradients;
use crate::storage::WeightsStoragePtr;

use super::{gradient_variant_index, InputMode, Inputs, Node, NodePtr, NodeScratch};

/// Input node where most inputs are assumed to be zero; the caller passes
/// `(index, value)` pairs for the active features only.
pub struct SparseInput {
    num_inputs: u32,
    num_outputs: u32,
    storage: WeightsStoragePtr,
}

impl SparseInput {
    pub fn new(
        num_inputs: u32,
        num_outputs: u32,
        storage: WeightsStoragePtr,
    ) -> NetResult<NodePtr> {
        {
            let guard = storage.read().unwrap();
            if guard.input_size() != num_inputs || guard.output_size() != num_outputs {
                return Err(NetError::ShapeMismatch {
                    expected: vec![num_inputs as usize, num_outputs as usize],
                    found: vec![guard.input_size() as usize, guard.output_size() as usize],
                });
            }
        }
        Ok(Arc::new(Self {
            num_inputs,
            num_outputs,
            storage,
        }))
    }
}

impl Node for SparseInput {
    fn num_inputs(&self) -> u32 {
        self.num_inputs
    }

    fn num_outputs(&self) -> u32 {
        self.num_outputs
    }

    fn input_mode(&self) -> InputMode {
        InputMode::Sparse
    }

    fn is_input_node(&self) -> bool {
        true
    }

    fn storage(&self) -> Option<&WeightsStoragePtr> {
        Some(&self.storage)
    }

    fn predecessor(&self, _port: usize) -> Option<&NodePtr> {
        None
    }

    fn create_scratch(&self) -> NodeScratch {
        NodeScratch::new(self.num_outputs as usize, 0, 0)
    }

    fn run(&self, inputs: Inputs<'_>, ctx: &mut NodeScratch, variant: u32) {
        let features = inputs.sparse();
        let storage = self.storage.read().unwrap();
        let weights = &storage.variants[storage.variant_index(variant)].weights;

        let num_outputs = self.num_outputs as usize;
        debug_assert_eq!(ctx.outputs.len(), num_outputs);

        // start from the bias row
        ctx.outputs
            .copy_from_slice(&weights[self.num_inputs as usize * num_outputs..][..num_outputs]);

        for feature in features {
            debug_assert!(feature.index < self.num_inputs);
            debug_assert!(!feature.value.is_nan());

            let row = &weights[feature.index as usize * num_outputs..][..num_outputs];
            for (output, w) in ctx.outputs.iter_mut().zip(row) {
                *output += w * feature.value;
            }
        }
    }

    fn backpropagate(
        &self,
        error: &[f32],
        inputs: Inputs<'_>,
        _ctx: &mut NodeScratch,
        gradients: Option<&mut Gradients>,
        variant: u32,
    ) {
        let features = inputs.sparse();
        let gradients = gradients.expect("trainable node requires a gradient buffer");
        debug_assert!(gradients.is_sparse());
        debug_assert_eq!(error.len(), self.num_outputs as usize);

        let variant_index = gradient_variant_index(gradients, variant);
        let gradients_variant = &mut gradients.variants[variant_index];
        let num_outputs = self.num_outputs as usize;

        for feature in features {
            let row =
                &mut gradients_variant.values[feature.index as usize * num_outputs..][..num_outputs];
            for (g, e) in row.iter_mut().zip(error) {
                *g += feature.value * e;
            }
            gradients_variant.dirty[feature.index as usize] = true;
        }

        // bias gradient
        let bias_row =
            &mut gradients_variant.values[self.num_inputs as usize * num_outputs..][..num_outputs];
        for (g, e) in bias_row.iter_mut().zip(error) {
            *g += *e;
        }
        gradients_variant.dirty[self.num_inputs as usize] = true;
    }
}
