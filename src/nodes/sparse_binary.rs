use std::sync::Arc;

use crate::errors::{NetError, NetResult};
use crate::gradient::Gradients;
use crate::storage::WeightsStoragePtr;

use super::{gradient_variant_index, InputMode, Inputs, Node, NodePtr, NodeScratch};

/// Output elements per tile: eight eight-lane SIMD accumulators.
const TILE: usize = 64;

/// Input node whose features are either 0.0 or 1.0, with almost all of them
/// assumed zero. The caller passes only the active indices; a forward pass
/// costs `O(active * outputs)` instead of `O(inputs * outputs)`.
///
/// Output widths divisible by [`TILE`] run entirely in the tiled kernel;
/// a remainder falls through to the scalar tail.
pub struct SparseBinaryInput {
    num_inputs: u32,
    num_outputs: u32,
    storage: WeightsStoragePtr,
}

impl SparseBinaryInput {
    pub fn new(
        num_inputs: u32,
        num_outputs: u32,
        storage: WeightsStoragePtr,
    ) -> NetResult<NodePtr> {
        if num_inputs > u16::MAX as u32 {
            return Err(NetError::IndexSpaceTooLarge(num_inputs));
        }
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

impl Node for SparseBinaryInput {
    fn num_inputs(&self) -> u32 {
        self.num_inputs
    }

    fn num_outputs(&self) -> u32 {
        self.num_outputs
    }

    fn input_mode(&self) -> InputMode {
        InputMode::SparseBinary
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
        let features = inputs.sparse_binary();
        let storage = self.storage.read().unwrap();
        let weights = &storage.variants[storage.variant_index(variant)].weights;

        let num_outputs = self.num_outputs as usize;
        debug_assert_eq!(ctx.outputs.len(), num_outputs);

        let biases = &weights[self.num_inputs as usize * num_outputs..];
        let outputs = &mut ctx.outputs[..];

        // tiled accumulation: biases into a register block, then one weight
        // row per active feature
        let num_tiles = num_outputs / TILE;
        for tile in 0..num_tiles {
            let base = tile * TILE;
            let mut acc = [0.0f32; TILE];
            acc.copy_from_slice(&biases[base..base + TILE]);

            for &feature in features {
                debug_assert!((feature as u32) < self.num_inputs);
                let row = &weights[feature as usize * num_outputs + base..][..TILE];
                for (a, w) in acc.iter_mut().zip(row) {
                    *a += *w;
                }
            }

            outputs[base..base + TILE].copy_from_slice(&acc);
        }

        // scalar tail for widths not covered by a full tile
        let tail = num_tiles * TILE;
        if tail < num_outputs {
            outputs[tail..].copy_from_slice(&biases[tail..num_outputs]);
            for &feature in features {
                debug_assert!((feature as u32) < self.num_inputs);
                let row = &weights[feature as usize * num_outputs..][..num_outputs];
                for i in tail..num_outputs {
                    outputs[i] += row[i];
                }
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
        let features = inputs.sparse_binary();
        let gradients = gradients.expect("trainable node requires a gradient buffer");
        debug_assert!(gradients.is_sparse());
        debug_assert_eq!(error.len(), self.num_outputs as usize);

        let variant_index = gradient_variant_index(gradients, variant);
        let gradients_variant = &mut gradients.variants[variant_index];
        let num_outputs = self.num_outputs as usize;

        // not multiplying by the input value, it is always 1.0
        for &feature in features {
            let row = &mut gradients_variant.values[feature as usize * num_outputs..][..num_outputs];
            for (g, e) in row.iter_mut().zip(error) {
                *g += *e;
            }
        }
        for &feature in features {
            gradients_variant.dirty[feature as usize] = true;
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
