use std::sync::Arc;

use crate::errors::{NetError, NetResult};
use crate::gradient::Gradients;
use crate::storage::WeightsStoragePtr;

use super::{
    gradient_variant_index, InputMode, Inputs, Node, NodePtr, NodeScratch, ACTIVATION_EPSILON,
};

/// Regular fully connected dense layer. Constructed without a predecessor it
/// acts as the network's dense input node.
pub struct FullyConnected {
    num_inputs: u32,
    num_outputs: u32,
    storage: WeightsStoragePtr,
    previous: Option<NodePtr>,
}

impl FullyConnected {
    pub fn new(
        previous: Option<&NodePtr>,
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
        if let Some(previous) = previous {
            if previous.num_outputs() != num_inputs {
                return Err(NetError::ShapeMismatch {
                    expected: vec![num_inputs as usize],
                    found: vec![previous.num_outputs() as usize],
                });
            }
        }
        Ok(Arc::new(Self {
            num_inputs,
            num_outputs,
            storage,
            previous: previous.cloned(),
        }))
    }
}

impl Node for FullyConnected {
    fn num_inputs(&self) -> u32 {
        self.num_inputs
    }

    fn num_outputs(&self) -> u32 {
        self.num_outputs
    }

    fn input_mode(&self) -> InputMode {
        InputMode::Full
    }

    fn is_input_node(&self) -> bool {
        self.previous.is_none()
    }

    fn storage(&self) -> Option<&WeightsStoragePtr> {
        Some(&self.storage)
    }

    fn predecessor(&self, port: usize) -> Option<&NodePtr> {
        if port == 0 {
            self.previous.as_ref()
        } else {
            None
        }
    }

    fn create_scratch(&self) -> NodeScratch {
        NodeScratch::new(self.num_outputs as usize, self.num_inputs as usize, 0)
    }

    fn run(&self, inputs: Inputs<'_>, ctx: &mut NodeScratch, variant: u32) {
        let input = inputs.dense();
        let storage = self.storage.read().unwrap();
        let weights = &storage.variants[storage.variant_index(variant)].weights;

        let num_inputs = self.num_inputs as usize;
        let num_outputs = self.num_outputs as usize;
        debug_assert_eq!(input.len(), num_inputs);
        debug_assert_eq!(ctx.outputs.len(), num_outputs);

        // start from the bias row
        ctx.outputs
            .copy_from_slice(&weights[num_inputs * num_outputs..][..num_outputs]);

        if num_outputs == 1 {
            // single-output layer reduces to a dot product
            let mut sum = 0.0f32;
            for (w, x) in weights[..num_inputs].iter().zip(input) {
                sum += w * x;
            }
            ctx.outputs[0] += sum;
        } else {
            // outer-product accumulation, skipping (near-)zero inputs
            for (j, &x) in input.iter().enumerate() {
                if x.abs() > ACTIVATION_EPSILON {
                    let row = &weights[j * num_outputs..][..num_outputs];
                    for (output, w) in ctx.outputs.iter_mut().zip(row) {
                        *output += w * x;
                    }
                }
            }
        }
    }

    fn backpropagate(
        &self,
        error: &[f32],
        inputs: Inputs<'_>,
        ctx: &mut NodeScratch,
        gradients: Option<&mut Gradients>,
        variant: u32,
    ) {
        let input = inputs.dense();
        let gradients = gradients.expect("trainable node requires a gradient buffer");
        debug_assert!(!gradients.is_sparse());

        let storage = self.storage.read().unwrap();
        let weights = &storage.variants[storage.variant_index(variant)].weights;

        let num_inputs = self.num_inputs as usize;
        let num_outputs = self.num_outputs as usize;
        debug_assert_eq!(error.len(), num_outputs);
        debug_assert_eq!(input.len(), num_inputs);
        debug_assert_eq!(ctx.input_error.len(), num_inputs);

        let variant_index = gradient_variant_index(gradients, variant);
        let gradients_variant = &mut gradients.variants[variant_index];

        ctx.input_error.fill(0.0);

        if num_outputs > 1 {
            for (i, &e) in error.iter().enumerate() {
                if e.abs() > ACTIVATION_EPSILON {
                    for (j, input_error) in ctx.input_error.iter_mut().enumerate() {
                        *input_error += weights[j * num_outputs + i] * e;
                    }
                }
            }

            for (j, &x) in input.iter().enumerate() {
                if x.abs() > ACTIVATION_EPSILON {
                    let row = &mut gradients_variant.values[j * num_outputs..][..num_outputs];
                    for (g, e) in row.iter_mut().zip(error) {
                        *g += x * e;
                    }
                    gradients_variant.dirty[j] = true;
                }
            }
        } else {
            // fused single-output kernel
            let e = error[0];
            if e.abs() > ACTIVATION_EPSILON {
                let gradient_row = &mut gradients_variant.values[..num_inputs];
                for j in 0..num_inputs {
                    ctx.input_error[j] += weights[j] * e;
                    gradient_row[j] += input[j] * e;
                }
            }
        }

        // bias gradient
        let bias_row = &mut gradients_variant.values[num_inputs * num_outputs..][..num_outputs];
        for (g, e) in bias_row.iter_mut().zip(error) {
            *g += *e;
        }
        gradients_variant.dirty[num_inputs] = true;
    }
}
