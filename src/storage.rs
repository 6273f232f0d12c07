use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::gradient::Gradients;
use crate::halton::HaltonSequence;
use crate::values::{self, Values};

/// Storages are shared between the nodes that use them and the trainer:
/// read by every worker during a batch, written only by the single
/// update task.
pub type WeightsStoragePtr = Arc<RwLock<WeightsStorage>>;

/// Weight matrix shared by one or more trainable nodes, plus the optimizer
/// moment buffers and the trainable-weight mask.
///
/// Layout is row-major with output stride: element `(row j, col i)` lives at
/// `j * output_size + i`. Row `j < input_size` holds the weights of input
/// feature `j`; row `input_size` is the bias row.
pub struct WeightsStorage {
    input_size: u32,
    output_size: u32,
    /// True when this storage backs a sparse input node; selects the
    /// dirty-row gradient clear strategy.
    pub is_sparse: bool,
    /// When false both optimizers skip this storage entirely.
    pub update_enabled: bool,
    /// 1.0 for trainable weights, 0.0 to freeze. Applied multiplicatively to
    /// each update delta. Shared across variants.
    pub weights_mask: Values,
    pub weights_range: f32,
    pub bias_range: f32,
    pub variants: Vec<Variant>,
}

pub struct Variant {
    pub weights: Values,
    pub gradient_moment1: Values,
    pub gradient_moment2: Values,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WeightsUpdateOptions {
    pub learning_rate: f32,
    pub gradient_scale: f32,
    pub weight_decay: f32,
    pub iteration: usize,
    pub clamp_weights: bool,
}

impl Default for WeightsUpdateOptions {
    fn default() -> Self {
        Self {
            learning_rate: 1.0,
            gradient_scale: 1.0,
            weight_decay: 0.0,
            iteration: 0,
            clamp_weights: true,
        }
    }
}

impl WeightsStorage {
    pub fn new(input_size: u32, output_size: u32, num_variants: u32) -> Self {
        debug_assert!(num_variants > 0);
        let num_weights = (input_size as usize + 1) * output_size as usize;
        let variants = (0..num_variants)
            .map(|_| Variant {
                weights: values::zeroed(num_weights),
                gradient_moment1: values::zeroed(num_weights),
                gradient_moment2: values::zeroed(num_weights),
            })
            .collect();
        Self {
            input_size,
            output_size,
            is_sparse: false,
            update_enabled: true,
            weights_mask: values::filled(num_weights, 1.0),
            weights_range: 10.0,
            bias_range: 10.0,
            variants,
        }
    }

    pub fn new_shared(input_size: u32, output_size: u32, num_variants: u32) -> WeightsStoragePtr {
        Arc::new(RwLock::new(Self::new(input_size, output_size, num_variants)))
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn output_size(&self) -> u32 {
        self.output_size
    }

    pub fn num_variants(&self) -> usize {
        self.variants.len()
    }

    /// Out-of-range variant requests fall back to the last variant.
    pub fn variant_index(&self, requested: u32) -> usize {
        (requested as usize).min(self.variants.len() - 1)
    }

    /// Resets the mask and moments and draws fresh weights from a
    /// low-discrepancy sequence, one Halton dimension per input row, advancing
    /// the sequence after each completed output column. The bias row is set to
    /// `bias` and variant 0 is copied to the remaining variants.
    pub fn init(&mut self, num_active_inputs: u32, bias: f32) {
        debug_assert!(!self.variants.is_empty());
        debug_assert!(num_active_inputs > 0);

        self.weights_mask.fill(1.0);

        let input_size = self.input_size as usize;
        let output_size = self.output_size as usize;
        let scale = (2.0 / num_active_inputs as f32).sqrt();

        {
            let variant = &mut self.variants[0];
            variant.gradient_moment1.fill(0.0);
            variant.gradient_moment2.fill(0.0);

            let mut halton = HaltonSequence::new(input_size);
            for j in 0..output_size {
                for i in 0..input_size {
                    let u = halton.get_double(i) as f32;
                    variant.weights[output_size * i + j] = (u - 0.5) * scale;
                }
                halton.next_sample();
            }

            for j in 0..output_size {
                variant.weights[output_size * input_size + j] = bias;
            }
        }

        let (first, rest) = self.variants.split_first_mut().expect("checked non-empty");
        for variant in rest {
            variant.gradient_moment1.fill(0.0);
            variant.gradient_moment2.fill(0.0);
            variant.weights.copy_from_slice(&first.weights);
        }

        trace!(
            inputs = self.input_size,
            outputs = self.output_size,
            scale,
            "weights initialized"
        );
    }

    #[tracing::instrument(skip_all, name = "update_adadelta")]
    pub fn update_adadelta(&mut self, gradients: &Gradients, options: &WeightsUpdateOptions) {
        if !self.update_enabled {
            return;
        }
        debug_assert_eq!(gradients.num_inputs(), self.input_size);
        debug_assert_eq!(gradients.num_outputs(), self.output_size);
        debug_assert_eq!(gradients.variants.len(), self.variants.len());

        const RHO: f32 = 0.95;
        const EPSILON: f32 = 1.0e-8;

        let input_size = self.input_size as usize;
        let output_size = self.output_size as usize;
        let weights_range = self.weights_range;
        let bias_range = self.bias_range;

        for (variant, gradients_variant) in self.variants.iter_mut().zip(&gradients.variants) {
            debug_assert_eq!(gradients_variant.values.len(), (input_size + 1) * output_size);

            for j in 0..=input_size {
                let bound = if j < input_size { weights_range } else { bias_range };
                let span = j * output_size..(j + 1) * output_size;

                let m_row = &mut variant.gradient_moment1[span.clone()];
                let v_row = &mut variant.gradient_moment2[span.clone()];
                let w_row = &mut variant.weights[span.clone()];
                let mask_row = &self.weights_mask[span.clone()];
                let g_row = &gradients_variant.values[span];

                for i in 0..output_size {
                    let mut g = options.gradient_scale * g_row[i];
                    debug_assert!(!g.is_nan());
                    debug_assert!(v_row[i] >= 0.0);
                    debug_assert!(m_row[i] >= 0.0);

                    g += w_row[i] * options.weight_decay;

                    m_row[i] = RHO * m_row[i] + (1.0 - RHO) * g * g;
                    debug_assert!(!m_row[i].is_nan());

                    let delta = g * ((v_row[i] + EPSILON) / (m_row[i] + EPSILON)).sqrt();
                    v_row[i] = RHO * v_row[i] + (1.0 - RHO) * delta * delta;
                    debug_assert!(!v_row[i].is_nan());

                    let mut w = w_row[i] - mask_row[i] * options.learning_rate * delta;
                    debug_assert!(!w.is_nan());

                    if options.clamp_weights {
                        w = w.clamp(-bound, bound);
                    }
                    w_row[i] = w;
                }
            }
        }
    }

    #[tracing::instrument(skip_all, name = "update_adam")]
    pub fn update_adam(&mut self, gradients: &Gradients, options: &WeightsUpdateOptions) {
        if !self.update_enabled {
            return;
        }
        debug_assert_eq!(gradients.num_inputs(), self.input_size);
        debug_assert_eq!(gradients.num_outputs(), self.output_size);
        debug_assert_eq!(gradients.variants.len(), self.variants.len());

        const BETA1: f32 = 0.9;
        const BETA2: f32 = 0.999;
        const EPSILON: f32 = 1.0e-8;

        let iteration = (options.iteration + 1) as f32;
        let beta1_mult = 1.0 / (1.0 - BETA1.powf(iteration));
        let beta2_mult = 1.0 / (1.0 - BETA2.powf(iteration));

        let input_size = self.input_size as usize;
        let output_size = self.output_size as usize;
        let weights_range = self.weights_range;
        let bias_range = self.bias_range;

        for (variant, gradients_variant) in self.variants.iter_mut().zip(&gradients.variants) {
            debug_assert_eq!(gradients_variant.values.len(), (input_size + 1) * output_size);

            for j in 0..=input_size {
                let bound = if j < input_size { weights_range } else { bias_range };
                let span = j * output_size..(j + 1) * output_size;

                let m_row = &mut variant.gradient_moment1[span.clone()];
                let v_row = &mut variant.gradient_moment2[span.clone()];
                let w_row = &mut variant.weights[span.clone()];
                let mask_row = &self.weights_mask[span.clone()];
                let g_row = &gradients_variant.values[span];

                for i in 0..output_size {
                    let g = options.gradient_scale * g_row[i];
                    debug_assert!(!g.is_nan());
                    debug_assert!(v_row[i] >= 0.0);

                    // biased moment estimates
                    m_row[i] = BETA1 * m_row[i] + (1.0 - BETA1) * g;
                    debug_assert!(!m_row[i].is_nan());
                    v_row[i] = BETA2 * v_row[i] + (1.0 - BETA2) * g * g;
                    debug_assert!(!v_row[i].is_nan());

                    // bias correction
                    let m_hat = m_row[i] * beta1_mult;
                    let v_hat = v_row[i] * beta2_mult;

                    let delta = options.learning_rate
                        * (m_hat / (EPSILON + v_hat.sqrt()) + w_row[i] * options.weight_decay);
                    debug_assert!(!delta.is_nan());

                    let mut w = w_row[i] - mask_row[i] * delta;
                    debug_assert!(!w.is_nan());

                    if options.clamp_weights {
                        w = w.clamp(-bound, bound);
                    }
                    w_row[i] = w;
                }
            }
        }
    }
}
