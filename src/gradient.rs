use crate::values::{self, Values};

/// Per-thread gradient accumulator mirroring the shape of one
/// [`WeightsStorage`](crate::storage::WeightsStorage).
///
/// For sparse storages only rows touched since the last clear carry data;
/// the `dirty` flags track them so clearing and reduction never walk the
/// whole matrix. Rows are zero iff their flag is unset.
pub struct Gradients {
    num_inputs: u32,
    num_outputs: u32,
    is_sparse: bool,
    pub variants: Vec<GradientsVariant>,
}

pub struct GradientsVariant {
    pub values: Values,
    /// One byte per row so the owning worker can set flags without atomics.
    pub dirty: Vec<bool>,
}

impl Gradients {
    pub fn new(num_inputs: u32, num_outputs: u32, num_variants: u32, is_sparse: bool) -> Self {
        let num_values = (num_inputs as usize + 1) * num_outputs as usize;
        let variants = (0..num_variants)
            .map(|_| GradientsVariant {
                values: values::zeroed(num_values),
                dirty: vec![false; num_inputs as usize + 1],
            })
            .collect();
        Self {
            num_inputs,
            num_outputs,
            is_sparse,
            variants,
        }
    }

    pub fn num_inputs(&self) -> u32 {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> u32 {
        self.num_outputs
    }

    pub fn is_sparse(&self) -> bool {
        self.is_sparse
    }

    /// Zeroes the buffer. Sparse buffers re-zero only dirty rows; everything
    /// else is already known-zero.
    pub fn clear(&mut self) {
        let num_outputs = self.num_outputs as usize;
        if self.is_sparse {
            for variant in &mut self.variants {
                for row in 0..=self.num_inputs as usize {
                    if variant.dirty[row] {
                        variant.values[row * num_outputs..(row + 1) * num_outputs].fill(0.0);
                    }
                }

                #[cfg(debug_assertions)]
                for &value in variant.values.iter() {
                    debug_assert_eq!(value, 0.0);
                }

                variant.dirty.fill(false);
            }
        } else {
            for variant in &mut self.variants {
                variant.values.fill(0.0);
                variant.dirty.fill(false);
            }
        }
    }

    /// Adds one row of `rhs` into this buffer and zeroes the source row.
    /// For sparse buffers a clean source row is a no-op.
    ///
    /// Dirty flags are deliberately NOT merged here so concurrent callers can
    /// reduce disjoint rows without synchronization; finish with
    /// [`accumulate_update_dirty`](Self::accumulate_update_dirty) from a
    /// single thread.
    pub fn accumulate(&mut self, rhs: &mut Gradients, row: u32) {
        debug_assert!(row <= self.num_inputs);
        debug_assert_eq!(rhs.num_inputs, self.num_inputs);
        debug_assert_eq!(rhs.num_outputs, self.num_outputs);
        debug_assert_eq!(rhs.variants.len(), self.variants.len());
        debug_assert_eq!(rhs.is_sparse, self.is_sparse);

        let is_sparse = self.is_sparse;
        let num_outputs = self.num_outputs as usize;
        let span = row as usize * num_outputs..(row as usize + 1) * num_outputs;

        for (variant, rhs_variant) in self.variants.iter_mut().zip(&mut rhs.variants) {
            if is_sparse && !rhs_variant.dirty[row as usize] {
                continue;
            }
            let dst = &mut variant.values[span.clone()];
            let src = &mut rhs_variant.values[span.clone()];
            for (d, s) in dst.iter_mut().zip(src.iter_mut()) {
                *d += *s;
                *s = 0.0;
            }
        }
    }

    /// Merges the dirty flag for one row after all row additions are done.
    /// Requires exclusive access to both buffers.
    pub fn accumulate_update_dirty(&mut self, rhs: &mut Gradients, row: u32) {
        debug_assert!(row <= self.num_inputs);
        debug_assert_eq!(rhs.variants.len(), self.variants.len());
        debug_assert_eq!(rhs.is_sparse, self.is_sparse);

        if !self.is_sparse {
            return;
        }
        for (variant, rhs_variant) in self.variants.iter_mut().zip(&mut rhs.variants) {
            if rhs_variant.dirty[row as usize] {
                variant.dirty[row as usize] = true;
                rhs_variant.dirty[row as usize] = false;
            }
        }
    }
}
