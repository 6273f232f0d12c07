use aligned_vec::{AVec, ConstAlign};

/// Alignment of every float buffer the kernels touch. Eight-lane SIMD
/// loads and stores are legal at any tile boundary.
pub const VALUES_ALIGN: usize = 32;

/// Contiguous, 32-byte-aligned f32 buffer used for weights, gradients,
/// activations and error terms.
pub type Values = AVec<f32, ConstAlign<VALUES_ALIGN>>;

pub fn zeroed(len: usize) -> Values {
    filled(len, 0.0)
}

pub fn filled(len: usize, value: f32) -> Values {
    let mut values = AVec::new(VALUES_ALIGN);
    values.resize(len, value);
    values
}

pub fn from_slice(slice: &[f32]) -> Values {
    let mut values = zeroed(slice.len());
    values.copy_from_slice(slice);
    values
}
