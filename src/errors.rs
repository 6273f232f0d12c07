use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch { expected: Vec<usize>, found: Vec<usize> },
    #[error("sparse index space too large: {0} features do not fit 16-bit indices")]
    IndexSpaceTooLarge(u32),
    #[error("node {0} has a predecessor that is not an earlier node in the list")]
    DanglingPredecessor(usize),
    #[error("network has no nodes")]
    EmptyNetwork,
    #[error("input node at position {0}, only {1} input slots are routed")]
    TooManyInputNodes(usize, usize),
    #[error("operation not supported: {0}")]
    Unsupported(String),
}

pub type NetResult<T> = Result<T, NetError>;
