pub mod errors;
pub mod gradient;
pub mod halton;
pub mod network;
pub mod nodes;
pub mod scoring;
pub mod storage;
pub mod trainer;
pub mod values;

pub use errors::{NetError, NetResult};
pub use gradient::Gradients;
pub use halton::HaltonSequence;
pub use network::{
    InputDesc, NeuralNetwork, NodeInput, Output, RunContext, TrainingSet, TrainingVector,
    MAX_INPUT_NODES,
};
pub use nodes::{
    Activation, ActivationKind, ActiveFeature, CombineOp, Combining, FullyConnected, InputMode,
    Inputs, Node, NodePtr, NodeScratch, SparseBinaryInput, SparseInput,
};
pub use storage::{WeightsStorage, WeightsStoragePtr, WeightsUpdateOptions};
pub use trainer::{Optimizer, TrainParams, Trainer};
pub use values::Values;
