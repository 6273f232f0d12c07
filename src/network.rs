use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{NetError, NetResult};
use crate::gradient::Gradients;
use crate::nodes::{ActiveFeature, InputMode, Inputs, NodePtr, NodeScratch};
use crate::values::{self, Values};

/// Input nodes occupy the leading node positions; only this many slots are
/// routed from an [`InputDesc`].
pub const MAX_INPUT_NODES: usize = 8;

/// Derivative scale of the hard-coded mean-squared-error loss.
const ERROR_SCALE: f32 = 2.0;

/// Caller-supplied input for one input node.
#[derive(Clone, Debug, Default)]
pub enum NodeInput {
    #[default]
    Unused,
    Full(Vec<f32>),
    Sparse(Vec<ActiveFeature>),
    SparseBinary(Vec<u16>),
}

impl NodeInput {
    fn validate(&self) -> bool {
        match self {
            NodeInput::Unused => true,
            NodeInput::Full(inputs) => inputs.iter().all(|v| !v.is_nan()),
            NodeInput::Sparse(features) => {
                features.iter().all(|f| !f.value.is_nan())
                    && features
                        .iter()
                        .enumerate()
                        .all(|(i, f)| features[..i].iter().all(|g| g.index != f.index))
            }
            NodeInput::SparseBinary(features) => features
                .iter()
                .enumerate()
                .all(|(i, f)| !features[..i].contains(f)),
        }
    }
}

/// Per-sample input: one entry per input node, plus the weights-variant
/// selector routed to every storage.
#[derive(Clone, Debug, Default)]
pub struct InputDesc {
    pub inputs: Vec<NodeInput>,
    pub variant: u32,
}

impl InputDesc {
    pub fn single(input: NodeInput) -> Self {
        Self {
            inputs: vec![input],
            variant: 0,
        }
    }

    /// NaN and duplicate-index checks; meant for debug assertions only.
    pub fn validate(&self) -> bool {
        self.inputs.len() <= MAX_INPUT_NODES && self.inputs.iter().all(NodeInput::validate)
    }
}

#[derive(Clone, Debug)]
pub enum Output {
    Single(f32),
    Full(Vec<f32>),
}

#[derive(Clone, Debug)]
pub struct TrainingVector {
    pub input: InputDesc,
    pub output: Output,
}

pub type TrainingSet = Vec<TrainingVector>;

/// Resolved input wiring of one node, by position in the node list.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Wiring {
    /// Consumes the matching `InputDesc` slot.
    Input,
    Single(usize),
    Pair(usize, usize),
}

/// Where a node's backward pass reads its error from.
#[derive(Clone, Copy, Debug)]
enum ErrorSource {
    None,
    Primary(usize),
    Secondary(usize),
}

/// Per-runner scratch: one [`NodeScratch`] per node, the precomputed error
/// routing, and a staging buffer for the loss derivative.
pub struct RunContext {
    pub(crate) scratch: Vec<NodeScratch>,
    error_sources: Vec<ErrorSource>,
    temp_values: Values,
}

impl RunContext {
    pub fn init(network: &NeuralNetwork) -> Self {
        let scratch: Vec<NodeScratch> = network
            .nodes
            .iter()
            .map(|node| node.create_scratch())
            .collect();

        // error flows backwards through the port that consumed a node's
        // outputs; combining consumers are matched explicitly, everything
        // else assumes a linear chain
        let mut error_sources = vec![ErrorSource::None; network.nodes.len()];
        for (i, wiring) in network.wiring.iter().enumerate() {
            if let Wiring::Pair(primary, secondary) = *wiring {
                debug_assert!(matches!(error_sources[primary], ErrorSource::None));
                debug_assert!(matches!(error_sources[secondary], ErrorSource::None));
                error_sources[primary] = ErrorSource::Primary(i);
                error_sources[secondary] = ErrorSource::Secondary(i);
            }
        }
        for i in 0..network.nodes.len().saturating_sub(1) {
            if matches!(error_sources[i], ErrorSource::None) {
                error_sources[i] = ErrorSource::Primary(i + 1);
            }
        }

        let num_outputs = network.num_outputs() as usize;
        Self {
            scratch,
            error_sources,
            temp_values: values::zeroed(num_outputs),
        }
    }
}

/// Ordered, topologically sorted node graph. The last node is the output.
pub struct NeuralNetwork {
    nodes: Vec<NodePtr>,
    wiring: Vec<Wiring>,
}

impl NeuralNetwork {
    /// Builds the network and resolves every node's predecessors to earlier
    /// positions in the list (by object identity).
    pub fn init(nodes: Vec<NodePtr>) -> NetResult<Self> {
        if nodes.is_empty() {
            return Err(NetError::EmptyNetwork);
        }

        let mut wiring = Vec::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node.is_input_node() {
                if i >= MAX_INPUT_NODES {
                    return Err(NetError::TooManyInputNodes(i, MAX_INPUT_NODES));
                }
                wiring.push(Wiring::Input);
                continue;
            }

            let resolve = |port: usize| -> NetResult<usize> {
                let target = node.predecessor(port).ok_or(NetError::DanglingPredecessor(i))?;
                nodes[..i]
                    .iter()
                    .position(|candidate| Arc::ptr_eq(candidate, target))
                    .ok_or(NetError::DanglingPredecessor(i))
            };

            if node.is_combining() {
                wiring.push(Wiring::Pair(resolve(0)?, resolve(1)?));
            } else {
                wiring.push(Wiring::Single(resolve(0)?));
            }
        }

        debug!(nodes = nodes.len(), "network initialized");
        Ok(Self { nodes, wiring })
    }

    pub fn nodes(&self) -> &[NodePtr] {
        &self.nodes
    }

    pub fn num_outputs(&self) -> u32 {
        self.nodes.last().expect("network is never empty").num_outputs()
    }

    /// Forward pass; returns the last node's outputs.
    pub fn run<'a>(&self, input: &InputDesc, ctx: &'a mut RunContext) -> &'a [f32] {
        debug_assert!(input.validate());
        debug_assert_eq!(self.nodes.len(), ctx.scratch.len());

        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            let (before, at) = ctx.scratch.split_at_mut(i);
            let current = &mut at[0];

            let node_inputs = match self.wiring[i] {
                Wiring::Input => route_input(input, i, node.input_mode()),
                Wiring::Single(p) => Inputs::Dense(&before[p].outputs),
                Wiring::Pair(a, b) => Inputs::Pair {
                    primary: &before[a].outputs,
                    secondary: &before[b].outputs,
                },
            };
            node.run(node_inputs, current, input.variant);
        }

        &ctx.scratch[self.nodes.len() - 1].outputs
    }

    /// Forward pass plus backpropagation of the MSE derivative for one
    /// training vector. `gradients` holds one buffer per distinct storage;
    /// `node_storage` maps node positions into it.
    pub(crate) fn run_and_backpropagate(
        &self,
        vector: &TrainingVector,
        ctx: &mut RunContext,
        gradients: &mut [Gradients],
        node_storage: &[Option<usize>],
    ) {
        self.run(&vector.input, ctx);

        let RunContext {
            scratch,
            error_sources,
            temp_values,
        } = ctx;

        let num_nodes = self.nodes.len();
        temp_values.copy_from_slice(&scratch[num_nodes - 1].outputs);

        // loss derivative of (prediction - target)^2
        match &vector.output {
            Output::Single(target) => {
                debug_assert_eq!(temp_values.len(), 1);
                temp_values[0] = ERROR_SCALE * (temp_values[0] - target);
            }
            Output::Full(targets) => {
                debug_assert_eq!(temp_values.len(), targets.len());
                for (value, target) in temp_values.iter_mut().zip(targets) {
                    *value = ERROR_SCALE * (*value - target);
                }
            }
        }

        for i in (0..num_nodes).rev() {
            let node = &self.nodes[i];
            let (before, rest) = scratch.split_at_mut(i);
            let (current, after) = rest.split_first_mut().expect("index in range");

            let error: &[f32] = if i + 1 == num_nodes {
                &temp_values[..]
            } else {
                match error_sources[i] {
                    ErrorSource::Primary(consumer) => &after[consumer - i - 1].input_error[..],
                    ErrorSource::Secondary(consumer) => {
                        &after[consumer - i - 1].secondary_input_error[..]
                    }
                    ErrorSource::None => {
                        debug_assert!(false, "node {i} has no error route");
                        continue;
                    }
                }
            };

            let node_inputs = match self.wiring[i] {
                Wiring::Input => route_input(&vector.input, i, node.input_mode()),
                Wiring::Single(p) => Inputs::Dense(&before[p].outputs),
                Wiring::Pair(a, b) => Inputs::Pair {
                    primary: &before[a].outputs,
                    secondary: &before[b].outputs,
                },
            };

            let node_gradients = match node_storage[i] {
                Some(storage) => Some(&mut gradients[storage]),
                None => None,
            };
            node.backpropagate(error, node_inputs, current, node_gradients, vector.input.variant);
        }
    }

    /// Logs per-storage weight and bias ranges.
    pub fn log_weight_stats(&self) {
        for (i, node) in self.nodes.iter().enumerate() {
            let Some(storage) = node.storage() else {
                continue;
            };
            let storage = storage.read().unwrap();
            let num_inputs = storage.input_size() as usize;
            let num_outputs = storage.output_size() as usize;

            let mut min_weight = f32::MAX;
            let mut max_weight = f32::MIN;
            let mut min_bias = f32::MAX;
            let mut max_bias = f32::MIN;
            for variant in &storage.variants {
                for (k, &w) in variant.weights.iter().enumerate() {
                    if k < num_inputs * num_outputs {
                        min_weight = min_weight.min(w);
                        max_weight = max_weight.max(w);
                    } else {
                        min_bias = min_bias.min(w);
                        max_bias = max_bias.max(w);
                    }
                }
            }
            debug!(
                node = i,
                min_weight, max_weight, min_bias, max_bias, "weight stats"
            );
        }
    }

    /// Persistence of the training-side network is not part of the engine;
    /// deployment uses an external packed format.
    pub fn save(&self, _path: &Path) -> NetResult<()> {
        Err(NetError::Unsupported("network serialization".into()))
    }

    pub fn load(_path: &Path) -> NetResult<Self> {
        Err(NetError::Unsupported("network deserialization".into()))
    }
}

/// Binds the matching `InputDesc` slot to an input node's advertised mode.
fn route_input<'a>(input: &'a InputDesc, position: usize, mode: InputMode) -> Inputs<'a> {
    debug_assert!(position < MAX_INPUT_NODES);
    match (input.inputs.get(position), mode) {
        (Some(NodeInput::Full(values)), InputMode::Full) => Inputs::Dense(values),
        (Some(NodeInput::Sparse(features)), InputMode::Sparse) => Inputs::Sparse(features),
        (Some(NodeInput::SparseBinary(features)), InputMode::SparseBinary) => {
            Inputs::SparseBinary(features)
        }
        _ => unreachable!("input descriptor at position {position} does not match the node"),
    }
}
