use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::gradient::Gradients;
use crate::scoring;

use super::{InputMode, Inputs, Node, NodePtr, NodeScratch};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    Linear,
    ReLU,
    /// Clipped ReLU: clamp(x, 0, 1).
    CReLU,
    /// Squared clipped ReLU.
    SqrCReLU,
    Sigmoid,
    /// Expected game score of a raw evaluation.
    EvalToGameScore,
}

fn apply(kind: ActivationKind, x: f32) -> f32 {
    match kind {
        ActivationKind::Linear => x,
        ActivationKind::ReLU => {
            if x <= 0.0 {
                0.0
            } else {
                x
            }
        }
        ActivationKind::CReLU => x.clamp(0.0, 1.0),
        ActivationKind::SqrCReLU => {
            if x <= 0.0 {
                0.0
            } else if x >= 1.0 {
                1.0
            } else {
                x * x
            }
        }
        ActivationKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        ActivationKind::EvalToGameScore => scoring::eval_to_expected_game_score(x),
    }
}

fn derivative(kind: ActivationKind, x: f32) -> f32 {
    match kind {
        ActivationKind::Linear => 1.0,
        ActivationKind::ReLU => {
            if x <= 0.0 {
                0.0
            } else {
                1.0
            }
        }
        ActivationKind::CReLU => {
            if x <= 0.0 || x >= 1.0 {
                0.0
            } else {
                1.0
            }
        }
        ActivationKind::SqrCReLU => {
            if x <= 0.0 || x >= 1.0 {
                0.0
            } else {
                2.0 * x
            }
        }
        ActivationKind::Sigmoid => {
            let s = 1.0 / (1.0 + (-x).exp());
            s * (1.0 - s)
        }
        ActivationKind::EvalToGameScore => scoring::eval_to_expected_game_score_derivative(x),
    }
}

/// Element-wise activation over the predecessor's outputs. No weights.
pub struct Activation {
    size: u32,
    kind: ActivationKind,
    previous: NodePtr,
}

impl Activation {
    pub fn new(previous: &NodePtr, kind: ActivationKind) -> NodePtr {
        Arc::new(Self {
            size: previous.num_outputs(),
            kind,
            previous: previous.clone(),
        })
    }
}

impl Node for Activation {
    fn num_inputs(&self) -> u32 {
        self.size
    }

    fn num_outputs(&self) -> u32 {
        self.size
    }

    fn input_mode(&self) -> InputMode {
        InputMode::Full
    }

    fn predecessor(&self, port: usize) -> Option<&NodePtr> {
        if port == 0 {
            Some(&self.previous)
        } else {
            None
        }
    }

    fn create_scratch(&self) -> NodeScratch {
        NodeScratch::new(self.size as usize, self.size as usize, 0)
    }

    fn run(&self, inputs: Inputs<'_>, ctx: &mut NodeScratch, _variant: u32) {
        let input = inputs.dense();
        debug_assert_eq!(input.len(), self.size as usize);
        debug_assert_eq!(ctx.outputs.len(), self.size as usize);

        #[cfg(debug_assertions)]
        for &x in input {
            debug_assert!(x.is_finite());
            debug_assert!(x.abs() < 1.0e4);
        }

        for (output, &x) in ctx.outputs.iter_mut().zip(input) {
            *output = apply(self.kind, x);
        }
    }

    fn backpropagate(
        &self,
        error: &[f32],
        inputs: Inputs<'_>,
        ctx: &mut NodeScratch,
        _gradients: Option<&mut Gradients>,
        _variant: u32,
    ) {
        let input = inputs.dense();
        debug_assert_eq!(error.len(), self.size as usize);
        debug_assert_eq!(ctx.input_error.len(), self.size as usize);

        for ((input_error, &e), &x) in ctx.input_error.iter_mut().zip(error).zip(input) {
            *input_error = e * derivative(self.kind, x);
        }
    }
}
