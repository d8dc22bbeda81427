//! First-order update rules used by the CRF trainer.

use std::fmt;
use std::str::FromStr;

use bincode::{Decode, Encode};

/// Optimizer type.
#[derive(Clone, Copy, Debug, PartialEq, Decode, Encode)]
pub enum Optimizer {
    /// Plain gradient descent.
    GradientDescent,

    /// Gradient descent with a velocity term.
    Momentum { momentum: f64 },

    /// Per-coordinate learning rates scaled by accumulated squared gradients.
    AdaGrad { epsilon: f64 },
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::GradientDescent
    }
}

impl FromStr for Optimizer {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gd" => Ok(Self::GradientDescent),
            "momentum" => Ok(Self::Momentum { momentum: 0.9 }),
            "adagrad" => Ok(Self::AdaGrad { epsilon: 1e-8 }),
            _ => Err("Could not parse an optimizer. Use gd, momentum or adagrad."),
        }
    }
}

impl fmt::Display for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::GradientDescent => write!(f, "gd"),
            Self::Momentum { momentum } => write!(f, "momentum({momentum})"),
            Self::AdaGrad { epsilon } => write!(f, "adagrad({epsilon})"),
        }
    }
}

/// Mutable optimizer state over a flat parameter vector.
pub(crate) struct OptimizerState {
    optimizer: Optimizer,
    learning_rate: f64,
    // Velocity for momentum, squared gradient sums for AdaGrad.
    acc: Vec<f64>,
}

impl OptimizerState {
    pub fn new(optimizer: Optimizer, learning_rate: f64, n_params: usize) -> Self {
        let acc = match optimizer {
            Optimizer::GradientDescent => vec![],
            _ => vec![0.0; n_params],
        };
        Self {
            optimizer,
            learning_rate,
            acc,
        }
    }

    /// Moves `weights` against `gradient`.
    pub fn step(&mut self, weights: &mut [f64], gradient: &[f64]) {
        debug_assert_eq!(weights.len(), gradient.len());
        let lr = self.learning_rate;
        match self.optimizer {
            Optimizer::GradientDescent => {
                for (w, g) in weights.iter_mut().zip(gradient) {
                    *w -= lr * g;
                }
            }
            Optimizer::Momentum { momentum } => {
                for ((w, g), v) in weights.iter_mut().zip(gradient).zip(&mut self.acc) {
                    *v = momentum * *v + lr * g;
                    *w -= *v;
                }
            }
            Optimizer::AdaGrad { epsilon } => {
                for ((w, g), s) in weights.iter_mut().zip(gradient).zip(&mut self.acc) {
                    *s += g * g;
                    *w -= lr * g / (s.sqrt() + epsilon);
                }
            }
        }
    }
}
