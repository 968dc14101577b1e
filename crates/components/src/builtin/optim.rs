//! First-order optimizers

use crate::traits::Optimizer;
use crate::{Args, ParameterShapes};
use runtime_core::{Error, OptimizerState, Result, StateDict, Step, Tensor};
use serde::Deserialize;
use std::collections::BTreeMap;

fn buffer_key(buffer: &str, param: &str) -> String {
    format!("{}.{}", buffer, param)
}

/// Check that a persisted state belongs to this optimizer and fits the
/// parameters it was bound to
fn validate_state(
    kind: &str,
    buffers: &[&str],
    shapes: &ParameterShapes,
    state: &OptimizerState,
) -> Result<()> {
    if state.kind != kind {
        return Err(Error::OptimizerState {
            message: format!("state was produced by '{}', not '{}'", state.kind, kind),
        });
    }

    for (key, tensor) in &state.buffers {
        let (buffer, param) = key.split_once('.').ok_or_else(|| Error::OptimizerState {
            message: format!("malformed buffer key '{}'", key),
        })?;
        if !buffers.contains(&buffer) {
            return Err(Error::OptimizerState {
                message: format!("unknown buffer '{}' for {}", buffer, kind),
            });
        }
        match shapes.get(param) {
            Some(&len) if len == tensor.len() => {}
            _ => {
                return Err(Error::OptimizerState {
                    message: format!("buffer '{}' does not match any trainable parameter", key),
                })
            }
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct SgdArgs {
    lr: f64,
    #[serde(default)]
    momentum: f64,
    #[serde(default)]
    weight_decay: f64,
}

/// Stochastic gradient descent with optional momentum and weight decay
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f64,
    momentum: f64,
    weight_decay: f64,
    shapes: ParameterShapes,
    step: Step,
    buffers: BTreeMap<String, Tensor>,
}

impl Sgd {
    pub fn new(lr: f64, momentum: f64, weight_decay: f64, shapes: ParameterShapes) -> Self {
        Self {
            lr,
            momentum,
            weight_decay,
            shapes,
            step: 0,
            buffers: BTreeMap::new(),
        }
    }

    pub fn from_args(args: Args<'_>, shapes: ParameterShapes) -> Result<Box<dyn Optimizer>> {
        let args: SgdArgs = args.parse()?;
        Ok(Box::new(Self::new(
            args.lr,
            args.momentum,
            args.weight_decay,
            shapes,
        )))
    }
}

impl Optimizer for Sgd {
    fn kind(&self) -> &str {
        "Sgd"
    }

    fn step(&mut self, params: &mut StateDict, grads: &StateDict) {
        self.step += 1;
        let lr = self.lr as f32;
        let momentum = self.momentum as f32;
        let weight_decay = self.weight_decay as f32;

        for (name, param) in params.iter_mut() {
            let Some(grad) = grads.get(name).filter(|g| g.len() == param.len()) else {
                continue;
            };

            let update: Vec<f32> = grad
                .iter()
                .zip(param.iter())
                .map(|(g, p)| g + weight_decay * p)
                .collect();

            let update = if momentum > 0.0 {
                let buf = self
                    .buffers
                    .entry(buffer_key("momentum", name))
                    .or_insert_with(|| vec![0.0; param.len()]);
                for (b, u) in buf.iter_mut().zip(&update) {
                    *b = momentum * *b + u;
                }
                buf.clone()
            } else {
                update
            };

            for (p, u) in param.iter_mut().zip(&update) {
                *p -= lr * u;
            }
        }
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn state(&self) -> OptimizerState {
        OptimizerState {
            kind: self.kind().to_string(),
            step: self.step,
            learning_rate: self.lr,
            buffers: self.buffers.clone(),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        validate_state(self.kind(), &["momentum"], &self.shapes, &state)?;
        self.step = state.step;
        self.lr = state.learning_rate;
        self.buffers = state.buffers;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AdamArgs {
    lr: f64,
    #[serde(default = "default_beta1")]
    beta1: f64,
    #[serde(default = "default_beta2")]
    beta2: f64,
    #[serde(default = "default_eps")]
    eps: f64,
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_eps() -> f64 {
    1e-8
}

/// Adam with bias-corrected moment estimates
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    shapes: ParameterShapes,
    step: Step,
    buffers: BTreeMap<String, Tensor>,
}

impl Adam {
    pub fn new(lr: f64, shapes: ParameterShapes) -> Self {
        Self {
            lr,
            beta1: default_beta1(),
            beta2: default_beta2(),
            eps: default_eps(),
            shapes,
            step: 0,
            buffers: BTreeMap::new(),
        }
    }

    pub fn from_args(args: Args<'_>, shapes: ParameterShapes) -> Result<Box<dyn Optimizer>> {
        let args: AdamArgs = args.parse()?;
        let mut adam = Self::new(args.lr, shapes);
        adam.beta1 = args.beta1;
        adam.beta2 = args.beta2;
        adam.eps = args.eps;
        Ok(Box::new(adam))
    }
}

impl Optimizer for Adam {
    fn kind(&self) -> &str {
        "Adam"
    }

    fn step(&mut self, params: &mut StateDict, grads: &StateDict) {
        self.step += 1;
        let t = self.step as i32;
        let correction1 = 1.0 - self.beta1.powi(t);
        let correction2 = 1.0 - self.beta2.powi(t);
        let (beta1, beta2) = (self.beta1, self.beta2);

        for (name, param) in params.iter_mut() {
            let Some(grad) = grads.get(name).filter(|g| g.len() == param.len()) else {
                continue;
            };

            let m_key = buffer_key("exp_avg", name);
            let v_key = buffer_key("exp_avg_sq", name);
            let mut m = self
                .buffers
                .remove(&m_key)
                .unwrap_or_else(|| vec![0.0; param.len()]);
            let mut v = self
                .buffers
                .remove(&v_key)
                .unwrap_or_else(|| vec![0.0; param.len()]);

            for i in 0..param.len() {
                let g = f64::from(grad[i]);
                let mi = beta1 * f64::from(m[i]) + (1.0 - beta1) * g;
                let vi = beta2 * f64::from(v[i]) + (1.0 - beta2) * g * g;
                m[i] = mi as f32;
                v[i] = vi as f32;

                let m_hat = mi / correction1;
                let v_hat = vi / correction2;
                param[i] -= (self.lr * m_hat / (v_hat.sqrt() + self.eps)) as f32;
            }

            self.buffers.insert(m_key, m);
            self.buffers.insert(v_key, v);
        }
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn state(&self) -> OptimizerState {
        OptimizerState {
            kind: self.kind().to_string(),
            step: self.step,
            learning_rate: self.lr,
            buffers: self.buffers.clone(),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        validate_state(self.kind(), &["exp_avg", "exp_avg_sq"], &self.shapes, &state)?;
        self.step = state.step;
        self.lr = state.learning_rate;
        self.buffers = state.buffers;
        Ok(())
    }
}
