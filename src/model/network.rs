//! Concat combiner network
//!
//! Encoded input blocks arrive already concatenated. They pass through
//! `num_fc_layers` fully connected layers and then feed one dense head per
//! output feature.

use crate::config::{Activation, CombinerConfig};
use crate::error::{FeatureflowError, Result};
use crate::preprocessing::{FittedOutput, HeadKind};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const EPS: f64 = 1e-12;

/// Weights and bias of one fully connected layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl DenseLayer {
    /// Xavier/Glorot uniform initialization
    fn init(n_in: usize, n_out: usize, rng: &mut Xoshiro256PlusPlus) -> Self {
        let scale = (6.0 / (n_in + n_out).max(1) as f64).sqrt();
        let weights = Array2::from_shape_fn((n_in, n_out), |_| rng.gen::<f64>() * 2.0 * scale - scale);
        Self {
            weights,
            bias: Array1::zeros(n_out),
        }
    }

    fn zeros_like(&self) -> Self {
        Self {
            weights: Array2::zeros(self.weights.raw_dim()),
            bias: Array1::zeros(self.bias.len()),
        }
    }

    fn forward(&self, x: &ArrayView2<'_, f64>) -> Array2<f64> {
        x.dot(&self.weights) + &self.bias
    }
}

/// Dense projection feeding one output feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputHead {
    pub name: String,
    pub kind: HeadKind,
    pub loss_weight: f64,
    pub layer: DenseLayer,
}

/// Fully connected stack plus per-output heads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinerNetwork {
    input_width: usize,
    activation: Activation,
    layers: Vec<DenseLayer>,
    heads: Vec<OutputHead>,
}

/// Parameter-shaped buffer used for gradients and momentum
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub layers: Vec<DenseLayer>,
    pub heads: Vec<DenseLayer>,
    /// Summed loss of the rows the gradients were computed on
    pub loss: f64,
    pub rows: usize,
}

impl Gradients {
    pub fn zeros(network: &CombinerNetwork) -> Self {
        Self {
            layers: network.layers.iter().map(DenseLayer::zeros_like).collect(),
            heads: network.heads.iter().map(|h| h.layer.zeros_like()).collect(),
            loss: 0.0,
            rows: 0,
        }
    }

    /// Accumulate another shard's sums into this one
    pub fn add(&mut self, other: &Gradients) {
        for (a, b) in self.params_mut().zip(other.params()) {
            a.weights += &b.weights;
            a.bias += &b.bias;
        }
        self.loss += other.loss;
        self.rows += other.rows;
    }

    pub fn scale(&mut self, factor: f64) {
        for p in self.params_mut() {
            p.weights *= factor;
            p.bias *= factor;
        }
    }

    fn params(&self) -> impl Iterator<Item = &DenseLayer> {
        self.layers.iter().chain(self.heads.iter())
    }

    fn params_mut(&mut self) -> impl Iterator<Item = &mut DenseLayer> {
        self.layers.iter_mut().chain(self.heads.iter_mut())
    }
}

struct ForwardPass {
    /// Input to each fc layer, plus the final hidden representation
    activations: Vec<Array2<f64>>,
    /// Pre-activation of each fc layer
    pre: Vec<Array2<f64>>,
    /// Activated head outputs
    heads: Vec<Array2<f64>>,
}

impl CombinerNetwork {
    pub fn new(input_width: usize, combiner: &CombinerConfig, outputs: &[FittedOutput], seed: u64) -> Result<Self> {
        if input_width == 0 {
            return Err(FeatureflowError::InvalidConfig(
                "encoded inputs have zero width".to_string(),
            ));
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

        let mut layers = Vec::with_capacity(combiner.num_fc_layers);
        let mut width = input_width;
        for _ in 0..combiner.num_fc_layers {
            layers.push(DenseLayer::init(width, combiner.fc_size, &mut rng));
            width = combiner.fc_size;
        }

        let heads = outputs
            .iter()
            .map(|output| OutputHead {
                name: output.name.clone(),
                kind: output.head(),
                loss_weight: output.loss_weight,
                layer: DenseLayer::init(width, output.width(), &mut rng),
            })
            .collect();

        Ok(Self {
            input_width,
            activation: combiner.activation,
            layers,
            heads,
        })
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn heads(&self) -> &[OutputHead] {
        &self.heads
    }

    fn check_width(&self, x: &ArrayView2<'_, f64>) -> Result<()> {
        if x.ncols() != self.input_width {
            return Err(FeatureflowError::ShapeError {
                expected: format!("{} input columns", self.input_width),
                actual: format!("{} input columns", x.ncols()),
            });
        }
        Ok(())
    }

    fn forward(&self, x: ArrayView2<'_, f64>) -> ForwardPass {
        let mut activations = vec![x.to_owned()];
        let mut pre = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let z = layer.forward(&activations[activations.len() - 1].view());
            activations.push(activate(&z, self.activation));
            pre.push(z);
        }
        let hidden = activations[activations.len() - 1].view();
        let heads = self
            .heads
            .iter()
            .map(|head| head_output(&head.layer.forward(&hidden), head.kind))
            .collect();
        ForwardPass {
            activations,
            pre,
            heads,
        }
    }

    /// Activated head outputs: class probabilities, sigmoid probabilities or values
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Vec<Array2<f64>>> {
        self.check_width(&x)?;
        Ok(self.forward(x).heads)
    }

    /// Weighted loss summed over rows
    pub fn loss(&self, x: ArrayView2<'_, f64>, targets: &[ArrayView2<'_, f64>]) -> Result<f64> {
        Ok(self.evaluate(x, targets)?.0)
    }

    /// Summed loss together with the head outputs it was computed from
    pub fn evaluate(
        &self,
        x: ArrayView2<'_, f64>,
        targets: &[ArrayView2<'_, f64>],
    ) -> Result<(f64, Vec<Array2<f64>>)> {
        self.check_width(&x)?;
        let heads = self.forward(x).heads;
        let loss = self
            .heads
            .iter()
            .zip(heads.iter().zip(targets))
            .map(|(head, (out, t))| head.loss_weight * head_loss(out, t, head.kind))
            .sum();
        Ok((loss, heads))
    }

    /// Loss and parameter gradients summed (not averaged) over the rows of `x`
    pub fn gradients(&self, x: ArrayView2<'_, f64>, targets: &[ArrayView2<'_, f64>]) -> Result<Gradients> {
        self.check_width(&x)?;
        if targets.len() != self.heads.len() {
            return Err(FeatureflowError::ShapeError {
                expected: format!("{} target blocks", self.heads.len()),
                actual: format!("{} target blocks", targets.len()),
            });
        }
        let rows = x.nrows();
        let pass = self.forward(x);
        let hidden = &pass.activations[pass.activations.len() - 1];

        let mut loss = 0.0;
        let mut head_grads = Vec::with_capacity(self.heads.len());
        let mut delta = Array2::<f64>::zeros(hidden.raw_dim());
        for ((head, out), t) in self.heads.iter().zip(&pass.heads).zip(targets) {
            loss += head.loss_weight * head_loss(out, t, head.kind);
            // every head pairs its activation with a loss whose gradient wrt
            // the pre-activation is (output - target)
            let mut dz = out - t;
            if head.kind == HeadKind::Linear {
                dz *= 2.0;
            }
            dz *= head.loss_weight;
            head_grads.push(DenseLayer {
                weights: hidden.t().dot(&dz),
                bias: dz.sum_axis(Axis(0)),
            });
            delta += &dz.dot(&head.layer.weights.t());
        }

        let mut layer_grads = Vec::with_capacity(self.layers.len());
        for i in (0..self.layers.len()).rev() {
            let dz = delta * activate_derivative(&pass.pre[i], self.activation);
            layer_grads.push(DenseLayer {
                weights: pass.activations[i].t().dot(&dz),
                bias: dz.sum_axis(Axis(0)),
            });
            delta = dz.dot(&self.layers[i].weights.t());
        }
        layer_grads.reverse();

        Ok(Gradients {
            layers: layer_grads,
            heads: head_grads,
            loss,
            rows,
        })
    }

    /// One momentum SGD step with L2 penalty on weights
    pub fn apply(
        &mut self,
        grads: &Gradients,
        velocity: &mut Gradients,
        learning_rate: f64,
        momentum: f64,
        l2: f64,
    ) {
        let params = self
            .layers
            .iter_mut()
            .chain(self.heads.iter_mut().map(|h| &mut h.layer));
        for ((param, grad), vel) in params.zip(grads.params()).zip(velocity.params_mut()) {
            let grad_w = &grad.weights + &(&param.weights * l2);
            vel.weights = &vel.weights * momentum - &grad_w * learning_rate;
            vel.bias = &vel.bias * momentum - &grad.bias * learning_rate;
            param.weights += &vel.weights;
            param.bias += &vel.bias;
        }
    }

    pub fn is_finite(&self) -> bool {
        self.layers
            .iter()
            .chain(self.heads.iter().map(|h| &h.layer))
            .all(|l| l.weights.iter().chain(l.bias.iter()).all(|v| v.is_finite()))
    }

    /// Every parameter tensor by name; biases are single-row matrices
    pub fn weights(&self) -> BTreeMap<String, Array2<f64>> {
        let mut out = BTreeMap::new();
        let named = self
            .layers
            .iter()
            .enumerate()
            .map(|(i, l)| (format!("combiner/fc_{i}"), l))
            .chain(self.heads.iter().map(|h| (format!("{}/head", h.name), &h.layer)));
        for (prefix, layer) in named {
            out.insert(format!("{prefix}/weights"), layer.weights.clone());
            out.insert(format!("{prefix}/bias"), layer.bias.clone().insert_axis(Axis(0)));
        }
        out
    }
}

fn activate(z: &Array2<f64>, activation: Activation) -> Array2<f64> {
    match activation {
        Activation::Relu => z.mapv(|v| v.max(0.0)),
        Activation::Sigmoid => z.mapv(sigmoid),
        Activation::Tanh => z.mapv(f64::tanh),
        Activation::Linear => z.clone(),
    }
}

fn activate_derivative(z: &Array2<f64>, activation: Activation) -> Array2<f64> {
    match activation {
        Activation::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
        Activation::Sigmoid => z.mapv(|v| {
            let s = sigmoid(v);
            s * (1.0 - s)
        }),
        Activation::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
        Activation::Linear => Array2::ones(z.raw_dim()),
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

fn head_output(z: &Array2<f64>, kind: HeadKind) -> Array2<f64> {
    match kind {
        HeadKind::Softmax => {
            let mut out = z.clone();
            for mut row in out.rows_mut() {
                let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                row.mapv_inplace(|v| (v - max).exp());
                let sum = row.sum();
                row.mapv_inplace(|v| v / sum);
            }
            out
        }
        HeadKind::Sigmoid => z.mapv(sigmoid),
        HeadKind::Linear => z.clone(),
    }
}

fn head_loss(out: &Array2<f64>, t: &ArrayView2<'_, f64>, kind: HeadKind) -> f64 {
    match kind {
        HeadKind::Softmax => -out
            .iter()
            .zip(t.iter())
            .map(|(p, t)| t * p.max(EPS).ln())
            .sum::<f64>(),
        HeadKind::Sigmoid => -out
            .iter()
            .zip(t.iter())
            .map(|(p, t)| t * p.max(EPS).ln() + (1.0 - t) * (1.0 - p).max(EPS).ln())
            .sum::<f64>(),
        HeadKind::Linear => out.iter().zip(t.iter()).map(|(p, t)| (p - t).powi(2)).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSpec;
    use ndarray::array;
    use polars::prelude::*;

    fn category_output() -> FittedOutput {
        let df = df!("y" => &["a", "b"]).unwrap();
        FittedOutput::fit(&FeatureSpec::category("y"), &df).unwrap()
    }

    fn numerical_output() -> FittedOutput {
        let df = df!("z" => &[1.0, 3.0]).unwrap();
        FittedOutput::fit(&FeatureSpec::numerical("z"), &df).unwrap()
    }

    fn network(layers: usize) -> CombinerNetwork {
        let combiner = CombinerConfig::concat(4)
            .with_num_fc_layers(layers)
            .with_activation(Activation::Tanh);
        CombinerNetwork::new(2, &combiner, &[category_output(), numerical_output()], 7).unwrap()
    }

    fn batch() -> (Array2<f64>, Vec<Array2<f64>>) {
        let x = array![[0.5, -1.0], [1.5, 0.25], [-0.3, 0.8]];
        let y = array![[0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]];
        let z = array![[0.2], [-1.0], [0.7]];
        (x, vec![y, z])
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let (x, _) = batch();
        let out = network(1).predict(x.view()).unwrap();
        for row in out[0].rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert_eq!(out[1].ncols(), 1);
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let (x, targets) = batch();
        let views: Vec<_> = targets.iter().map(|t| t.view()).collect();
        let net = network(1);
        let grads = net.gradients(x.view(), &views).unwrap();

        let h = 1e-6;
        for (i, j) in [(0, 0), (1, 3)] {
            let mut plus = net.clone();
            plus.layers[0].weights[[i, j]] += h;
            let mut minus = net.clone();
            minus.layers[0].weights[[i, j]] -= h;
            let numeric = (plus.loss(x.view(), &views).unwrap() - minus.loss(x.view(), &views).unwrap()) / (2.0 * h);
            assert!((numeric - grads.layers[0].weights[[i, j]]).abs() < 1e-5);
        }

        let mut plus = net.clone();
        plus.heads[1].layer.bias[0] += h;
        let mut minus = net.clone();
        minus.heads[1].layer.bias[0] -= h;
        let numeric = (plus.loss(x.view(), &views).unwrap() - minus.loss(x.view(), &views).unwrap()) / (2.0 * h);
        assert!((numeric - grads.heads[1].bias[0]).abs() < 1e-5);
    }

    #[test]
    fn test_sharded_gradients_sum_to_full_batch() {
        let (x, targets) = batch();
        let views: Vec<_> = targets.iter().map(|t| t.view()).collect();
        let net = network(2);
        let full = net.gradients(x.view(), &views).unwrap();

        let shard = |r: std::ops::Range<usize>| {
            let t: Vec<_> = targets.iter().map(|t| t.slice(ndarray::s![r.clone(), ..])).collect();
            net.gradients(x.slice(ndarray::s![r, ..]), &t).unwrap()
        };
        let mut summed = shard(0..2);
        summed.add(&shard(2..3));

        assert_eq!(summed.rows, 3);
        assert!((summed.loss - full.loss).abs() < 1e-9);
        for (a, b) in summed.layers.iter().zip(&full.layers) {
            assert!((&a.weights - &b.weights).iter().all(|d| d.abs() < 1e-9));
        }
    }

    #[test]
    fn test_training_steps_reduce_loss() {
        let (x, targets) = batch();
        let views: Vec<_> = targets.iter().map(|t| t.view()).collect();
        let mut net = network(1);
        let before = net.loss(x.view(), &views).unwrap();
        let mut velocity = Gradients::zeros(&net);
        for _ in 0..50 {
            let mut grads = net.gradients(x.view(), &views).unwrap();
            grads.scale(1.0 / 3.0);
            net.apply(&grads, &mut velocity, 0.05, 0.9, 0.0);
        }
        assert!(net.loss(x.view(), &views).unwrap() < before);
        assert!(net.is_finite());
    }

    #[test]
    fn test_zero_layers_feeds_heads_directly() {
        let net = network(0);
        let weights = net.weights();
        assert!(weights.keys().all(|k| !k.starts_with("combiner")));
        assert_eq!(weights["y/head/weights"].dim(), (2, 3));
        assert_eq!(weights["y/head/bias"].dim(), (1, 3));
    }

    #[test]
    fn test_wrong_input_width() {
        let x = array![[1.0, 2.0, 3.0]];
        assert!(network(1).predict(x.view()).is_err());
    }
}
