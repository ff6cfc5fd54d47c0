use std::fmt;

use rand::Rng;
use thiserror::Error;

use crate::matrix::{self, Matrix, MatrixError};

// exp(-z) overflows f64 past ~709; clamping well inside that leaves
// every representable sigmoid value unchanged.
const SIGMOID_CLAMP: f64 = 500.0;

#[derive(Debug, Error, PartialEq)]
pub enum NetworkError {
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error("{what} has length {actual}, expected {expected}")]
    IncompatibleDimensions {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{layer} layer size must be positive")]
    InvalidLayerSize { layer: &'static str },
    #[error("learning rate must be a finite positive number, got {0}")]
    InvalidLearningRate(f64),
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z.clamp(-SIGMOID_CLAMP, SIGMOID_CLAMP)).exp())
}

/// Derivative of the sigmoid written in terms of its output `y = σ(z)`.
pub fn sigmoid_derivative(y: &Matrix) -> Matrix {
    let ones = Matrix::from_element(y.nrows(), y.ncols(), 1.0);
    // same shape by construction
    y.component_mul(&(ones - y))
}

/// Sum of squared differences between a target and a prediction column.
pub fn squared_error(target: &Matrix, output: &Matrix) -> Result<f64, MatrixError> {
    Ok(matrix::subtract(target, output)?.map(|e| e * e).sum())
}

fn activate(m: &Matrix) -> Matrix {
    matrix::apply(|_, _, z| sigmoid(z), m)
}

fn uniform_weights<R: Rng>(rng: &mut R, rows: usize, fan_in: usize) -> Matrix {
    let bound = 1.0 / (fan_in as f64).sqrt();
    Matrix::from_fn(rows, fan_in, |_, _| rng.random_range(-bound..=bound))
}

/// Single hidden layer feedforward network with sigmoid units.
#[derive(Debug, Clone)]
pub struct Network {
    input_size: usize,
    hidden_size: usize,
    output_size: usize,
    hidden_weights: Matrix,
    output_weights: Matrix,
    learning_rate: f64,
}

struct ForwardPass {
    hidden: Matrix,
    output: Matrix,
}

impl Network {
    pub const DEFAULT_LEARNING_RATE: f64 = 0.1;

    pub fn new(
        input_size: usize,
        hidden_size: usize,
        output_size: usize,
        learning_rate: f64,
    ) -> Result<Self, NetworkError> {
        Self::with_rng(input_size, hidden_size, output_size, learning_rate, &mut rand::rng())
    }

    /// Like [`Network::new`], drawing initial weights from `rng`.
    ///
    /// Each weight is uniform over `[-1/sqrt(n), 1/sqrt(n)]` with `n` the
    /// fan-in of its layer.
    pub fn with_rng<R: Rng>(
        input_size: usize,
        hidden_size: usize,
        output_size: usize,
        learning_rate: f64,
        rng: &mut R,
    ) -> Result<Self, NetworkError> {
        Self::check_sizes(input_size, hidden_size, output_size, learning_rate)?;
        Ok(Self {
            input_size,
            hidden_size,
            output_size,
            hidden_weights: uniform_weights(rng, hidden_size, input_size),
            output_weights: uniform_weights(rng, output_size, hidden_size),
            learning_rate,
        })
    }

    /// Builds a network around existing weights. Layer sizes are taken from
    /// the matrix shapes: `hidden_weights` is `hidden x input`,
    /// `output_weights` is `output x hidden`.
    pub fn from_weights(
        hidden_weights: Matrix,
        output_weights: Matrix,
        learning_rate: f64,
    ) -> Result<Self, NetworkError> {
        let (hidden_size, input_size) = hidden_weights.shape();
        let (output_size, output_fan_in) = output_weights.shape();
        Self::check_sizes(input_size, hidden_size, output_size, learning_rate)?;
        if output_fan_in != hidden_size {
            return Err(MatrixError::IncompatibleDimensions {
                left: output_weights.shape(),
                right: hidden_weights.shape(),
            }
            .into());
        }
        Ok(Self {
            input_size,
            hidden_size,
            output_size,
            hidden_weights,
            output_weights,
            learning_rate,
        })
    }

    fn check_sizes(
        input_size: usize,
        hidden_size: usize,
        output_size: usize,
        learning_rate: f64,
    ) -> Result<(), NetworkError> {
        for (layer, size) in [("input", input_size), ("hidden", hidden_size), ("output", output_size)] {
            if size == 0 {
                return Err(NetworkError::InvalidLayerSize { layer });
            }
        }
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(NetworkError::InvalidLearningRate(learning_rate));
        }
        Ok(())
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
    pub fn output_size(&self) -> usize {
        self.output_size
    }
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
    pub fn hidden_weights(&self) -> &Matrix {
        &self.hidden_weights
    }
    pub fn output_weights(&self) -> &Matrix {
        &self.output_weights
    }

    /// Replaces the hidden weights; the new matrix must keep the current shape.
    pub fn set_hidden_weights(&mut self, weights: Matrix) -> Result<(), NetworkError> {
        Self::check_replacement(&self.hidden_weights, &weights)?;
        self.hidden_weights = weights;
        Ok(())
    }

    /// Replaces the output weights; the new matrix must keep the current shape.
    pub fn set_output_weights(&mut self, weights: Matrix) -> Result<(), NetworkError> {
        Self::check_replacement(&self.output_weights, &weights)?;
        self.output_weights = weights;
        Ok(())
    }

    fn check_replacement(current: &Matrix, new: &Matrix) -> Result<(), MatrixError> {
        if current.shape() != new.shape() {
            return Err(MatrixError::ShapeMismatch { left: current.shape(), right: new.shape() });
        }
        Ok(())
    }

    fn column(data: &[f64], expected: usize, what: &'static str) -> Result<Matrix, NetworkError> {
        if data.len() != expected {
            return Err(NetworkError::IncompatibleDimensions { what, expected, actual: data.len() });
        }
        Ok(Matrix::from_column_slice(data.len(), 1, data))
    }

    fn forward(&self, input: &Matrix) -> Result<ForwardPass, NetworkError> {
        let hidden = activate(&matrix::dot(&self.hidden_weights, input)?);
        let output = activate(&matrix::dot(&self.output_weights, &hidden)?);
        Ok(ForwardPass { hidden, output })
    }

    /// Forward pass. Returns an `output_size x 1` column of activations.
    pub fn predict(&self, input: &[f64]) -> Result<Matrix, NetworkError> {
        let input = Self::column(input, self.input_size, "input vector")?;
        Ok(self.forward(&input)?.output)
    }

    /// One step of stochastic gradient descent on a single sample.
    ///
    /// Both gradients are computed from the weights as they were on entry,
    /// and nothing is written back unless every step succeeds.
    pub fn train(&mut self, input: &[f64], target: &[f64]) -> Result<(), NetworkError> {
        let input = Self::column(input, self.input_size, "input vector")?;
        let target = Self::column(target, self.output_size, "target vector")?;
        let ForwardPass { hidden, output } = self.forward(&input)?;

        let output_error = matrix::subtract(&target, &output)?;
        let hidden_error = matrix::dot(&matrix::transpose(&self.output_weights), &output_error)?;

        let output_delta = matrix::multiply_elementwise(&output_error, &sigmoid_derivative(&output))?;
        let output_gradient = matrix::dot(&output_delta, &matrix::transpose(&hidden))?;
        let output_weights = matrix::add(
            &self.output_weights,
            &matrix::scale(&output_gradient, self.learning_rate),
        )?;

        let hidden_delta = matrix::multiply_elementwise(&hidden_error, &sigmoid_derivative(&hidden))?;
        let hidden_gradient = matrix::dot(&hidden_delta, &matrix::transpose(&input))?;
        let hidden_weights = matrix::add(
            &self.hidden_weights,
            &matrix::scale(&hidden_gradient, self.learning_rate),
        )?;

        self.output_weights = output_weights;
        self.hidden_weights = hidden_weights;
        Ok(())
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of input nodes: {}", self.input_size)?;
        writeln!(f, "Number of hidden nodes: {}", self.hidden_size)?;
        writeln!(f, "Number of output nodes: {}", self.output_size)?;
        writeln!(f, "Learning rate: {}", self.learning_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeded(input: usize, hidden: usize, output: usize) -> Network {
        let mut rng = StdRng::seed_from_u64(42);
        Network::with_rng(input, hidden, output, 0.1, &mut rng).unwrap()
    }

    #[test]
    fn weights_are_bounded_by_fan_in() {
        let network = seeded(784, 100, 10);
        assert_eq!(network.hidden_weights().shape(), (100, 784));
        assert_eq!(network.output_weights().shape(), (10, 100));

        let hidden_bound = 1.0 / 784f64.sqrt();
        let output_bound = 1.0 / 100f64.sqrt();
        assert!(network.hidden_weights().iter().all(|w| w.abs() <= hidden_bound));
        assert!(network.output_weights().iter().all(|w| w.abs() <= output_bound));
        // not degenerate
        assert!(network.hidden_weights().iter().any(|w| *w != 0.0));
    }

    #[test]
    fn same_seed_same_weights() {
        assert_eq!(seeded(5, 4, 3).hidden_weights(), seeded(5, 4, 3).hidden_weights());
    }

    #[test]
    fn rejects_empty_layers_and_bad_rates() {
        assert_eq!(
            Network::new(0, 4, 2, 0.1).unwrap_err(),
            NetworkError::InvalidLayerSize { layer: "input" }
        );
        assert_eq!(
            Network::new(3, 0, 2, 0.1).unwrap_err(),
            NetworkError::InvalidLayerSize { layer: "hidden" }
        );
        assert_eq!(
            Network::new(3, 4, 0, 0.1).unwrap_err(),
            NetworkError::InvalidLayerSize { layer: "output" }
        );
        assert!(matches!(
            Network::new(3, 4, 2, -0.5),
            Err(NetworkError::InvalidLearningRate(_))
        ));
        assert!(Network::new(3, 4, 2, f64::NAN).is_err());
    }

    #[test]
    fn predict_returns_sigmoid_range_column() {
        let network = seeded(3, 4, 2);
        for input in [[0.0, 0.0, 0.0], [0.01, 0.5, 0.99], [-3.0, 7.0, 100.0]] {
            let output = network.predict(&input).unwrap();
            assert_eq!(output.shape(), (2, 1));
            assert!(output.iter().all(|y| *y > 0.0 && *y < 1.0));
        }
    }

    #[test]
    fn predict_rejects_wrong_input_length() {
        let network = seeded(3, 4, 2);
        assert_eq!(
            network.predict(&[0.5, 0.5]).unwrap_err(),
            NetworkError::IncompatibleDimensions { what: "input vector", expected: 3, actual: 2 }
        );
    }

    #[test]
    fn sigmoid_is_finite_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(-1e6) >= 0.0 && sigmoid(-1e6).is_finite());
        assert!(sigmoid(1e6) <= 1.0);
        assert_abs_diff_eq!(sigmoid(2.0), 1.0 / (1.0 + (-2.0f64).exp()), epsilon = 1e-15);
    }

    #[test]
    fn sigmoid_derivative_stays_within_quarter() {
        let mut rng = StdRng::seed_from_u64(3);
        let raw = Matrix::from_fn(6, 5, |_, _| rng.random_range(-20.0..20.0));
        let derivative = sigmoid_derivative(&activate(&raw));
        assert!(derivative.iter().all(|d| (0.0..=0.25).contains(d)));

        let peak = sigmoid_derivative(&activate(&Matrix::zeros(1, 1)));
        assert_eq!(peak[(0, 0)], 0.25);
    }

    #[test]
    fn one_training_step_reduces_error() {
        let mut network = seeded(3, 4, 2);
        let input = [0.9, 0.1, 0.5];
        let target = Matrix::from_column_slice(2, 1, &[0.99, 0.01]);

        let before = squared_error(&target, &network.predict(&input).unwrap()).unwrap();
        network.train(&input, target.as_slice()).unwrap();
        let after = squared_error(&target, &network.predict(&input).unwrap()).unwrap();
        assert!(after < before, "error went from {before} to {after}");
    }

    #[test]
    fn training_matches_hand_computed_update() {
        let hidden_weights = Matrix::from_row_slice(2, 3, &[0.1, -0.2, 0.3, -0.4, 0.5, 0.6]);
        let output_weights = Matrix::from_row_slice(2, 2, &[0.7, -0.8, 0.9, 0.25]);
        let mut network =
            Network::from_weights(hidden_weights.clone(), output_weights.clone(), 0.1).unwrap();

        let x = [0.2, 0.4, 0.6];
        let t = [0.99, 0.01];
        network.train(&x, &t).unwrap();

        // independent scalar evaluation of the update rule
        let s = |z: f64| 1.0 / (1.0 + (-z).exp());
        let h: Vec<f64> = (0..2)
            .map(|j| s((0..3).map(|i| hidden_weights[(j, i)] * x[i]).sum()))
            .collect();
        let o: Vec<f64> = (0..2)
            .map(|k| s((0..2).map(|j| output_weights[(k, j)] * h[j]).sum()))
            .collect();
        let e_o: Vec<f64> = (0..2).map(|k| t[k] - o[k]).collect();
        let e_h: Vec<f64> = (0..2)
            .map(|j| (0..2).map(|k| output_weights[(k, j)] * e_o[k]).sum())
            .collect();

        let expected_output = Matrix::from_fn(2, 2, |k, j| {
            output_weights[(k, j)] + 0.1 * e_o[k] * o[k] * (1.0 - o[k]) * h[j]
        });
        let expected_hidden = Matrix::from_fn(2, 3, |j, i| {
            hidden_weights[(j, i)] + 0.1 * e_h[j] * h[j] * (1.0 - h[j]) * x[i]
        });

        assert_abs_diff_eq!(*network.output_weights(), expected_output, epsilon = 1e-9);
        assert_abs_diff_eq!(*network.hidden_weights(), expected_hidden, epsilon = 1e-9);
    }

    #[test]
    fn failed_training_leaves_weights_untouched() {
        let mut network = seeded(3, 4, 2);
        let hidden = network.hidden_weights().clone();
        let output = network.output_weights().clone();

        let err = network.train(&[0.1, 0.2, 0.3], &[0.99, 0.01, 0.01]).unwrap_err();
        assert_eq!(
            err,
            NetworkError::IncompatibleDimensions { what: "target vector", expected: 2, actual: 3 }
        );
        assert!(network.train(&[0.1], &[0.99, 0.01]).is_err());
        assert_eq!(*network.hidden_weights(), hidden);
        assert_eq!(*network.output_weights(), output);
    }

    #[test]
    fn from_weights_requires_chained_shapes() {
        let err = Network::from_weights(Matrix::zeros(4, 3), Matrix::zeros(2, 5), 0.1).unwrap_err();
        assert!(matches!(err, NetworkError::Matrix(MatrixError::IncompatibleDimensions { .. })));
    }

    #[test]
    fn setters_keep_shape() {
        let mut network = seeded(3, 4, 2);
        assert!(network.set_output_weights(Matrix::zeros(4, 2)).is_err());
        network.set_output_weights(Matrix::zeros(2, 4)).unwrap();
        let output = network.predict(&[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(output, Matrix::from_element(2, 1, 0.5));
    }

    #[test]
    fn display_lists_layer_sizes() {
        let text = seeded(3, 4, 2).to_string();
        assert!(text.contains("input nodes: 3"));
        assert!(text.contains("hidden nodes: 4"));
        assert!(text.contains("Learning rate: 0.1"));
    }
}
