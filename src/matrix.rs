use nalgebra::DMatrix;
use thiserror::Error;

pub type Matrix = DMatrix<f64>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatrixError {
    #[error("matrices are not of the same shape: {left:?} and {right:?}")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("matrices are not dot compatible: {left:?} and {right:?}")]
    IncompatibleDimensions {
        left: (usize, usize),
        right: (usize, usize),
    },
}

fn check_same_shape(a: &Matrix, b: &Matrix) -> Result<(), MatrixError> {
    if a.shape() != b.shape() {
        return Err(MatrixError::ShapeMismatch { left: a.shape(), right: b.shape() });
    }
    Ok(())
}

pub fn add(a: &Matrix, b: &Matrix) -> Result<Matrix, MatrixError> {
    check_same_shape(a, b)?;
    Ok(a + b)
}

pub fn subtract(a: &Matrix, b: &Matrix) -> Result<Matrix, MatrixError> {
    check_same_shape(a, b)?;
    Ok(a - b)
}

/// Hadamard product.
pub fn multiply_elementwise(a: &Matrix, b: &Matrix) -> Result<Matrix, MatrixError> {
    check_same_shape(a, b)?;
    Ok(a.component_mul(b))
}

pub fn scale(a: &Matrix, f: f64) -> Matrix {
    a.map(|v| v * f)
}

pub fn add_scalar(a: &Matrix, f: f64) -> Matrix {
    a.add_scalar(f)
}

/// Maps `f(row, col, value)` over every entry.
pub fn apply<F>(f: F, a: &Matrix) -> Matrix
where
    F: Fn(usize, usize, f64) -> f64,
{
    Matrix::from_fn(a.nrows(), a.ncols(), |r, c| f(r, c, a[(r, c)]))
}

/// Standard matrix product, `a.rows x b.cols`.
pub fn dot(a: &Matrix, b: &Matrix) -> Result<Matrix, MatrixError> {
    if a.ncols() != b.nrows() {
        return Err(MatrixError::IncompatibleDimensions { left: a.shape(), right: b.shape() });
    }
    Ok(a * b)
}

pub fn transpose(a: &Matrix) -> Matrix {
    a.transpose()
}
