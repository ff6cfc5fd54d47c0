pub mod config;
pub mod digits;
pub mod logging;
pub mod matrix;
pub mod network;
pub mod persist;

pub use matrix::{Matrix, MatrixError};
pub use network::{Network, NetworkError};
