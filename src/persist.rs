use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::matrix::Matrix;
use crate::network::{Network, NetworkError};

pub const HIDDEN_WEIGHTS_FILE: &str = "hweights.model";
pub const OUTPUT_WEIGHTS_FILE: &str = "oweights.model";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: stored matrix is {stored:?}, network expects {expected:?}")]
    ShapeMismatch {
        path: PathBuf,
        stored: (usize, usize),
        expected: (usize, usize),
    },
    #[error("{path}: unexpected data after {entries} entries")]
    TrailingData { path: PathBuf, entries: usize },
    #[error(transparent)]
    Network(#[from] NetworkError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PersistError + '_ {
    move |source| PersistError::Io { path: path.to_path_buf(), source }
}

/// Writes `rows`, `cols` as little-endian u64 followed by the entries,
/// row by row, as little-endian f64.
pub fn write_matrix<W: Write>(writer: &mut W, matrix: &Matrix) -> io::Result<()> {
    writer.write_all(&(matrix.nrows() as u64).to_le_bytes())?;
    writer.write_all(&(matrix.ncols() as u64).to_le_bytes())?;
    for row in matrix.row_iter() {
        for value in row.iter() {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buffer = [0u8; 8];
    reader.read_exact(&mut buffer)?;
    Ok(u64::from_le_bytes(buffer))
}

pub fn read_header<R: Read>(reader: &mut R) -> io::Result<(usize, usize)> {
    let rows = read_u64(reader)?;
    let cols = read_u64(reader)?;
    let too_large = || io::Error::new(io::ErrorKind::InvalidData, "matrix dimension overflows usize");
    Ok((
        usize::try_from(rows).map_err(|_| too_large())?,
        usize::try_from(cols).map_err(|_| too_large())?,
    ))
}

/// Reads the `rows * cols` entries that follow a header.
pub fn read_entries<R: Read>(reader: &mut R, rows: usize, cols: usize) -> io::Result<Matrix> {
    let mut data = Vec::with_capacity(rows * cols);
    let mut buffer = [0u8; 8];
    for _ in 0..rows * cols {
        reader.read_exact(&mut buffer)?;
        data.push(f64::from_le_bytes(buffer));
    }
    Ok(Matrix::from_row_slice(rows, cols, &data))
}

fn save_matrix(path: &Path, matrix: &Matrix) -> Result<(), PersistError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    write_matrix(&mut writer, matrix).map_err(io_error(path))?;
    writer.flush().map_err(io_error(path))?;
    debug!(path = %path.display(), shape = ?matrix.shape(), "wrote weights");
    Ok(())
}

fn load_matrix(path: &Path, expected: (usize, usize)) -> Result<Matrix, PersistError> {
    let file = File::open(path).map_err(io_error(path))?;
    let mut reader = BufReader::new(file);
    let stored = read_header(&mut reader).map_err(io_error(path))?;
    if stored != expected {
        return Err(PersistError::ShapeMismatch { path: path.to_path_buf(), stored, expected });
    }
    let matrix = read_entries(&mut reader, stored.0, stored.1).map_err(io_error(path))?;

    let mut probe = [0u8; 1];
    if reader.read(&mut probe).map_err(io_error(path))? != 0 {
        return Err(PersistError::TrailingData { path: path.to_path_buf(), entries: matrix.len() });
    }
    debug!(path = %path.display(), shape = ?stored, "read weights");
    Ok(matrix)
}

/// Saves both weight matrices into `dir`, one file each. Creates `dir` if needed.
pub fn save(network: &Network, dir: &Path) -> Result<(), PersistError> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;
    save_matrix(&dir.join(HIDDEN_WEIGHTS_FILE), network.hidden_weights())?;
    save_matrix(&dir.join(OUTPUT_WEIGHTS_FILE), network.output_weights())?;
    info!(dir = %dir.display(), "saved network weights");
    Ok(())
}

/// Loads weights saved by [`save`] into `network`. Both files are read and
/// checked against the network's layer sizes before either is installed.
pub fn load(network: &mut Network, dir: &Path) -> Result<(), PersistError> {
    let hidden = load_matrix(&dir.join(HIDDEN_WEIGHTS_FILE), network.hidden_weights().shape())?;
    let output = load_matrix(&dir.join(OUTPUT_WEIGHTS_FILE), network.output_weights().shape())?;
    network.set_hidden_weights(hidden)?;
    network.set_output_weights(output)?;
    info!(dir = %dir.display(), "loaded network weights");
    Ok(())
}
