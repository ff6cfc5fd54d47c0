use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use csv::{ReaderBuilder, StringRecord, Writer};
use image::GrayImage;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::matrix::Matrix;
use crate::network::{squared_error, Network, NetworkError};

pub const IMAGE_SIDE: usize = 28;
pub const INPUT_SIZE: usize = IMAGE_SIDE * IMAGE_SIDE;
pub const OUTPUT_SIZE: usize = 10;

const LOW: f64 = 0.01;
const HIGH: f64 = 0.99;

#[derive(Debug, Error)]
pub enum DigitsError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("record {record}: expected {expected} columns, found {found}")]
    ColumnCount {
        record: usize,
        expected: usize,
        found: usize,
    },
    #[error("record {record}: label {value:?} is not a digit below {classes}")]
    InvalidLabel {
        record: usize,
        value: String,
        classes: usize,
    },
    #[error("record {record}, column {column}: {value:?} is not a pixel intensity")]
    InvalidPixel {
        record: usize,
        column: usize,
        value: String,
    },
    #[error("dataset is empty")]
    EmptyDataset,
}

/// Maps a raw 0-255 intensity into `[0.01, 1.0]`.
pub fn normalize_pixel(pixel: u8) -> f64 {
    (pixel as f64 / 255.0) * HIGH + LOW
}

/// Like [`normalize_pixel`] for dark-on-light images, so ink maps high.
pub fn normalize_inverted_pixel(pixel: u8) -> f64 {
    ((255 - pixel) as f64 / 255.0) * HIGH + LOW
}

/// One-hot target using 0.01/0.99 so the sigmoid is never pushed to saturation.
pub fn one_hot(label: usize, classes: usize) -> Vec<f64> {
    let mut expected = vec![LOW; classes];
    expected[label] = HIGH;
    expected
}

/// Index of the largest output; the first one wins ties.
pub fn best_guess(output: &Matrix) -> usize {
    let mut best = 0;
    for (i, value) in output.iter().enumerate() {
        if *value > output[best] {
            best = i;
        }
    }
    best
}

pub struct Datapoint {
    pub label: usize,
    pub input: Vec<f64>,
    pub expected: Vec<f64>,
}

/// Labeled digits read from a `label,pixel,...` CSV corpus.
pub struct DigitData {
    digits: Vec<(usize, Vec<u8>)>,
    classes: usize,
}

impl DigitData {
    pub fn load_csv(path: &Path, pixels: usize, classes: usize) -> Result<Self, DigitsError> {
        let file = File::open(path).map_err(|source| DigitsError::Io { path: path.to_path_buf(), source })?;
        let data = Self::from_reader(file, pixels, classes)?;
        info!(path = %path.display(), records = data.len(), "loaded digits");
        Ok(data)
    }

    pub fn from_reader<R: io::Read>(reader: R, pixels: usize, classes: usize) -> Result<Self, DigitsError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut digits = vec![];
        for (i, record) in reader.records().enumerate() {
            digits.push(Self::parse_record(i + 1, &record?, pixels, classes)?);
        }
        Ok(Self { digits, classes })
    }

    fn parse_record(
        record_number: usize,
        record: &StringRecord,
        pixels: usize,
        classes: usize,
    ) -> Result<(usize, Vec<u8>), DigitsError> {
        if record.len() != pixels + 1 {
            return Err(DigitsError::ColumnCount {
                record: record_number,
                expected: pixels + 1,
                found: record.len(),
            });
        }

        let raw_label = record[0].trim();
        let label = raw_label
            .parse::<usize>()
            .ok()
            .filter(|label| *label < classes)
            .ok_or_else(|| DigitsError::InvalidLabel {
                record: record_number,
                value: raw_label.to_string(),
                classes,
            })?;

        let intensities = record
            .iter()
            .enumerate()
            .skip(1)
            .map(|(column, cell)| {
                cell.trim().parse::<u8>().map_err(|_| DigitsError::InvalidPixel {
                    record: record_number,
                    column,
                    value: cell.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((label, intensities))
    }

    pub fn len(&self) -> usize {
        self.digits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Datapoint> + '_ {
        self.digits.iter().map(|(label, pixels)| Datapoint {
            label: *label,
            input: pixels.iter().map(|p| normalize_pixel(*p)).collect(),
            expected: one_hot(*label, self.classes),
        })
    }
}

#[derive(Debug, Serialize)]
struct CostData {
    runs: usize,
    cost: f64,
}

fn progress_bar(len: usize, visible: bool, prefix: String) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template("{prefix} [{bar:50.cyan/blue}] {pos}/{len} ({percent}%) {eta}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar.set_prefix(prefix);
    bar
}

pub struct TrainOptions<'a> {
    pub epochs: usize,
    /// Writes `runs,cost` per sample, cost measured before that sample's update.
    pub cost_log: Option<&'a Path>,
    pub show_progress: bool,
}

/// Runs `epochs` passes over `data` in file order, one `train` call per record.
pub fn train(network: &mut Network, data: &DigitData, options: &TrainOptions) -> Result<(), DigitsError> {
    if data.is_empty() {
        return Err(DigitsError::EmptyDataset);
    }
    let started = Instant::now();
    let mut cost_log = options.cost_log.map(Writer::from_path).transpose()?;
    let mut runs = 0;

    for epoch in 1..=options.epochs {
        let bar = progress_bar(data.len(), options.show_progress, format!("Epoch {}/{}", epoch, options.epochs));
        for point in data.iter() {
            if let Some(writer) = cost_log.as_mut() {
                let expected = Matrix::from_column_slice(point.expected.len(), 1, &point.expected);
                let output = network.predict(&point.input)?;
                let cost = squared_error(&expected, &output).map_err(NetworkError::from)?;
                runs += 1;
                writer.serialize(CostData { runs, cost })?;
            }
            network.train(&point.input, &point.expected)?;
            bar.inc(1);
        }
        bar.finish_and_clear();
        info!(epoch, epochs = options.epochs, "finished epoch");
    }

    if let Some(mut writer) = cost_log {
        writer.flush().map_err(csv::Error::from)?;
    }
    info!(elapsed = ?started.elapsed(), "done training");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub correct: usize,
    pub total: usize,
}

impl Evaluation {
    /// Percentage of correctly classified records.
    pub fn accuracy(&self) -> f64 {
        self.correct as f64 / self.total as f64 * 100.0
    }
}

pub fn evaluate(network: &Network, data: &DigitData, show_progress: bool) -> Result<Evaluation, DigitsError> {
    if data.is_empty() {
        return Err(DigitsError::EmptyDataset);
    }
    let started = Instant::now();
    let bar = progress_bar(data.len(), show_progress, "Checking".to_string());
    let mut correct = 0;
    for point in data.iter() {
        let output = network.predict(&point.input)?;
        if best_guess(&output) == point.label {
            correct += 1;
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    let evaluation = Evaluation { correct, total: data.len() };
    info!(elapsed = ?started.elapsed(), correct, total = evaluation.total, "done checking");
    Ok(evaluation)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub digit: usize,
    pub confidences: Vec<f64>,
}

/// Row-major, inverted and normalized luma values of `image`.
pub fn image_input(image: &GrayImage) -> Vec<f64> {
    image.pixels().map(|p| normalize_inverted_pixel(p.0[0])).collect()
}

pub fn predict_image(network: &Network, path: &Path) -> Result<Prediction, DigitsError> {
    let image = image::open(path)?.to_luma8();
    predict_gray(network, &image)
}

pub fn predict_gray(network: &Network, image: &GrayImage) -> Result<Prediction, DigitsError> {
    let output = network.predict(&image_input(image))?;
    Ok(Prediction {
        digit: best_guess(&output),
        confidences: output.iter().copied().collect(),
    })
}
