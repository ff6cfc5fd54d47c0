use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use digit_network::config::Settings;
use digit_network::digits::{self, DigitData, TrainOptions, INPUT_SIZE, OUTPUT_SIZE};
use digit_network::{logging, persist, Network};

#[derive(Parser)]
#[command(about = "Train and run a handwritten digit classifier")]
struct Cli {
    #[command(flatten)]
    common: Common,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Common {
    /// Learning rate of the network [default: 0.1]
    #[arg(long, global = true)]
    rate: Option<f64>,
    /// Number of hidden nodes [default: 200]
    #[arg(long, global = true)]
    hidden: Option<usize>,
    /// Directory holding the weight files
    #[arg(long, global = true, value_name = "DIR", default_value = "./saves")]
    saves: PathBuf,
    /// JSON file with default settings; command line values take precedence
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Train on a CSV corpus and save the weights
    Train {
        #[arg(long, value_name = "PATH", default_value = "data/mnist_train.csv")]
        data: PathBuf,
        /// [default: 5]
        #[arg(short, long)]
        epochs: Option<usize>,
        /// Write the per-sample cost as CSV
        #[arg(long, value_name = "PATH")]
        cost_log: Option<PathBuf>,
        /// Seed for the initial weights
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Report accuracy over a labeled CSV corpus
    PredictBatch {
        #[arg(long, value_name = "PATH", default_value = "data/mnist_test.csv")]
        data: PathBuf,
    },
    /// Classify a single PNG image
    Predict {
        #[arg(long, value_name = "PATH", default_value = "data/nums/0.png")]
        image: PathBuf,
    },
}

fn settings(cli: &Cli) -> Result<Settings, Box<dyn Error>> {
    let file = match &cli.common.config {
        Some(path) => Settings::load_json(path)?,
        None => Settings::default(),
    };
    let (epochs, seed) = match &cli.command {
        Command::Train { epochs, seed, .. } => (*epochs, *seed),
        _ => (None, None),
    };
    Ok(file.merge(Settings {
        learning_rate: cli.common.rate,
        hidden_size: cli.common.hidden,
        epochs,
        seed,
    }))
}

fn build_network(settings: &Settings) -> Result<Network, Box<dyn Error>> {
    let (hidden, rate) = (settings.hidden_size(), settings.learning_rate());
    let network = match settings.seed {
        Some(seed) => Network::with_rng(INPUT_SIZE, hidden, OUTPUT_SIZE, rate, &mut StdRng::seed_from_u64(seed))?,
        None => Network::new(INPUT_SIZE, hidden, OUTPUT_SIZE, rate)?,
    };
    Ok(network)
}

fn load_network(settings: &Settings, saves: &Path) -> Result<Network, Box<dyn Error>> {
    let mut network = build_network(settings)?;
    persist::load(&mut network, saves)?;
    Ok(network)
}

fn main() -> Result<(), Box<dyn Error>> {
    logging::init_logging()?;
    let cli = Cli::parse();
    let settings = settings(&cli)?;

    match &cli.command {
        Command::Train { data, cost_log, .. } => {
            let mut network = build_network(&settings)?;
            info!("\n{}", network);
            let dataset = DigitData::load_csv(data, INPUT_SIZE, OUTPUT_SIZE)?;
            let options = TrainOptions {
                epochs: settings.epochs(),
                cost_log: cost_log.as_deref(),
                show_progress: true,
            };
            digits::train(&mut network, &dataset, &options)?;
            persist::save(&network, &cli.common.saves)?;
        }
        Command::PredictBatch { data } => {
            let network = load_network(&settings, &cli.common.saves)?;
            let dataset = DigitData::load_csv(data, INPUT_SIZE, OUTPUT_SIZE)?;
            let evaluation = digits::evaluate(&network, &dataset, true)?;
            println!("Score: {:.2}%", evaluation.accuracy());
        }
        Command::Predict { image } => {
            let network = load_network(&settings, &cli.common.saves)?;
            let prediction = digits::predict_image(&network, image)?;
            println!("Prediction: {}", prediction.digit);
            println!("Outputs:");
            for (digit, confidence) in prediction.confidences.iter().enumerate() {
                println!("{} => {:05.2} %", digit, confidence * 100.0);
            }
        }
    }
    Ok(())
}
