use std::{error::Error, path::PathBuf, process};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};

use vkaudio::{
    catalog::{self, FileCatalog},
    config::Config,
    pipeline::Pipeline,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when built in release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Track list
    ///
    /// JSON file with either an array of `{artist, title, url}` tracks or an
    /// array of `{audios, next_from}` pages.
    #[arg(value_name = "CATALOG", value_hint = ValueHint::FilePath)]
    catalog: PathBuf,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "VKAUDIO_CONFIG")]
    config: Option<PathBuf>,

    /// Output directory
    ///
    /// [default: "output", or as set in the configuration file]
    #[arg(short, long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    output_dir: Option<PathBuf>,

    /// Encoder program
    ///
    /// Replaces the program, not its arguments.
    #[arg(short, long, value_name = "PROGRAM", value_hint = ValueHint::CommandName)]
    encoder: Option<PathBuf>,

    /// Write the numbered track list to this file before downloading
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    dump: Option<PathBuf>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Builds the configuration from defaults, file and arguments, in that order.
fn load_config(args: &Args) -> Result<Config, Box<dyn Error>> {
    let mut config = match args.config {
        Some(ref path) => {
            debug!("loading configuration from {}", path.display());
            Config::from_file(path)?
        }
        None => Config::new(),
    };

    if let Some(ref output_dir) = args.output_dir {
        config.output_dir.clone_from(output_dir);
    }

    if let Some(ref encoder) = args.encoder {
        config.encoder.program.clone_from(encoder);
    }

    Ok(config)
}

/// Main application flow.
///
/// # Errors
///
/// Returns an error when the configuration or the track list cannot be
/// loaded, or the output directory cannot be created. Failing tracks are not
/// errors.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args)?;

    let mut catalog = FileCatalog::from_file(&args.catalog)?;
    let tracks = catalog::fetch_all(&mut catalog).await?;

    if let Some(ref dump) = args.dump {
        catalog::write_listing(dump, &tracks)?;
    }

    let pipeline = Pipeline::new(&config)?;
    info!(
        "downloading {} tracks to {}",
        tracks.len(),
        pipeline.output_dir().display()
    );

    let summary = pipeline.run(&tracks).await?;
    info!("{summary}");

    if let Some(ref dump) = args.dump {
        info!("dumped {} tracks to {}", tracks.len(), dump.display());
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the track list until done or interrupted.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();
    let lang = String::from("en");

    info!("starting {name}/{version}; {BUILD_PROFILE}; {lang}");

    // The run future is dropped when interrupted, which removes the files of
    // the current track.
    let interrupted = tokio::select! {
        // Prioritize shutdown signals.
        biased;

        _ = tokio::signal::ctrl_c() => true,

        result = run(args) => {
            if let Err(e) = result {
                error!("{e}");
                process::exit(1);
            }
            false
        }
    };

    if interrupted {
        warn!("interrupted, the current track was not saved");
        process::exit(130);
    }
}
