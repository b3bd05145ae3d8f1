// External crates
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

// Local modules
use gruprune::basecaller::step_6_model_loading::load_basecaller;
use gruprune::basecaller::CpuBackend;
use gruprune::checkpoint::{self, Architecture, Checkpoint, CheckpointMetadata, Selector};
use gruprune::config::{QuantScheme, ToolConfig};
use gruprune::models::ModelType;
use gruprune::util::fast5_reader::{for_each_read, list_reads, Hdf5Source};
use gruprune::util::inspect::{dump_values, summarize};
use gruprune::util::prune::{prune, PruneMode, PruneRule};
use gruprune::util::quantize::quantize_dynamic;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(Parser)]
#[command(name = "gruprune", version, about = "Inspect, prune, quantize and evaluate GRU basecalling checkpoints")]
struct Cli {
    /// JSON configuration with prune rules, quantization selectors and temperature
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List parameters, or print one parameter's values one per line
    Inspect {
        checkpoint: PathBuf,
        /// Exact parameter name to dump
        #[arg(long)]
        param: Option<String>,
    },
    /// Zero small weights and write a new checkpoint
    Prune {
        checkpoint: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Parameter to prune instead of the configured rules
        #[arg(long)]
        param: Option<String>,
        /// Treat --param as a name fragment rather than an exact name
        #[arg(long)]
        contains: bool,
        #[arg(long, allow_hyphen_values = true, requires = "upper")]
        lower: Option<f32>,
        #[arg(long, allow_hyphen_values = true, requires = "lower")]
        upper: Option<f32>,
        /// Zero every weight with |w| below this value
        #[arg(long, conflicts_with_all = ["lower", "keep_above"])]
        magnitude: Option<f32>,
        /// Zero every weight not above this value
        #[arg(long, allow_hyphen_values = true, conflicts_with = "lower")]
        keep_above: Option<f32>,
        /// Also write the report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Convert linear-layer weights to int8 and write a new checkpoint
    Quantize {
        checkpoint: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Name fragments of the parameters to quantize (overrides the configuration)
        #[arg(long = "select")]
        selectors: Vec<String>,
        /// Use a fixed multiplier instead of a per-tensor scale
        #[arg(long)]
        fixed_factor: Option<f32>,
    },
    /// Print `read_id<TAB>file` for every read in every .fast5 file of a directory
    Reads { directory: PathBuf },
    /// Basecall every read in a directory of .fast5 files to FASTA on stdout
    Basecall {
        checkpoint: PathBuf,
        directory: PathBuf,
        #[arg(long)]
        temperature: Option<f32>,
    },
    /// Write a randomly initialised checkpoint with the basecaller layout
    Init {
        output: PathBuf,
        #[arg(long, default_value = "r941_native")]
        model: String,
        #[arg(long)]
        hidden_size: Option<usize>,
        #[arg(long)]
        conv_channels: Option<usize>,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// List the known model types
    Models,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = ToolConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Command::Inspect { checkpoint, param } => run_inspect(&checkpoint, param.as_deref()),
        Command::Prune {
            checkpoint,
            output,
            param,
            contains,
            lower,
            upper,
            magnitude,
            keep_above,
            report,
        } => {
            let rules = match param {
                Some(name) => {
                    let selector = if contains {
                        Selector::Contains(name)
                    } else {
                        Selector::Exact(name)
                    };
                    let mode = match (lower, upper, magnitude, keep_above) {
                        (Some(lower), Some(upper), None, None) => PruneMode::Band { lower, upper },
                        (None, None, Some(threshold), None) => PruneMode::Magnitude { threshold },
                        (None, None, None, Some(threshold)) => PruneMode::KeepAbove { threshold },
                        _ => bail!("--param needs exactly one of --lower/--upper, --magnitude or --keep-above"),
                    };
                    vec![PruneRule { selector, mode }]
                }
                None => config.prune.clone(),
            };
            run_prune(&checkpoint, &output, &rules, report.as_deref())
        }
        Command::Quantize {
            checkpoint,
            output,
            selectors,
            fixed_factor,
        } => {
            let mut quantize_config = config.quantize.clone();
            if !selectors.is_empty() {
                quantize_config.selectors = selectors.into_iter().map(Selector::Contains).collect();
            }
            if let Some(factor) = fixed_factor {
                quantize_config.scheme = QuantScheme::Fixed { factor };
            }
            let mut ckpt = checkpoint::load(&checkpoint)
                .with_context(|| format!("Failed to load {}", checkpoint.display()))?;
            let report = quantize_dynamic(&mut ckpt, &quantize_config)?;
            for entry in &report.entries {
                println!(
                    "{}\tscale={}\tmax_err={}",
                    entry.parameter, entry.scale, entry.max_abs_error
                );
            }
            println!(
                "{} -> {} bytes ({:.2}x)",
                report.bytes_before,
                report.bytes_after,
                report.compression_ratio()
            );
            checkpoint::save(&ckpt, &output)
                .with_context(|| format!("Failed to save {}", output.display()))?;
            Ok(())
        }
        Command::Reads { directory } => {
            let entries = list_reads(&directory, &Hdf5Source)
                .with_context(|| format!("Failed to list reads in {}", directory.display()))?;
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            for entry in entries {
                writeln!(out, "{entry}")?;
            }
            Ok(())
        }
        Command::Basecall {
            checkpoint,
            directory,
            temperature,
        } => run_basecall(
            &checkpoint,
            &directory,
            temperature.unwrap_or(config.temperature),
        ),
        Command::Init {
            output,
            model,
            hidden_size,
            conv_channels,
            seed,
        } => {
            let model_type: ModelType = model.parse()?;
            let mut architecture = Architecture::for_model(model_type);
            if let Some(hidden_size) = hidden_size {
                architecture.hidden_size = hidden_size;
            }
            if let Some(conv_channels) = conv_channels {
                architecture.conv_channels = conv_channels;
            }
            let ckpt = Checkpoint::random(CheckpointMetadata::new(model_type, architecture), seed);
            checkpoint::save(&ckpt, &output)?;
            println!("Wrote {} parameters to {}", ckpt.len(), output.display());
            Ok(())
        }
        Command::Models => {
            for model in ModelType::ALL {
                println!("{:<20} {}", model.as_str(), model.description());
            }
            println!(
                "\n{} {} ({}, {})",
                built_info::PKG_NAME,
                built_info::PKG_VERSION,
                built_info::TARGET,
                built_info::RUSTC_VERSION
            );
            Ok(())
        }
    }
}

fn run_inspect(path: &Path, param: Option<&str>) -> Result<()> {
    let ckpt = checkpoint::load(path).with_context(|| format!("Failed to load {}", path.display()))?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    match param {
        Some(name) => {
            let parameter = ckpt.get(name)?;
            let written = dump_values(parameter, &mut out)?;
            info!("Wrote {written} values of {name}");
        }
        None => {
            writeln!(
                out,
                "{} ({})",
                ckpt.metadata.model_type,
                ckpt.metadata.model_type.description()
            )?;
            for line in &ckpt.metadata.history {
                writeln!(out, "  history: {line}")?;
            }
            for summary in summarize(&ckpt) {
                writeln!(out, "{summary}")?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn run_prune(path: &Path, output: &Path, rules: &[PruneRule], report_path: Option<&Path>) -> Result<()> {
    let mut ckpt = checkpoint::load(path).with_context(|| format!("Failed to load {}", path.display()))?;
    let report = prune(&mut ckpt, rules)?;
    print!("{report}");

    if let Some(report_path) = report_path {
        std::fs::write(report_path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write {}", report_path.display()))?;
    }
    checkpoint::save(&ckpt, output).with_context(|| format!("Failed to save {}", output.display()))?;
    Ok(())
}

fn run_basecall(checkpoint_path: &Path, directory: &Path, temperature: f32) -> Result<()> {
    let ckpt = checkpoint::load(checkpoint_path)
        .with_context(|| format!("Failed to load {}", checkpoint_path.display()))?;
    let device = Default::default();
    let model = load_basecaller::<CpuBackend>(&ckpt, &device)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let called = for_each_read(directory, &Hdf5Source, |read| {
        match model.basecall(&read.signal, temperature) {
            Ok(call) => {
                writeln!(out, ">{}  score={:.3}", read.read_id, call.score)?;
                writeln!(out, "{}", call.sequence)?;
            }
            Err(e) => warn!("Failed to basecall {}: {}", read.read_id, e),
        }
        Ok(())
    })
    .with_context(|| format!("Failed to read signal files in {}", directory.display()))?;
    info!("Processed {called} reads");
    out.flush()?;
    Ok(())
}
