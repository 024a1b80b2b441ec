use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use synwatch::config::SynwatchConfig;
use synwatch::detect::model::validate_model_path;
use synwatch::detect::{Algorithm, Contamination};
use synwatch::features::{read_features_csv, validate_features_csv, WindowSize};
use synwatch::pipeline::{self, DetectInput, DetectRequest, JobState, Pipeline};
use synwatch::traffic::generator::{generate_to_csv, AttackWindow, TrafficProfile};

#[derive(Parser)]
#[command(
    name = "synwatch",
    about = "Windowed SYN-flood detection over packet-metadata traces",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to $SYNWATCH_CONFIG, then ./synwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic traffic trace
    Generate {
        /// Output traffic CSV
        #[arg(long)]
        output: PathBuf,

        /// Trace length in seconds
        #[arg(long, default_value = "120")]
        duration: u32,

        /// Background packets per second
        #[arg(long, default_value = "50")]
        pps: u32,

        /// Attack burst as START:DURATION:KIND (repeatable)
        #[arg(long)]
        attack: Vec<AttackWindow>,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Epoch seconds of the first record (defaults to now)
        #[arg(long)]
        start_epoch: Option<f64>,
    },

    /// Aggregate a traffic CSV into per-window features
    Extract {
        /// Input traffic CSV
        #[arg(long)]
        input: PathBuf,

        /// Output feature CSV
        #[arg(long)]
        output: PathBuf,

        /// Window length in seconds
        #[arg(long)]
        window: Option<f64>,
    },

    /// Fit a baseline model on clean features
    Train {
        /// Baseline feature CSV
        #[arg(long)]
        features: PathBuf,

        /// Output model artifact
        #[arg(long)]
        model: PathBuf,

        /// Expected anomaly fraction in the baseline
        #[arg(long)]
        contamination: Option<f64>,

        /// Scorer: isolation-forest or z-score
        #[arg(long)]
        algorithm: Option<Algorithm>,
    },

    /// Score features against a model and write alerts
    Detect {
        /// Model artifact
        #[arg(long)]
        model: PathBuf,

        /// Feature CSV to score
        #[arg(long, required_unless_present = "traffic", conflicts_with = "traffic")]
        features: Option<PathBuf>,

        /// Traffic CSV to aggregate and score
        #[arg(long)]
        traffic: Option<PathBuf>,

        /// Output alert stream (JSON lines)
        #[arg(long)]
        alerts: PathBuf,
    },

    /// Compute the detection rate over a known attack interval
    Evaluate {
        /// Feature CSV that was scored
        #[arg(long)]
        features: PathBuf,

        /// Alert stream produced by `detect`
        #[arg(long)]
        alerts: PathBuf,

        /// Attack start, epoch seconds
        #[arg(long)]
        attack_start: f64,

        /// Attack end (exclusive), epoch seconds
        #[arg(long)]
        attack_end: f64,

        /// Match tolerance in seconds
        #[arg(long)]
        tolerance: Option<f64>,
    },

    /// Check a feature file and/or a model artifact
    Validate {
        /// Feature CSV to check
        #[arg(long)]
        features: Option<PathBuf>,

        /// Model artifact to check
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Generate, extract, train, detect and evaluate in one go
    Demo {
        /// Trace length in seconds
        #[arg(long, default_value = "120")]
        duration: u32,

        /// Background packets per second
        #[arg(long, default_value = "50")]
        pps: u32,

        /// Attack burst as START:DURATION:KIND
        #[arg(long, default_value = "40:40:syn-single-src")]
        attack: AttackWindow,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        #[arg(long, default_value = "models")]
        models_dir: PathBuf,

        #[arg(long, default_value = "outputs")]
        outputs_dir: PathBuf,
    },
}

fn init_tracing(default_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = SynwatchConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging.level, cli.log_json || config.logging.json);

    match cli.command {
        Commands::Generate {
            output,
            duration,
            pps,
            attack,
            seed,
            start_epoch,
        } => {
            let mut profile = TrafficProfile {
                duration_secs: duration,
                pps,
                attacks: attack,
                seed,
                ..TrafficProfile::default()
            };
            if let Some(t) = start_epoch {
                profile.start_epoch = t;
            }
            let n = generate_to_csv(&output, &profile)?;
            println!("Wrote {} records to {}", n, output.display());
        }
        Commands::Extract {
            input,
            output,
            window,
        } => {
            if let Some(secs) = window {
                config.features.window_secs = WindowSize::new(secs)?;
            }
            let vectors = Pipeline::from_config(&config).extract(&input, &output)?;
            println!("Wrote {} windows to {}", vectors.len(), output.display());
        }
        Commands::Train {
            features,
            model,
            contamination,
            algorithm,
        } => {
            if let Some(c) = contamination {
                config.model.contamination = Contamination::new(c)?;
            }
            if let Some(a) = algorithm {
                config.model.algorithm = a;
            }
            let fitted = Pipeline::from_config(&config).train(&features, &model)?;
            println!(
                "Trained {} model (contamination {}) -> {}",
                fitted.algorithm(),
                fitted.contamination(),
                model.display()
            );
        }
        Commands::Detect {
            model,
            features,
            traffic,
            alerts,
        } => {
            let input = match (features, traffic) {
                (Some(path), _) => DetectInput::Features(path),
                (None, Some(path)) => DetectInput::Traffic(path),
                (None, None) => bail!("pass --features or --traffic"),
            };
            let request = DetectRequest {
                model,
                input,
                alerts: alerts.clone(),
            };
            let mut job = pipeline::spawn(Arc::new(Pipeline::from_config(&config)), request);
            match job.wait().await {
                JobState::Succeeded(found) => {
                    println!("{} alert(s) written to {}", found.len(), alerts.display());
                    print_alerts(&found);
                }
                JobState::Failed(e) => return Err(anyhow!("detection failed: {}", e)),
                JobState::Running => bail!("detection job ended without a result"),
            }
        }
        Commands::Evaluate {
            features,
            alerts,
            attack_start,
            attack_end,
            tolerance,
        } => {
            let vectors = read_features_csv(&features)?;
            let found = synwatch::alert::read_alerts(&alerts)?;
            let tolerance = tolerance.unwrap_or(config.evaluation.tolerance_secs);
            let report =
                synwatch::evaluate(&vectors, &found, attack_start, attack_end, tolerance);
            println!("Detection TPR: {:.1}%", report.rate * 100.0);
            println!(
                "Attack windows: {} ({} detected, {} missed), unmatched alerts: {}",
                report.attack_windows(),
                report.true_positives,
                report.false_negatives,
                report.unmatched_alerts
            );
        }
        Commands::Validate { features, model } => {
            if features.is_none() && model.is_none() {
                bail!("nothing to validate: pass --features and/or --model");
            }
            let mut problems = Vec::new();
            if let Some(path) = &features {
                problems.extend(validate_features_csv(path));
            }
            if let Some(path) = &model {
                if let Err(msg) = validate_model_path(path) {
                    problems.push(msg);
                }
            }
            if problems.is_empty() {
                println!("OK");
            } else {
                for p in &problems {
                    println!(" - {}", p);
                }
                bail!("{} problem(s) found", problems.len());
            }
        }
        Commands::Demo {
            duration,
            pps,
            attack,
            seed,
            data_dir,
            models_dir,
            outputs_dir,
        } => {
            let options = synwatch::demo::DemoOptions {
                duration_secs: duration,
                pps,
                attack,
                seed,
                tolerance: config.evaluation.tolerance_secs,
                data_dir,
                models_dir,
                outputs_dir,
                ..Default::default()
            };
            let pipeline = Pipeline::from_config(&config);
            let report = tokio::task::spawn_blocking(move || {
                synwatch::demo::run(&pipeline, &options)
            })
            .await
            .context("demo task panicked")??;
            println!("{}", synwatch::demo::format_summary(&report));
        }
    }

    Ok(())
}

fn print_alerts(alerts: &[synwatch::Alert]) {
    if alerts.is_empty() {
        return;
    }
    println!(
        "{:<26} | {:>9} | {:>8} | {:>8} | {:>5}",
        "Window", "Score", "pps", "src H", "SYN"
    );
    println!("{:-<26}-|-{:->9}-|-{:->8}-|-{:->8}-|-{:->5}", "", "", "", "", "");
    for a in alerts {
        println!(
            "{:<26} | {:>9.4} | {:>8.1} | {:>8.3} | {:>5.2}",
            a.timestamp.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            a.score,
            a.features.packets_per_sec,
            a.features.entropy_src_addr,
            a.features.syn_ratio
        );
    }
}
