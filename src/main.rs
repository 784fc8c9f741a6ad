use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vistest::bus::WorkerMessage;
use vistest::report::{self, RunReport};
use vistest::runner::{self, worker::WorkerChannel, ConsoleReporter, Controller};
use vistest::utils::config::Config;

#[derive(Parser)]
#[command(name = "vistest")]
#[command(version = "0.1.0")]
#[command(about = "Visual regression test run coordinator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn workers and follow the run until they exit
    Run {
        /// Number of worker processes
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// YAML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the final JSON report here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write a JUnit XML report here
        #[arg(long)]
        junit: Option<PathBuf>,

        /// Disable the progress bar
        #[arg(long, default_value = "false")]
        no_progress: bool,

        /// Worker command, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Worker mode: send a recording of envelopes to the controller
    Emit {
        /// JSON Lines file, one envelope per line
        file: PathBuf,

        /// Pause between messages (ms)
        #[arg(long)]
        delay_ms: Option<u64>,

        /// YAML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Fold a recording of envelopes into a final status
    Replay {
        /// JSON Lines file, one envelope per line
        file: PathBuf,
    },

    /// Generate report from a saved status
    Report {
        /// Saved status or JSON report
        file: PathBuf,

        /// Output format (json, junit)
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; a worker's stdout is its channel.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            concurrency,
            config,
            report: report_path,
            junit,
            no_progress,
            command,
        } => {
            let mut config = match config {
                Some(path) => Config::load(&path)?,
                None => Config::default(),
            };
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            if report_path.is_some() {
                config.report_path = report_path;
            }
            if junit.is_some() {
                config.junit_path = junit;
            }
            if no_progress {
                config.progress = false;
            }

            let workers = config.concurrency.max(1);
            println!(
                "{} Starting {} worker(s): {}",
                "▶".green().bold(),
                workers,
                command.join(" ").cyan()
            );

            let mut controller = Controller::new();
            let reporter = ConsoleReporter::attach(controller.bus(), controller.store(), config.progress);

            let crashes = Arc::new(AtomicUsize::new(0));
            let counter = crashes.clone();
            let _crash_watch = controller.bus().subscribe(move |message: &WorkerMessage| {
                if matches!(message, WorkerMessage::Crashed { .. }) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });

            controller.spawn_workers(&command, workers)?;

            let shutdown = controller.shutdown_handle();
            ctrlc::set_handler(move || {
                eprintln!("\n{} Stopping workers...", "⏹".yellow());
                let accepted = shutdown.request();
                log::info!("shutdown sent to {} worker(s)", accepted);
            })?;

            let status = controller.run().await;
            reporter.finish(&status);

            let run_report = RunReport::new(status.as_ref().clone());
            if let Some(path) = &config.report_path {
                report::write_json(&run_report, Some(path))?;
            }
            if let Some(path) = &config.junit_path {
                report::junit::write_report(&run_report, path)?;
            }

            let crashed = crashes.load(Ordering::SeqCst);
            if crashed > 0 {
                println!("{} {} worker(s) crashed", "✗".red().bold(), crashed);
            }
            if run_report.summary.failed > 0 || crashed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Emit {
            file,
            delay_ms,
            config,
        } => {
            let config = match config {
                Some(path) => Config::load(&path)?,
                None => Config::default(),
            };
            let delay = Duration::from_millis(delay_ms.unwrap_or(config.emit_delay_ms));

            let channel = WorkerChannel::connect();
            let sent = channel.emit_file(&file, delay).await?;
            channel.flush().await;
            log::info!(
                "worker {:?} sent {} message(s)",
                channel.worker_id(),
                sent
            );
        }
        Commands::Replay { file } => {
            let status = runner::replay_file(&file)?;
            report::write_json(&RunReport::new(status), None)?;
        }
        Commands::Report {
            file,
            format,
            output,
        } => {
            if output.is_some() {
                println!("{} Generating {} report...", "📊", format.cyan());
            }
            report::generate_report(&file, &format, output.as_deref())?;
        }
    }

    Ok(())
}
