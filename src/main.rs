mod config;
mod coordinator;
mod dataset;
mod extractor;
mod matcher;
mod orchestrator;
mod record;
mod renderer;
mod search;
mod session;
mod snapshot;
mod store;
mod webdriver;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::search::{SearchClient, SearchOutcome};
use crate::session::SessionManager;
use crate::webdriver::WebDriverFactory;

#[derive(Parser)]
#[command(name = "tow_verifier", about = "Verify towing operators from the carrier census via web search")]
struct Cli {
    /// Settings file (default: ./verifier.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter a raw census export down to towing candidates
    Prepare {
        /// Raw census CSV
        #[arg(long)]
        census: PathBuf,
        /// Output CSV (default: the configured input path)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Verify candidates, resuming from the checkpoint
    Run {
        /// Parallel browser sessions
        #[arg(short = 'w', long)]
        workers: Option<usize>,
        /// Max records to verify this run (default: all remaining)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Candidate CSV (default: the configured input path)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Run the browser headless (the engine tends to block these)
        #[arg(long)]
        headless: bool,
        /// Worker that keeps a visible browser in headless runs
        #[arg(long)]
        visible_worker: Option<usize>,
    },
    /// Show checkpoint and results counts
    Stats,
    /// Run one search and print the candidate URLs
    Probe {
        /// Query text, e.g. "\"Acme Recovery\" Hartford CT"
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Prepare { census, out } => {
            let out = out.unwrap_or_else(|| settings.input_path.clone());
            let stats = dataset::prepare(&census, &out)?;
            println!(
                "Kept {} of {} carriers -> {}",
                stats.kept,
                stats.read,
                out.display()
            );
            Ok(())
        }
        Commands::Run {
            workers,
            limit,
            input,
            headless,
            visible_worker,
        } => {
            if let Some(w) = workers {
                settings.workers = w;
            }
            if let Some(path) = input {
                settings.input_path = path;
            }
            settings.headless |= headless;
            if visible_worker.is_some() {
                settings.visible_worker = visible_worker;
            }

            let records = dataset::load_records(&settings.input_path)?;
            println!(
                "Loaded {} carriers from {}",
                records.len(),
                settings.input_path.display()
            );
            let factory = Arc::new(WebDriverFactory::new(
                &settings.webdriver_url,
                settings.headless,
                settings.visible_worker,
            ));
            let summary = coordinator::run(&settings, factory, records, limit).await?;
            println!(
                "Done: {} of {} processed ({} verified, {} not found, {} skipped, {} re-queued).",
                summary.processed_this_run,
                summary.queued,
                summary.verified_this_run,
                summary.not_found,
                summary.skipped,
                summary.requeued
            );
            println!(
                "{} verified companies in {}",
                summary.verified_total,
                settings.results_path.display()
            );
            Ok(())
        }
        Commands::Stats => {
            let processed = snapshot::load_checkpoint(&settings.checkpoint_path)?;
            let results = snapshot::load_results(&settings.results_path)?;
            let auto = results.values().filter(|r| r.is_auto_approved()).count();
            println!("Processed:     {}", processed.len());
            println!("Verified:      {}", results.len());
            println!("  by name:     {}", auto);
            println!("  by website:  {}", results.len() - auto);
            Ok(())
        }
        Commands::Probe { query } => {
            let factory = Arc::new(WebDriverFactory::new(
                &settings.webdriver_url,
                settings.headless,
                settings.visible_worker,
            ));
            let mut session = SessionManager::new(0, factory, 0);
            let client = SearchClient::new(
                settings.page_load_timeout(),
                settings.results_wait_timeout(),
                settings.pacing(),
            );
            let outcome = client.search(session.renderer().await?, &query).await;
            session.close().await;

            match outcome {
                SearchOutcome::Success(urls) => {
                    let ranked = matcher::rank_by_priority_domain(&urls);
                    println!("{} candidate URLs:", ranked.len());
                    for (i, url) in ranked.iter().enumerate() {
                        println!("{:>3}. {}", i + 1, url);
                    }
                }
                SearchOutcome::Blocked => println!("Blocked: the engine gave no usable answer"),
                SearchOutcome::EngineError => println!("Engine error page served"),
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
