use clap::Parser;
use lead_sync::config::Settings;
use lead_sync::core::extractor::Extraction;
use lead_sync::core::orchestrator::Integration;
use lead_sync::obs;
use lead_sync::prompts::TerminalPrompter;
use std::path::PathBuf;
use std::sync::Arc;

/// Facebook Ads → B2Cor lead integration.
///
/// Flags are independent and can be combined; they run in the order
/// config → setup → extract → send → process → schedule → run.
#[derive(Debug, Parser)]
#[command(name = "lead-sync", version, about, arg_required_else_help = true)]
struct Cli {
    /// Configure the integration interactively
    #[arg(long)]
    config: bool,

    /// Validate (or obtain) credentials and build the clients
    #[arg(long)]
    setup: bool,

    /// Extract leads from Facebook Ads into a staging file
    #[arg(long)]
    extract: bool,

    /// Send leads from a staging file to B2Cor
    #[arg(long, value_name = "FILE")]
    send: Option<PathBuf>,

    /// Run the full pipeline: extract, send, sweep old staging files
    #[arg(long)]
    process: bool,

    /// Arm the recurring job from the configured schedule
    #[arg(long)]
    schedule: bool,

    /// Enter the polling loop and execute scheduled jobs
    #[arg(long)]
    run: bool,

    /// Path of the configuration file
    #[arg(long, value_name = "PATH", env = "LEAD_SYNC_CONFIG")]
    config_file: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn needs_setup(&self) -> bool {
        self.setup || self.extract || self.send.is_some() || self.process || self.schedule || self.run
    }
}

/// Resolves on Ctrl+C. If the handler cannot be installed the loop keeps running.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run_loop(integration: &mut Integration) -> bool {
    println!("Press Ctrl+C to stop running scheduled jobs.");
    match integration.run_scheduled_jobs(shutdown_signal()).await {
        Ok(summary) => {
            println!(
                "Scheduled jobs stopped after {} runs ({} failed).",
                summary.runs, summary.failures
            );
            true
        }
        Err(e) => {
            eprintln!("Error running scheduled jobs: {}", e);
            false
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(path) = &cli.config_file {
        settings.config_path = path.clone();
    }
    let _log_guard = obs::init_tracing(&settings.log_dir, cli.verbose)?;
    settings.log_summary();

    let prompter = TerminalPrompter;
    let mut integration = Integration::from_settings(settings, Arc::new(prompter))?;
    let mut ok = true;

    if cli.config {
        integration.interactive_config(&prompter)?;
        println!("\nConfiguration saved.");
    }

    if cli.needs_setup() {
        if let Err(e) = integration.setup().await {
            tracing::error!("Setup failed. Aborting.");
            anyhow::bail!("setup failed: {}", e);
        }
    }

    if cli.extract {
        match integration.extract_leads().await {
            Ok(Extraction {
                staging_file: Some(path),
                count,
            }) => println!("{} leads extracted to: {}", count, path.display()),
            Ok(_) => println!("No leads extracted."),
            Err(e) => {
                eprintln!("Error extracting leads: {}", e);
                ok = false;
            }
        }
    }

    if let Some(file) = &cli.send {
        match integration.send_leads(file).await {
            Ok(tally) => println!("Delivery finished. {}", tally),
            Err(e) => {
                eprintln!("Error sending leads: {}", e);
                ok = false;
            }
        }
    }

    if cli.process {
        match integration.process().await {
            Ok(outcome) => println!("Processing completed: {}", outcome),
            Err(e) => {
                eprintln!("Error during processing: {}", e);
                ok = false;
            }
        }
    }

    if cli.schedule {
        match integration.schedule_job() {
            Ok(next_run) => println!("Schedule armed. Next run at {}.", next_run),
            Err(e) => {
                eprintln!("Error scheduling: {}", e);
                ok = false;
            }
        }
    }

    if cli.run {
        ok &= run_loop(&mut integration).await;
    }

    if cli.config && integration.config().retention.auto_process {
        println!("\nStarting automatic processing...");
        if !integration.is_set_up() {
            if let Err(e) = integration.setup().await {
                tracing::error!("Setup failed. Aborting automatic processing.");
                anyhow::bail!("setup failed: {}", e);
            }
        }

        match integration.process().await {
            Ok(outcome) => println!("Automatic processing completed: {}", outcome),
            Err(e) => {
                eprintln!("Error during automatic processing: {}", e);
                ok = false;
            }
        }

        if integration.config().extraction.schedule.enabled {
            match integration.schedule_job() {
                Ok(next_run) => {
                    println!("Schedule armed. Next run at {}.", next_run);
                    ok &= run_loop(&mut integration).await;
                }
                Err(e) => {
                    eprintln!("Error scheduling: {}", e);
                    ok = false;
                }
            }
        }
    }

    if !ok {
        anyhow::bail!("one or more operations failed");
    }
    Ok(())
}
