//! selfcall - a self-calling agent loop
//!
//! Command-line surface for the run controller: starts a session, renders
//! every state snapshot, and forwards Ctrl-C as a cancellation request.

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use selfcall::{
    ControllerConfig, Message, Role, RunController, RunOutcome, RunState, DEFAULT_CONFIG_FILE,
    SCRIPTED_RESPONSES,
};
use std::path::PathBuf;

/// Exit code for a run stopped by a responder failure
const EXIT_RUN_FAILED: i32 = 3;

/// Exit code for a run stopped by Ctrl-C
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "selfcall")]
#[command(version = "0.1.0")]
#[command(about = "Watch an agent recursively call itself and generate thoughts", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one self-calling session
    Run {
        /// Initial prompt (defaults to the configured prompt)
        #[arg(short, long)]
        prompt: Option<String>,

        /// Number of iterations (defaults to the configured value)
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Pause between iterations in milliseconds (overrides config)
        #[arg(long, value_name = "MS")]
        delay_ms: Option<u64>,

        /// Emit one JSON state snapshot per line instead of a transcript
        #[arg(long)]
        json: bool,
    },

    /// List the scripted responses
    Responses {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Check the configuration file for errors
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "selfcall=debug,info"
    } else {
        "selfcall=info,warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn dispatch(cli: Cli) -> selfcall::Result<i32> {
    let config = ControllerConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            prompt,
            max_iterations,
            delay_ms,
            json,
        } => {
            let config = match delay_ms {
                Some(ms) => config.with_iteration_delay_ms(ms),
                None => config,
            };
            run_session(config, prompt, max_iterations, json).await
        }
        Commands::Responses { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&SCRIPTED_RESPONSES)?);
            } else {
                for (i, response) in SCRIPTED_RESPONSES.iter().enumerate() {
                    println!("{} {}", format!("{i:>2}.").dimmed(), response);
                }
            }
            Ok(0)
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", config.to_toml()?);
                Ok(0)
            }
            ConfigAction::Validate => {
                config.validate()?;
                println!(
                    "{} Configuration is valid ({})",
                    "✓".green().bold(),
                    cli.config.display()
                );
                Ok(0)
            }
        },
    }
}

/// Run a session to completion and return the process exit code.
async fn run_session(
    config: ControllerConfig,
    prompt: Option<String>,
    max_iterations: Option<u32>,
    json: bool,
) -> selfcall::Result<i32> {
    let controller = RunController::scripted(config)?;
    if let Some(prompt) = prompt {
        controller.set_initial_prompt(prompt)?;
    }
    if let Some(n) = max_iterations {
        controller.set_max_iterations(n)?;
    }

    let mut updates = controller.subscribe();
    let handle = controller.start_configured()?;
    let mut renderer = Renderer::new(json, controller.snapshot().max_iterations);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(snapshot) => {
                    renderer.render(&snapshot)?;
                    if !snapshot.is_running {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut ctrl_c, if !cancel_requested => {
                cancel_requested = true;
                controller.cancel();
            }
        }
    }

    let outcome = handle.wait().await?;
    renderer.finish(&outcome);

    Ok(match outcome {
        RunOutcome::Completed => 0,
        RunOutcome::Cancelled => EXIT_CANCELLED,
        RunOutcome::Failed(_) => EXIT_RUN_FAILED,
    })
}

/// Prints snapshots either as a transcript with a progress bar or as JSON lines.
struct Renderer {
    json: bool,
    printed: usize,
    bar: Option<ProgressBar>,
}

impl Renderer {
    fn new(json: bool, max_iterations: u32) -> Self {
        let bar = (!json).then(|| {
            let bar = ProgressBar::new(u64::from(max_iterations));
            if let Ok(style) =
                ProgressStyle::with_template("{spinner} iteration {pos}/{len} {wide_bar} {elapsed}")
            {
                bar.set_style(style);
            }
            bar
        });
        Self {
            json,
            printed: 0,
            bar,
        }
    }

    fn render(&mut self, snapshot: &RunState) -> selfcall::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(snapshot)?);
            return Ok(());
        }

        for message in snapshot.transcript.iter().skip(self.printed) {
            let line = format_message(message);
            match &self.bar {
                Some(bar) => bar.suspend(|| println!("{line}\n")),
                None => println!("{line}\n"),
            }
        }
        self.printed = snapshot.transcript.len();

        if let Some(bar) = &self.bar {
            bar.set_position(u64::from(snapshot.completed_iterations));
        }
        Ok(())
    }

    fn finish(&self, outcome: &RunOutcome) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
        if self.json {
            return;
        }
        match outcome {
            RunOutcome::Completed => println!(
                "{} Run completed after {} iteration(s)",
                "✓".green().bold(),
                self.printed.saturating_sub(1)
            ),
            RunOutcome::Cancelled => println!("{} Run cancelled", "⚠".yellow().bold()),
            RunOutcome::Failed(failure) => println!(
                "{} Iteration {} failed: {}",
                "✗".red().bold(),
                failure.iteration,
                failure.reason
            ),
        }
    }
}

fn format_message(message: &Message) -> String {
    let time = message.timestamp.format("%H:%M:%S").to_string();
    let who = match message.role {
        Role::User => "you".cyan().bold(),
        Role::Assistant => format!("agent #{}", message.id).magenta().bold(),
    };
    format!("{} {} {}", time.dimmed(), who, message.content)
}
