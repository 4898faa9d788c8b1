use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceguard::audit::Untranslated;
use faceguard::conversation::MessageKind;
use faceguard::matcher::MatcherCommand;
use faceguard::{config, identity, outcome};
use log::{error, info, warn};

#[derive(Parser)]
#[command(name = "faceguard")]
#[command(
    version,
    about = "Command line interface for faceguard face authentication"
)]
struct Cli {
    /// Set the user account to use (defaults to the sudo caller)
    #[arg(short = 'U', long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test if your face is recognized
    Test,
    /// Open the configuration file in an editor
    Config,
    /// Enable the faceguard PAM module
    Enable,
    /// Disable the faceguard PAM module
    Disable,
}

fn main() -> Result<ExitCode> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Test => {
            let user = match cli.user {
                Some(user) => user,
                None => identity::default_user()?,
            };
            test(&user)
        }
        Commands::Config => open_config().map(|_| ExitCode::SUCCESS),
        Commands::Enable => set_disabled(false).map(|_| ExitCode::SUCCESS),
        Commands::Disable => set_disabled(true).map(|_| ExitCode::SUCCESS),
    }
}

fn test(user: &str) -> Result<ExitCode> {
    let cfg = config::load_config(None)?;
    let command = MatcherCommand::from(&cfg.matcher);
    info!(
        "Running {} {} for user: {}",
        command.interpreter.display(),
        command.script.display(),
        user
    );

    let status = command
        .spawn(user)
        .context("Failed to start the face matcher")?
        .wait()
        .context("Failed to wait for the face matcher")?;

    let report = outcome::classify(status).report(user, true, &Untranslated);
    if let Some((kind, text)) = &report.user_message {
        match kind {
            MessageKind::Info => info!("{text}"),
            MessageKind::Error => error!("{text}"),
        }
    }
    info!("{} ({})", report.log_line, report.decision);

    if report.outcome.is_success() {
        info!("✓ Face recognized for user: {}", user);
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("Face not recognized: {}", report.outcome);
        Ok(ExitCode::FAILURE)
    }
}

fn set_disabled(disabled: bool) -> Result<()> {
    let mut cfg = config::load_config(None)?;
    if cfg.core.disabled == disabled {
        info!(
            "faceguard is already {}",
            if disabled { "disabled" } else { "enabled" }
        );
        return Ok(());
    }
    cfg.core.disabled = disabled;
    config::save_config(&cfg, None).context("Failed to save config")?;
    info!(
        "✓ faceguard {}",
        if disabled { "disabled" } else { "enabled" }
    );
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
