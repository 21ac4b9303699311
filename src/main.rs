// Entrypoint for the IFC upload CLI.
// - Loads configuration, applies command-line overrides and sets up logging.
// - Without a subcommand it starts the interactive menu.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dialoguer::Password;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ifc_upload_cli::api::ApiClient;
use ifc_upload_cli::config::ClientConfig;
use ifc_upload_cli::history::preview_path;
use ifc_upload_cli::ui;
use ifc_upload_cli::upload::UploadOutcome;

#[derive(Debug, Parser)]
#[command(name = "ifc-upload", version, about = "Upload IFC models to the conversion service")]
struct Cli {
    /// Base URL of the web application (overrides IFC_SERVER_URL)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Chunk requests allowed in flight; 1 uploads strictly in order
    #[arg(long, global = true)]
    max_in_flight: Option<usize>,

    /// Log in with this email before running the command
    #[arg(long, global = true)]
    email: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload one .ifc file in chunks
    Upload { path: PathBuf },
    /// Delete a conversion-history entry
    Delete {
        id: u64,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Print the preview URL of a history entry
    Preview { id: u64 },
    /// List the conversion history
    History,
    /// Interactive menu (default)
    Menu,
}

/// Single Ctrl-C listener for the whole process. It cancels the running
/// upload if there is one and exits otherwise. Prompts block the main
/// thread, so this needs a runtime worker of its own.
async fn route_interrupts(interrupts: ui::Interrupts) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            return;
        }
        if interrupts.interrupt() {
            info!("Ctrl-C received, cancelling upload");
        } else {
            info!("Ctrl-C received, exiting");
            std::process::exit(130);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "ifc_upload_cli=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::load();
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(n) = cli.max_in_flight {
        config.max_in_flight = n;
    }
    config.normalize();

    let api = ApiClient::from_config(&config).context("Failed to build HTTP client")?;
    let interrupts = ui::Interrupts::new();
    tokio::spawn(route_interrupts(interrupts.clone()));

    if let Some(email) = cli.email.as_deref() {
        let password: String = Password::new().with_prompt("Password").interact()?;
        ui::login(&api, email, &password).await?;
    }

    match cli.command.unwrap_or(Command::Menu) {
        Command::Upload { path } => match ui::run_upload(&api, &config, &interrupts, &path).await? {
            UploadOutcome::Completed { .. } => Ok(()),
            UploadOutcome::SessionExpired => bail!("Session expired; log in again and retry"),
            UploadOutcome::Failed(e) => Err(e).context("Upload failed"),
        },
        Command::Delete { id, yes } => {
            let confirmed = yes
                || dialoguer::Confirm::new()
                    .with_prompt("Delete this history entry?")
                    .default(false)
                    .interact()?;
            if confirmed && !ui::delete_entry(&api, id).await {
                bail!("Could not delete history entry {}", id);
            }
            Ok(())
        }
        Command::Preview { id } => {
            println!("{}", api.resolve(&preview_path(id)));
            Ok(())
        }
        Command::History => match ui::show_history(&api).await {
            Some(_) => Ok(()),
            None => bail!("Could not load the conversion history"),
        },
        Command::Menu => ui::main_menu(api, &config, &interrupts).await,
    }
}
