// UI layer: the interactive menu (dialoguer) and the upload runner shared
// with the non-interactive commands. Prompts are blocking, which is fine:
// nothing else runs while the user is typing.

use anyhow::{Context, Result};
use dialoguer::{Confirm, Input, Password, Select};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::error::HistoryError;
use crate::history::{parse_history_id, preview_path, HistoryEntry};
use crate::upload::{UploadOutcome, Uploader};
use crate::view::TerminalView;

/// Where Ctrl-C goes. One process-wide listener asks this first: a running
/// upload is cancelled, otherwise the caller exits.
#[derive(Clone, Default)]
pub struct Interrupts {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route interrupts to `token` until `disarm`.
    pub fn arm(&self, token: CancellationToken) {
        if let Ok(mut slot) = self.current.lock() {
            *slot = Some(token);
        }
    }

    pub fn disarm(&self) {
        if let Ok(mut slot) = self.current.lock() {
            *slot = None;
        }
    }

    /// Cancel the armed upload. Returns false when nothing was running.
    pub fn interrupt(&self) -> bool {
        let token = self.current.lock().ok().and_then(|mut slot| slot.take());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Main interactive menu. Runs a select loop until the user chooses "Exit".
pub async fn main_menu(api: ApiClient, config: &ClientConfig, interrupts: &Interrupts) -> Result<()> {
    loop {
        let items = vec![
            "Upload IFC file",
            "Conversion history",
            "Delete history entry",
            "Preview history entry",
            "Login",
            "Exit",
        ];
        let selection = Select::new().items(&items).default(0).interact()?;
        match selection {
            0 => {
                let path: String = Input::new().with_prompt("IFC file path").interact_text()?;
                let outcome = run_upload(&api, config, interrupts, Path::new(path.trim())).await?;
                // completion and errors are shown by the view itself
                if let UploadOutcome::SessionExpired = outcome {
                    println!("Your session expired. Log in again and retry the upload.");
                }
            }
            1 => browse_history(&api).await?,
            2 => {
                let raw: String = Input::new().with_prompt("History id").interact_text()?;
                let Some(id) = parse_history_id(&raw) else {
                    println!("History ids are numbers.");
                    continue;
                };
                if Confirm::new()
                    .with_prompt("Delete this history entry?")
                    .default(false)
                    .interact()?
                {
                    delete_entry(&api, id).await;
                }
            }
            3 => {
                let raw: String = Input::new().with_prompt("History id").interact_text()?;
                match parse_history_id(&raw) {
                    Some(id) => println!("{}", api.resolve(&preview_path(id))),
                    None => println!("History ids are numbers."),
                }
            }
            4 => handle_login(&api).await?,
            5 => break,
            _ => {}
        }
    }
    Ok(())
}

/// Select `path`, upload it and report how it ended. Ctrl-C cancels the
/// transfer while it runs.
pub async fn run_upload(
    api: &ApiClient,
    config: &ClientConfig,
    interrupts: &Interrupts,
    path: &Path,
) -> Result<UploadOutcome> {
    let view = TerminalView::new(api.base_url(), config.error_display);
    let mut uploader = Uploader::new(api.clone(), view, config);

    if let Err(e) = uploader.select_file(path) {
        return Ok(UploadOutcome::Failed(e));
    }

    interrupts.arm(uploader.cancel_token());
    let outcome = uploader.submit_upload().await;
    interrupts.disarm();

    debug!(?outcome, "upload finished");
    Ok(outcome)
}

/// Fetch and print the history table. `None` when it could not be loaded;
/// the reason has been printed.
pub async fn show_history(api: &ApiClient) -> Option<Vec<HistoryEntry>> {
    match api.list_history().await {
        Ok(entries) if entries.is_empty() => {
            println!("No conversion history yet.");
            Some(entries)
        }
        Ok(entries) => {
            for entry in &entries {
                println!("{}", format_entry(entry));
            }
            Some(entries)
        }
        Err(HistoryError::SessionExpired) => {
            println!("Log in to see your conversion history.");
            None
        }
        Err(e) => {
            println!("Could not load history: {}", e);
            None
        }
    }
}

pub fn format_entry(entry: &HistoryEntry) -> String {
    match &entry.status {
        Some(status) => format!("#{:<6} {} [{}]", entry.id, entry.filename, status),
        None => format!("#{:<6} {}", entry.id, entry.filename),
    }
}

/// List the history, then preview or delete a picked entry.
async fn browse_history(api: &ApiClient) -> Result<()> {
    let Some(entries) = show_history(api).await else {
        return Ok(());
    };
    if entries.is_empty() {
        return Ok(());
    }

    let mut items: Vec<String> = entries.iter().map(format_entry).collect();
    items.push("Back".to_string());
    let picked = Select::new()
        .with_prompt("History entry")
        .items(&items)
        .default(0)
        .interact()?;
    let Some(entry) = entries.get(picked) else {
        return Ok(());
    };

    let action = Select::new()
        .with_prompt(entry.filename.as_str())
        .items(&["Preview", "Delete", "Back"])
        .default(0)
        .interact()?;
    match action {
        0 => println!("{}", api.resolve(&preview_path(entry.id))),
        1 => {
            if Confirm::new()
                .with_prompt("Delete this history entry?")
                .default(false)
                .interact()?
            {
                delete_entry(api, entry.id).await;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Delete one history entry and print the result.
pub async fn delete_entry(api: &ApiClient, id: u64) -> bool {
    match api.delete_history(id).await {
        Ok(()) => {
            println!("History entry {} deleted.", id);
            true
        }
        Err(e) => {
            println!("Delete failed: {}", e.user_message());
            false
        }
    }
}

/// Collect credentials and log in. A failed login is reported, not fatal.
pub async fn handle_login(api: &ApiClient) -> Result<()> {
    let email: String = Input::new().with_prompt("Email").interact_text()?;
    let password: String = Password::new().with_prompt("Password").interact()?;
    login(api, &email, &password).await
}

pub async fn login(api: &ApiClient, email: &str, password: &str) -> Result<()> {
    api.login(email, password)
        .await
        .with_context(|| format!("Login failed for {}", email))?;
    println!("Logged in as {}.", email);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_cancels_only_the_armed_upload() {
        let interrupts = Interrupts::new();
        assert!(!interrupts.interrupt());

        let token = CancellationToken::new();
        interrupts.arm(token.clone());
        assert!(interrupts.clone().interrupt());
        assert!(token.is_cancelled());
        // a second Ctrl-C with nothing running falls through to exit
        assert!(!interrupts.interrupt());

        let later = CancellationToken::new();
        interrupts.arm(later.clone());
        interrupts.disarm();
        assert!(!interrupts.interrupt());
        assert!(!later.is_cancelled());
    }

    #[test]
    fn entries_print_with_optional_status() {
        let mut entry = HistoryEntry {
            id: 12,
            filename: "tower.ifc".into(),
            status: Some("completed".into()),
        };
        assert_eq!(format_entry(&entry), "#12     tower.ifc [completed]");
        entry.status = None;
        assert_eq!(format_entry(&entry), "#12     tower.ifc");
    }
}
