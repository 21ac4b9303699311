// Presentation side of an upload: the error line, the busy spinner, the
// progress bar and where to go when the upload finishes. The uploader only
// talks to the `UploadView` trait; `TerminalView` draws it with indicatif.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;

pub trait UploadView: Send + Sync {
    /// Show an inline error; it disappears on its own after a while.
    fn show_error(&self, message: &str);

    fn clear_error(&self);

    /// Busy means the submit control is disabled and the spinner runs.
    fn set_busy(&self, busy: bool);

    fn start_progress(&self, total: u64);

    /// `completed` is already clamped to `[0, total]`.
    fn report_progress(&self, completed: u64, total: u64);

    fn hide_progress(&self);

    /// The upload finished; present the server-provided location.
    fn navigate(&self, location: &str);

    /// The server session is gone and is being re-established.
    fn reload(&self);
}

/// Terminal rendering of the upload controls.
pub struct TerminalView {
    bars: MultiProgress,
    spinner: Mutex<Option<ProgressBar>>,
    progress: Mutex<Option<ProgressBar>>,
    error: Mutex<Option<ProgressBar>>,
    error_display: Duration,
    base_url: String,
    last_location: Mutex<Option<String>>,
}

impl TerminalView {
    pub fn new(base_url: &str, error_display: Duration) -> Self {
        Self::with_draw_target(base_url, error_display, ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(base_url: &str, error_display: Duration, target: ProgressDrawTarget) -> Self {
        Self {
            bars: MultiProgress::with_draw_target(target),
            spinner: Mutex::new(None),
            progress: Mutex::new(None),
            error: Mutex::new(None),
            error_display,
            base_url: base_url.trim_end_matches('/').to_string(),
            last_location: Mutex::new(None),
        }
    }

    /// Absolute URL of the last navigation, if the upload completed.
    pub fn last_location(&self) -> Option<String> {
        self.last_location.lock().ok().and_then(|l| l.clone())
    }

    fn absolute(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}{}", self.base_url, location)
        }
    }
}

fn style(template: &str, fallback: ProgressStyle) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or(fallback)
}

fn take_and_clear(slot: &Mutex<Option<ProgressBar>>) {
    if let Ok(mut slot) = slot.lock() {
        if let Some(bar) = slot.take() {
            bar.finish_and_clear();
        }
    }
}

impl UploadView for TerminalView {
    fn show_error(&self, message: &str) {
        take_and_clear(&self.error);
        let bar = self.bars.add(ProgressBar::new_spinner());
        bar.set_style(style("{prefix:.red.bold} {msg}", ProgressStyle::default_spinner()));
        bar.set_prefix("error:");
        bar.set_message(message.to_string());
        bar.tick();

        // Auto-dismiss this bar only; a newer error owns its own timer.
        // Clearing an already cleared bar is a no-op.
        let dismiss = bar.clone();
        let after = self.error_display;
        match Handle::try_current() {
            Ok(handle) => {
                let deadline = tokio::time::Instant::now() + after;
                handle.spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    dismiss.finish_and_clear();
                });
            }
            Err(_) => {
                thread::spawn(move || {
                    thread::sleep(after);
                    dismiss.finish_and_clear();
                });
            }
        }

        if let Ok(mut slot) = self.error.lock() {
            *slot = Some(bar);
        }
    }

    fn clear_error(&self) {
        take_and_clear(&self.error);
    }

    fn set_busy(&self, busy: bool) {
        take_and_clear(&self.spinner);
        if !busy {
            return;
        }
        let spinner = self.bars.add(ProgressBar::new_spinner());
        spinner.set_style(style("{spinner} {msg}", ProgressStyle::default_spinner()));
        spinner.set_message("Uploading...");
        spinner.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut slot) = self.spinner.lock() {
            *slot = Some(spinner);
        }
    }

    fn start_progress(&self, total: u64) {
        take_and_clear(&self.progress);
        let bar = self.bars.add(ProgressBar::new(total));
        bar.set_style(style(
            "[{bar:40.cyan/blue}] {pos}/{len} chunks",
            ProgressStyle::default_bar(),
        ));
        if let Ok(mut slot) = self.progress.lock() {
            *slot = Some(bar);
        }
    }

    fn report_progress(&self, completed: u64, total: u64) {
        if let Ok(slot) = self.progress.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.set_length(total);
                bar.set_position(completed);
            }
        }
    }

    fn hide_progress(&self) {
        take_and_clear(&self.progress);
    }

    fn navigate(&self, location: &str) {
        let url = self.absolute(location);
        if let Ok(slot) = self.progress.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.finish();
            }
        }
        let _ = self.bars.println(format!("Upload complete: {}", url));
        if let Ok(mut last) = self.last_location.lock() {
            *last = Some(url);
        }
    }

    fn reload(&self) {
        take_and_clear(&self.progress);
        let _ = self.bars.println("Session expired, reloading...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hidden() -> TerminalView {
        hidden_for(Duration::from_millis(10))
    }

    fn hidden_for(error_display: Duration) -> TerminalView {
        TerminalView::with_draw_target("http://localhost:5000/", error_display, ProgressDrawTarget::hidden())
    }

    fn current_error(view: &TerminalView) -> ProgressBar {
        view.error.lock().unwrap().clone().unwrap()
    }

    async fn advance(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn navigation_resolves_relative_locations() {
        let view = hidden();
        view.start_progress(3);
        view.report_progress(3, 3);
        view.navigate("/preview/42");
        assert_eq!(view.last_location().as_deref(), Some("http://localhost:5000/preview/42"));

        view.navigate("https://cdn.example/x");
        assert_eq!(view.last_location().as_deref(), Some("https://cdn.example/x"));
    }

    #[test]
    fn error_is_replaced_and_cleared() {
        let view = hidden();
        view.show_error("first");
        view.show_error("second");
        assert!(view.error.lock().unwrap().is_some());
        view.clear_error();
        assert!(view.error.lock().unwrap().is_none());
    }

    #[test]
    fn error_dismisses_itself_without_a_runtime() {
        let view = hidden();
        view.show_error("server unreachable");
        let bar = current_error(&view);
        assert!(!bar.is_finished());

        std::thread::sleep(Duration::from_millis(200));
        assert!(bar.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_error_outlives_older_timer() {
        let view = hidden_for(Duration::from_millis(100));
        view.show_error("first");
        let first = current_error(&view);

        advance(60).await;
        view.show_error("second");
        let second = current_error(&view);
        // replacing the error clears the old bar at once
        assert!(first.is_finished());

        // the first timer fires here and must leave the newer bar alone
        advance(50).await;
        assert!(!second.is_finished());

        advance(60).await;
        assert!(second.is_finished());
    }

    #[test]
    fn busy_and_progress_toggle() {
        let view = hidden();
        view.set_busy(true);
        assert!(view.spinner.lock().unwrap().is_some());
        view.set_busy(false);
        assert!(view.spinner.lock().unwrap().is_none());

        view.start_progress(2);
        view.hide_progress();
        assert!(view.progress.lock().unwrap().is_none());
        // reporting with no bar is harmless
        view.report_progress(1, 2);
    }
}
