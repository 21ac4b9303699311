// Chunked upload orchestration.
//
// An `Uploader` owns one `UploadState` and drives it through selection,
// session negotiation and chunk transfer. Chunk requests are issued in index
// order through a bounded window and polled together on the caller's task,
// so acknowledgements may complete in any order; the progress shown is
// always the count of acknowledged chunks.
//
// Every attempt carries a `CancellationToken`. A chunk error, a completion
// or an external cancel (Ctrl-C) trips it, and in-flight sibling requests
// are dropped rather than left to finish.

use futures::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ChunkAck, UploadSession, UploadTransport};
use crate::config::ClientConfig;
use crate::error::{UploadError, ValidationError};
use crate::file::SelectedFile;
use crate::state::{ChunkTransferState, UploadEvent, UploadState};
use crate::view::UploadView;

/// How an upload attempt ended.
#[derive(Debug)]
pub enum UploadOutcome {
    /// The server reported completion; the view was navigated to `redirect`.
    Completed { redirect: String },
    /// The server session was lost and has been re-established. The user
    /// has to start again.
    SessionExpired,
    Failed(UploadError),
}

impl UploadOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, UploadOutcome::Completed { .. })
    }
}

pub struct Uploader<T, V> {
    transport: T,
    view: V,
    state: UploadState,
    cancel: CancellationToken,
    max_file_size: u64,
    max_in_flight: usize,
}

/// Clamp `completed` into `[0, total]` and hand it to the view.
pub fn report_progress<V: UploadView + ?Sized>(view: &V, completed: u64, total: u64) {
    view.report_progress(completed.min(total), total);
}

impl<T: UploadTransport, V: UploadView> Uploader<T, V> {
    pub fn new(transport: T, view: V, config: &ClientConfig) -> Self {
        Self {
            transport,
            view,
            state: UploadState::Idle,
            cancel: CancellationToken::new(),
            max_file_size: config.max_file_size,
            max_in_flight: config.max_in_flight.max(1),
        }
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Token of the current attempt. Cancelling it aborts the upload.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Pick a file from disk. An invalid choice clears any previous
    /// selection and shows the reason.
    pub fn select_file(&mut self, path: &Path) -> Result<&SelectedFile, UploadError> {
        let candidate = SelectedFile::open(path, self.max_file_size);
        self.accept_selection(candidate)
    }

    /// Pick an in-memory file.
    pub fn select_bytes(&mut self, name: &str, data: Vec<u8>) -> Result<&SelectedFile, UploadError> {
        let candidate = SelectedFile::from_bytes(name, data, self.max_file_size);
        self.accept_selection(candidate)
    }

    fn accept_selection(
        &mut self,
        candidate: Result<SelectedFile, ValidationError>,
    ) -> Result<&SelectedFile, UploadError> {
        if self.state.is_busy() {
            return Err(UploadError::Busy);
        }
        match candidate {
            Ok(file) => {
                debug!(name = file.name(), size = file.size(), "file selected");
                if let Err(e) = self.state.apply(UploadEvent::FileChosen(file)) {
                    let err = UploadError::from(e);
                    self.view.show_error(&err.user_message());
                    return Err(err);
                }
                self.view.clear_error();
                // the previous attempt tripped its token on completion
                if self.cancel.is_cancelled() {
                    self.cancel = CancellationToken::new();
                }
                match self.state.selected_file() {
                    Some(file) => Ok(file),
                    None => Err(UploadError::Protocol(format!(
                        "selection lost while {}",
                        self.state.name()
                    ))),
                }
            }
            Err(e) => {
                self.view.show_error(&e.to_string());
                self.apply(UploadEvent::SelectionCleared);
                Err(e.into())
            }
        }
    }

    fn apply(&mut self, event: UploadEvent) {
        if let Err(e) = self.state.apply(event) {
            debug!(error = %e, "ignored upload event");
        }
    }

    /// Run the whole attempt for the selected file: negotiate, transfer,
    /// navigate. Rejections that need no network call return before the
    /// controls are disabled.
    pub async fn submit_upload(&mut self) -> UploadOutcome {
        if self.state.is_busy() {
            return UploadOutcome::Failed(UploadError::Busy);
        }
        let file = match self.state.selected_file() {
            Some(file) => file.clone(),
            None => {
                let err = ValidationError::NoFileSelected;
                self.view.show_error(&err.to_string());
                return UploadOutcome::Failed(err.into());
            }
        };
        if let Err(err) = file.revalidate(self.max_file_size) {
            self.view.show_error(&err.to_string());
            self.apply(UploadEvent::SelectionCleared);
            return UploadOutcome::Failed(err.into());
        }

        self.apply(UploadEvent::Submitted);
        self.view.clear_error();
        self.view.set_busy(true);

        let session = match self.negotiate_session(&file).await {
            Ok(session) => session,
            Err(e) => return self.fail(e).await,
        };
        self.apply(UploadEvent::Negotiated(session.clone()));

        match self.transfer_chunks(&file, &session).await {
            Ok(redirect) => {
                info!(upload_id = %session.upload_id, %redirect, "upload completed");
                self.apply(UploadEvent::Finished {
                    redirect: redirect.clone(),
                });
                self.view.set_busy(false);
                self.view.navigate(&redirect);
                UploadOutcome::Completed { redirect }
            }
            Err(e) => self.fail(e).await,
        }
    }

    /// Send the file to the initiation endpoint and return the session the
    /// server assigned.
    pub async fn negotiate_session(&self, file: &SelectedFile) -> Result<UploadSession, UploadError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled),
            result = self.transport.negotiate(file) => result,
        }
    }

    /// Upload every chunk of `file` for `session`. Returns the redirect of
    /// the completing response.
    pub async fn transfer_chunks(
        &mut self,
        file: &SelectedFile,
        session: &UploadSession,
    ) -> Result<String, UploadError> {
        let total = session.chunks_total;
        let window = self.max_in_flight;
        let transport = &self.transport;
        let view = &self.view;
        let state = &mut self.state;
        let cancel = &self.cancel;
        let upload_id = session.upload_id.as_str();

        view.start_progress(total);
        report_progress(view, 0, total);

        let mut next: u64 = 0;
        let mut in_flight = FuturesUnordered::new();
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            while next < total && in_flight.len() < window {
                let index = next;
                let chunk = file.chunk(index, session.chunk_size);
                let token = cancel.clone();
                debug!(upload_id, index, bytes = chunk.len(), "dispatching chunk");
                in_flight.push(async move {
                    let result = tokio::select! {
                        _ = token.cancelled() => Err(UploadError::Cancelled),
                        r = transport.send_chunk(upload_id, index, chunk) => r,
                    };
                    (index, result)
                });
                next += 1;
            }

            let Some((index, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(ack) => {
                    if let Err(e) = state.apply(UploadEvent::ChunkAcknowledged) {
                        debug!(error = %e, "acknowledgement after transfer ended");
                    }
                    let progress = state.progress().unwrap_or(ChunkTransferState::new(total));
                    debug!(upload_id, index, completed = progress.completed, total, "chunk acknowledged");
                    match ack {
                        ChunkAck::Accepted => report_progress(view, progress.completed, total),
                        ChunkAck::Completed { redirect } => {
                            // The server holds every chunk; responses still in
                            // flight no longer matter.
                            report_progress(view, total, total);
                            cancel.cancel();
                            return Ok(redirect);
                        }
                    }
                }
                Err(e) => {
                    warn!(upload_id, index, error = %e, "chunk failed");
                    cancel.cancel();
                    return Err(e);
                }
            }
        }

        Err(UploadError::Protocol(
            "every chunk was acknowledged but the server never reported completion".into(),
        ))
    }

    /// Abort the attempt: reload on session loss, otherwise surface the
    /// error. Either way the controls come back and a fresh token is armed.
    async fn fail(&mut self, error: UploadError) -> UploadOutcome {
        self.apply(UploadEvent::Failed);
        self.view.set_busy(false);
        self.view.hide_progress();
        self.cancel = CancellationToken::new();

        if let UploadError::SessionExpired = error {
            warn!("server session expired during upload");
            self.view.reload();
            if let Err(e) = self.transport.refresh_session().await {
                warn!(error = %e, "could not re-establish the session");
            }
            return UploadOutcome::SessionExpired;
        }

        warn!(error = %error, "upload failed");
        self.view.show_error(&error.user_message());
        UploadOutcome::Failed(error)
    }
}
