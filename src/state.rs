// Per-attempt upload state machine.
//
//   Idle -> FileSelected -> Negotiating -> Transferring -> Completed
//                                |              |
//                                +--> Failed <--+--> Idle
//
// `Failed` is not a resting state: the `Failed` event drops straight back
// to `Idle` with the controls enabled again. `Completed` ends the attempt;
// only a new selection leaves it, starting the next attempt.

use std::fmt;

use crate::api::UploadSession;
use crate::file::SelectedFile;

/// Acknowledged chunks against the session total. Only ever grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTransferState {
    pub completed: u64,
    pub total: u64,
}

impl ChunkTransferState {
    pub fn new(total: u64) -> Self {
        Self {
            completed: 0,
            total,
        }
    }

    /// Count one more acknowledgement, never past `total`.
    pub fn acknowledge(&mut self) {
        self.completed = (self.completed + 1).min(self.total);
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

#[derive(Debug, Clone)]
pub enum UploadState {
    Idle,
    FileSelected(SelectedFile),
    Negotiating(SelectedFile),
    Transferring {
        file: SelectedFile,
        session: UploadSession,
        progress: ChunkTransferState,
    },
    Completed {
        redirect: String,
    },
}

#[derive(Debug)]
pub enum UploadEvent {
    FileChosen(SelectedFile),
    SelectionCleared,
    Submitted,
    Negotiated(UploadSession),
    ChunkAcknowledged,
    Finished { redirect: String },
    Failed,
}

/// An event that makes no sense in the current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply {event} while {state}")]
pub struct InvalidTransition {
    pub state: &'static str,
    pub event: &'static str,
}

impl UploadState {
    pub fn name(&self) -> &'static str {
        match self {
            UploadState::Idle => "idle",
            UploadState::FileSelected(_) => "file selected",
            UploadState::Negotiating(_) => "negotiating",
            UploadState::Transferring { .. } => "transferring",
            UploadState::Completed { .. } => "completed",
        }
    }

    /// True while a request is outstanding; the submit control is disabled.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UploadState::Negotiating(_) | UploadState::Transferring { .. }
        )
    }

    pub fn selected_file(&self) -> Option<&SelectedFile> {
        match self {
            UploadState::FileSelected(file)
            | UploadState::Negotiating(file)
            | UploadState::Transferring { file, .. } => Some(file),
            _ => None,
        }
    }

    pub fn progress(&self) -> Option<ChunkTransferState> {
        match self {
            UploadState::Transferring { progress, .. } => Some(*progress),
            _ => None,
        }
    }

    /// Apply `event`, replacing `self` with the next state. On error the
    /// state is left untouched.
    pub fn apply(&mut self, event: UploadEvent) -> Result<(), InvalidTransition> {
        let current = std::mem::replace(self, UploadState::Idle);
        match (current, event) {
            // Selection is allowed whenever nothing is outstanding.
            (
                UploadState::Idle | UploadState::FileSelected(_) | UploadState::Completed { .. },
                UploadEvent::FileChosen(file),
            ) => {
                *self = UploadState::FileSelected(file);
            }
            (
                UploadState::Idle | UploadState::FileSelected(_) | UploadState::Completed { .. },
                UploadEvent::SelectionCleared,
            ) => {
                *self = UploadState::Idle;
            }
            (UploadState::FileSelected(file), UploadEvent::Submitted) => {
                *self = UploadState::Negotiating(file);
            }
            (UploadState::Negotiating(file), UploadEvent::Negotiated(session)) => {
                let progress = ChunkTransferState::new(session.chunks_total);
                *self = UploadState::Transferring {
                    file,
                    session,
                    progress,
                };
            }
            (
                UploadState::Transferring {
                    file,
                    session,
                    mut progress,
                },
                UploadEvent::ChunkAcknowledged,
            ) => {
                progress.acknowledge();
                *self = UploadState::Transferring {
                    file,
                    session,
                    progress,
                };
            }
            (UploadState::Transferring { .. }, UploadEvent::Finished { redirect }) => {
                *self = UploadState::Completed { redirect };
            }
            (UploadState::Negotiating(_) | UploadState::Transferring { .. }, UploadEvent::Failed) => {
                *self = UploadState::Idle;
            }
            (current, event) => {
                let err = InvalidTransition {
                    state: current.name(),
                    event: event.name(),
                };
                *self = current;
                return Err(err);
            }
        }
        Ok(())
    }
}

impl UploadEvent {
    pub fn name(&self) -> &'static str {
        match self {
            UploadEvent::FileChosen(_) => "file chosen",
            UploadEvent::SelectionCleared => "selection cleared",
            UploadEvent::Submitted => "submitted",
            UploadEvent::Negotiated(_) => "negotiated",
            UploadEvent::ChunkAcknowledged => "chunk acknowledged",
            UploadEvent::Finished { .. } => "finished",
            UploadEvent::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
