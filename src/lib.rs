// Library root
// -----------
// The binary (`main.rs`) is a thin shell over these modules.
//
// Module responsibilities:
// - `config`: client settings from defaults, config file and environment.
// - `error`: validation, upload, login and history error types.
// - `file`: the selected file, its validation gate and chunk ranges.
// - `state`: the per-attempt upload state machine.
// - `api`: HTTP calls to the web application (upload, chunks, history,
//   login) and the `UploadTransport` seam the uploader talks through.
// - `upload`: negotiation and windowed chunk transfer with cancellation.
// - `view`: the `UploadView` trait and its terminal rendering.
// - `history`: the history page listing, delete responses and preview
//   locations.
// - `ui`: the interactive menu, the shared upload runner and Ctrl-C routing.
pub mod api;
pub mod config;
pub mod error;
pub mod file;
pub mod history;
pub mod state;
pub mod ui;
pub mod upload;
pub mod view;
