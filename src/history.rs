// Conversion history: reading the server-rendered listing, deleting an
// entry and locating its preview.

use serde::Deserialize;

use crate::api::{attr, element_text};
use crate::error::HistoryError;

/// One row of the `/history` page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: u64,
    pub filename: String,
    pub status: Option<String>,
}

/// Rows of the history table, newest first as the server orders them. Each
/// row is a `<tr data-history-id="N">`; its `.history-filename` element
/// holds the uploaded name and `.history-status`, when present, the
/// conversion status. Rows without a numeric id are skipped.
pub fn parse_history_page(html: &str) -> Vec<HistoryEntry> {
    let mut entries = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find("<tr") {
        let row = &rest[start..];
        let Some(tag_end) = row.find('>') else {
            break;
        };
        let row_end = row.find("</tr>").unwrap_or(row.len()).max(tag_end);
        let body = &row[tag_end..row_end];
        let id = attr(&row[..tag_end], "data-history-id").and_then(parse_history_id);
        if let Some(id) = id {
            let filename = element_text(body, "history-filename").unwrap_or_default();
            let status = element_text(body, "history-status").filter(|s| !s.is_empty());
            entries.push(HistoryEntry { id, filename, status });
        }
        rest = &row[row_end..];
    }
    entries
}

/// Response of `POST /history/{id}/delete`.
#[derive(Deserialize, Debug, Default)]
pub struct DeleteResponse {
    #[serde(default)]
    pub success: bool,
    pub error: Option<String>,
}

impl DeleteResponse {
    pub fn into_result(self) -> Result<(), HistoryError> {
        if self.success {
            return Ok(());
        }
        Err(HistoryError::Rejected(
            self.error
                .unwrap_or_else(|| crate::error::GENERIC_DELETE_MESSAGE.to_string()),
        ))
    }
}

/// History ids are the server's integer row ids.
pub fn parse_history_id(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

/// Server-relative location of the preview page for an entry.
pub fn preview_path(history_id: u64) -> String {
    format!("/preview/{}", history_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_success() {
        let body: DeleteResponse = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(body.into_result().is_ok());
    }

    #[test]
    fn delete_error_message() {
        let body: DeleteResponse = serde_json::from_str(r#"{"error":"history not found"}"#).unwrap();
        match body.into_result() {
            Err(HistoryError::Rejected(msg)) => assert_eq!(msg, "history not found"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn delete_without_reason_gets_generic_text() {
        let body: DeleteResponse = serde_json::from_str(r#"{"success":false}"#).unwrap();
        let err = body.into_result().unwrap_err();
        assert_eq!(err.user_message(), crate::error::GENERIC_DELETE_MESSAGE);
    }

    #[test]
    fn history_rows_are_read_in_page_order() {
        let html = r##"
            <table class="table history-table"><thead><tr><th>File</th><th>Status</th></tr></thead>
            <tbody>
              <tr data-history-id="12">
                <td><a href="#" class="history-filename" data-history-id="12"> tower.ifc </a></td>
                <td><span class="badge history-status">completed</span></td>
                <td><button class="delete-history" data-history-id="12">x</button></td>
              </tr>
              <tr data-history-id="9">
                <td><a class="history-filename" data-history-id="9">site &amp; roads.ifc</a></td>
                <td class="history-status"></td>
              </tr>
              <tr data-history-id="oops"><td class="history-filename">ghost.ifc</td></tr>
            </tbody></table>"##;
        assert_eq!(
            parse_history_page(html),
            vec![
                HistoryEntry {
                    id: 12,
                    filename: "tower.ifc".into(),
                    status: Some("completed".into()),
                },
                HistoryEntry {
                    id: 9,
                    filename: "site & roads.ifc".into(),
                    status: None,
                },
            ]
        );
    }

    #[test]
    fn empty_history_page() {
        let html = r#"<div class="card-body"><div class="alert alert-info">No conversions yet.</div></div>"#;
        assert!(parse_history_page(html).is_empty());
    }

    #[test]
    fn ids_and_preview_paths() {
        assert_eq!(parse_history_id(" 42 "), Some(42));
        assert_eq!(parse_history_id("abc"), None);
        assert_eq!(preview_path(42), "/preview/42");
    }
}
