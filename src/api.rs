// API client module: the async HTTP client that talks to the IFC web
// application. It owns a cookie store (the server session lives in a
// cookie) and the CSRF token that must be echoed on every mutating call.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE, REFERER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{AuthError, HistoryError, UploadError};
use crate::file::SelectedFile;
use crate::history::{parse_history_page, DeleteResponse, HistoryEntry};

/// Header the server reads the CSRF token from (`X-CSRFToken`). Header
/// names are case-insensitive; `http` requires the lowercase form.
pub const CSRF_HEADER: &str = "x-csrftoken";

/// Server-assigned parameters for one upload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: String,
    pub chunk_size: u64,
    pub chunks_total: u64,
}

/// Raw response of `POST /upload`. Either the three session fields or
/// `error` are present. `upload_id` is kept as a `serde_json::Value`
/// because some server builds send it as a number.
#[derive(Deserialize, Debug, Default)]
pub struct NegotiationResponse {
    pub upload_id: Option<serde_json::Value>,
    pub chunk_size: Option<u64>,
    pub chunks_total: Option<u64>,
    pub error: Option<String>,
}

impl NegotiationResponse {
    pub fn into_session(self) -> Result<UploadSession, UploadError> {
        if let Some(error) = self.error {
            return Err(UploadError::Negotiation(error));
        }
        let upload_id = match self.upload_id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(UploadError::Negotiation("server did not assign an upload id".into())),
        };
        let chunk_size = self
            .chunk_size
            .filter(|&n| n > 0)
            .ok_or_else(|| UploadError::Negotiation("server sent no usable chunk size".into()))?;
        let chunks_total = self
            .chunks_total
            .filter(|&n| n > 0)
            .ok_or_else(|| UploadError::Negotiation("server sent no usable chunk count".into()))?;
        Ok(UploadSession {
            upload_id,
            chunk_size,
            chunks_total,
        })
    }
}

/// Raw response of `POST /upload/{id}/chunk/{n}`.
#[derive(Deserialize, Debug, Default)]
pub struct ChunkResponse {
    pub error: Option<String>,
    pub status: Option<String>,
    pub redirect: Option<String>,
}

/// What a successful chunk response means for the transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkAck {
    Accepted,
    Completed { redirect: String },
}

impl ChunkResponse {
    pub fn into_ack(self) -> Result<ChunkAck, UploadError> {
        if let Some(error) = self.error {
            return Err(UploadError::ChunkTransfer(error));
        }
        match self.status.as_deref() {
            Some("completed") => match self.redirect {
                Some(redirect) if !redirect.is_empty() => Ok(ChunkAck::Completed { redirect }),
                _ => Err(UploadError::Protocol("completion without redirect".into())),
            },
            _ => Ok(ChunkAck::Accepted),
        }
    }
}

/// The network side of an upload. `ApiClient` is the real implementation;
/// tests substitute scripted ones.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// `POST /upload` with the whole file; returns the session parameters.
    async fn negotiate(&self, file: &SelectedFile) -> Result<UploadSession, UploadError>;

    /// `POST /upload/{upload_id}/chunk/{index}` with that chunk's bytes.
    async fn send_chunk(&self, upload_id: &str, index: u64, chunk: Bytes) -> Result<ChunkAck, UploadError>;

    /// Start over with a fresh server session after it expired.
    async fn refresh_session(&self) -> Result<(), UploadError>;
}

/// Async API client holding the reqwest client, the base URL of the web
/// application and the CSRF token for mutating calls.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    csrf_token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    /// Create an ApiClient from the loaded configuration. A configured CSRF
    /// token is used as-is; otherwise it is fetched lazily from the index
    /// page.
    pub fn from_config(config: &ClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(ApiClient {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            csrf_token: Arc::new(RwLock::new(config.csrf_token.clone())),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Turn a server-relative location such as `/preview/42` into an
    /// absolute URL. Absolute locations pass through unchanged.
    pub fn resolve(&self, location: &str) -> String {
        Url::parse(&format!("{}/", self.base_url))
            .and_then(|base| base.join(location))
            .map(String::from)
            .unwrap_or_else(|_| format!("{}{}", self.base_url, location))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn cached_token(&self) -> Option<String> {
        self.csrf_token.read().ok().and_then(|t| t.clone())
    }

    fn store_token(&self, token: String) {
        if let Ok(mut slot) = self.csrf_token.write() {
            *slot = Some(token);
        }
    }

    /// Load the index page and read the token from its
    /// `<meta name="csrf-token">` tag. This also establishes the session
    /// cookie the token belongs to.
    pub async fn refresh_csrf_token(&self) -> Result<String, UploadError> {
        let res = self.client.get(self.url("/")).send().await?;
        let html = res.text().await?;
        let token = extract_csrf_token(&html)
            .ok_or_else(|| UploadError::Protocol("index page has no csrf-token meta tag".into()))?;
        debug!("refreshed csrf token");
        self.store_token(token.clone());
        Ok(token)
    }

    async fn csrf_token(&self) -> Result<String, UploadError> {
        match self.cached_token() {
            Some(token) => Ok(token),
            None => self.refresh_csrf_token().await,
        }
    }

    /// Headers every mutating request carries. The Referer is required by
    /// the server's CSRF check on HTTPS.
    fn mutation_headers(&self, token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = token.parse() {
            headers.insert(CSRF_HEADER, v);
        }
        if let Ok(v) = format!("{}/", self.base_url).parse() {
            headers.insert(REFERER, v);
        }
        headers
    }

    /// Form login against `/auth/login`. The server answers a successful
    /// login with a redirect away from the login page.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let url = self.url("/auth/login");
        let page = self.client.get(&url).send().await?.text().await?;
        let form_token = extract_hidden_field(&page, "csrf_token").ok_or(AuthError::MissingToken)?;

        let res = self
            .client
            .post(&url)
            .header(REFERER, url.as_str())
            .form(&[
                ("email", email),
                ("password", password),
                ("csrf_token", form_token.as_str()),
            ])
            .send()
            .await?;

        if res.url().path().trim_end_matches('/') == "/auth/login" {
            warn!(email, "login rejected");
            return Err(AuthError::Rejected(email.to_string()));
        }
        info!(email, "logged in");
        // The token is bound to the session, which changed on login.
        if let Ok(mut slot) = self.csrf_token.write() {
            *slot = None;
        }
        Ok(())
    }

    /// `GET /history`. The page requires a login; without one the server
    /// redirects to the login form.
    pub async fn list_history(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let res = self.client.get(self.url("/history")).send().await?;
        let status = res.status();
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || res.url().path().trim_end_matches('/') == "/auth/login"
        {
            return Err(HistoryError::SessionExpired);
        }
        if !status.is_success() {
            return Err(HistoryError::Status(status));
        }
        let entries = parse_history_page(&res.text().await?);
        debug!(count = entries.len(), "history listed");
        Ok(entries)
    }

    /// `POST /history/{id}/delete`.
    pub async fn delete_history(&self, history_id: u64) -> Result<(), HistoryError> {
        let token = self.csrf_token().await?;
        let res = self
            .client
            .post(self.url(&format!("/history/{}/delete", history_id)))
            .headers(self.mutation_headers(&token))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = res.status();
        if is_session_loss(status, res.headers()) {
            return Err(HistoryError::SessionExpired);
        }
        if !status.is_success() {
            return Err(HistoryError::Status(status));
        }
        let body: DeleteResponse = res.json().await?;
        body.into_result()
    }
}

#[async_trait]
impl UploadTransport for ApiClient {
    async fn negotiate(&self, file: &SelectedFile) -> Result<UploadSession, UploadError> {
        let token = self.csrf_token().await?;
        let part = Part::stream_with_length(file.data(), file.size())
            .file_name(file.name().to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        let res = self
            .client
            .post(self.url("/upload"))
            .headers(self.mutation_headers(&token))
            .multipart(form)
            .send()
            .await?;

        let body: NegotiationResponse = read_json(res).await?;
        let session = body.into_session()?;
        info!(
            upload_id = %session.upload_id,
            chunk_size = session.chunk_size,
            chunks_total = session.chunks_total,
            "upload session negotiated"
        );
        Ok(session)
    }

    async fn send_chunk(&self, upload_id: &str, index: u64, chunk: Bytes) -> Result<ChunkAck, UploadError> {
        let token = self.csrf_token().await?;
        let len = chunk.len();
        let part = Part::stream_with_length(chunk, len as u64)
            .file_name("blob")
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("chunk", part);

        debug!(upload_id, index, len, "sending chunk");
        let res = self
            .client
            .post(self.url(&format!("/upload/{}/chunk/{}", upload_id, index)))
            .headers(self.mutation_headers(&token))
            .multipart(form)
            .send()
            .await?;

        let body: ChunkResponse = read_json(res).await?;
        body.into_ack()
    }

    async fn refresh_session(&self) -> Result<(), UploadError> {
        self.refresh_csrf_token().await.map(|_| ())
    }
}

/// Session loss is signalled by `401`/`403`, or by the server answering with
/// an HTML page (a login redirect or CSRF failure page) where JSON was
/// expected.
pub fn is_session_loss(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return true;
    }
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
}

async fn read_json<T: DeserializeOwned>(res: Response) -> Result<T, UploadError> {
    let status = res.status();
    if is_session_loss(status, res.headers()) {
        warn!(%status, "server answered with a session-loss response");
        return Err(UploadError::SessionExpired);
    }
    let body = res.text().await?;
    // Error responses still carry `{ "error": ... }`, so the status alone
    // does not decide.
    serde_json::from_str(&body).map_err(|e| {
        if status.is_success() {
            UploadError::Protocol(e.to_string())
        } else {
            UploadError::Protocol(format!("status {}", status))
        }
    })
}

/// Value of the `content` attribute of `<meta name="csrf-token">`.
pub fn extract_csrf_token(html: &str) -> Option<String> {
    find_tag_attr(html, "<meta", "name", "csrf-token", "content")
}

/// Value of a hidden form input, e.g. `csrf_token` in server-rendered forms.
pub fn extract_hidden_field(html: &str, field: &str) -> Option<String> {
    find_tag_attr(html, "<input", "name", field, "value")
}

fn find_tag_attr(html: &str, open: &str, key: &str, key_value: &str, wanted: &str) -> Option<String> {
    let mut rest = html;
    while let Some(start) = rest.find(open) {
        let tag_start = &rest[start..];
        let end = tag_start.find('>')?;
        let tag = &tag_start[..end];
        if attr(tag, key) == Some(key_value) {
            if let Some(value) = attr(tag, wanted) {
                return Some(value.to_string());
            }
        }
        rest = &tag_start[end..];
    }
    None
}

/// Text of the first element carrying `class`, up to its first child tag.
/// Common entities are decoded.
pub(crate) fn element_text(html: &str, class: &str) -> Option<String> {
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        let tag_start = &rest[start..];
        let end = tag_start.find('>')?;
        let classes = attr(&tag_start[..end], "class").unwrap_or_default();
        if classes.split_whitespace().any(|c| c == class) {
            let text = &tag_start[end + 1..];
            let close = text.find('<').unwrap_or(text.len());
            return Some(decode_entities(text[..close].trim()));
        }
        rest = &tag_start[end..];
    }
    None
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Quoted attribute value inside a single tag.
pub(crate) fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = tag;
    loop {
        let pos = rest.find(name)?;
        let boundary_ok = rest[..pos]
            .chars()
            .last()
            .map(|c| c.is_whitespace())
            .unwrap_or(false);
        let after = rest[pos + name.len()..].trim_start();
        if boundary_ok {
            if let Some(after_eq) = after.strip_prefix('=') {
                let after_eq = after_eq.trim_start();
                let quote = after_eq.chars().next()?;
                if quote == '"' || quote == '\'' {
                    let value = &after_eq[1..];
                    let close = value.find(quote)?;
                    return Some(&value[..close]);
                }
            }
        }
        rest = &rest[pos + name.len()..];
    }
}
