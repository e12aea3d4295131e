use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BackendConfig;

/// The backend calls the session machinery issues. Used to name the failed
/// operation in errors and notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    AddTorrent,
    FetchMetadata,
    ExternalPlayer,
    DeselectFile,
    RemoveTorrent,
    Ping,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::AddTorrent => "add torrent",
            Operation::FetchMetadata => "fetch metadata",
            Operation::ExternalPlayer => "stream to external player",
            Operation::DeselectFile => "deselect file",
            Operation::RemoveTorrent => "remove torrent",
            Operation::Ping => "ping",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{op} failed: {source}")]
    Request {
        op: Operation,
        source: reqwest::Error,
    },
    #[error("{op} failed: backend returned {status}")]
    Status { op: Operation, status: StatusCode },
    #[error("{op} failed: invalid response: {message}")]
    InvalidResponse { op: Operation, message: String },
}

impl BackendError {
    pub fn operation(&self) -> Operation {
        match self {
            BackendError::Request { op, .. }
            | BackendError::Status { op, .. }
            | BackendError::InvalidResponse { op, .. } => *op,
        }
    }
}

/// One file inside a torrent, as listed by `/metadata`.
///
/// The backend addresses files by an explicit key when it sends one
/// (`key`, `index` or `id`, string or integer) and by file name otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(default, alias = "size")]
    pub length: Option<u64>,
    #[serde(
        default,
        alias = "index",
        alias = "id",
        deserialize_with = "deserialize_key"
    )]
    key: Option<String>,
}

fn deserialize_key<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawKey {
        Text(String),
        Number(u64),
    }

    Ok(Option::<RawKey>::deserialize(deserializer)?.map(|raw| match raw {
        RawKey::Text(text) => text,
        RawKey::Number(n) => n.to_string(),
    }))
}

/// Season/episode numbering parsed from a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeNumber {
    pub season: Option<u32>,
    pub episode: u32,
}

impl EpisodeNumber {
    pub fn label(&self) -> String {
        match self.season {
            Some(season) => format!("S{:02}E{:02}", season, self.episode),
            None => format!("E{:02}", self.episode),
        }
    }
}

static SXEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)s(\d{1,2})e(\d{1,4})").unwrap());
// "[Group] Show - 05 [1080p].mkv"
static DASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s-\s(\d{1,4})(?:v\d)?[\s.\[(]").unwrap());

impl FileEntry {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: None,
            key: Some(key.into()),
        }
    }

    /// Entry addressed by its name, the way the backend lists files when it
    /// sends no explicit key.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: None,
            key: None,
        }
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Key used in `/streamfile` and `/deselect` paths.
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.name)
    }

    pub fn episode(&self) -> Option<EpisodeNumber> {
        if let Some(caps) = SXEX_RE.captures(&self.name)
            && let (Ok(season), Ok(episode)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>())
        {
            return Some(EpisodeNumber {
                season: Some(season),
                episode,
            });
        }

        let caps = DASH_RE.captures(&self.name)?;
        let episode = caps[1].parse::<u32>().ok()?;
        Some(EpisodeNumber {
            season: None,
            episode,
        })
    }
}

/// Builds backend URLs. Every magnet identifier and file key is
/// percent-encoded before it is placed in a path or query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base_url: String,
}

fn encode(value: &str) -> Cow<'_, str> {
    urlencoding::encode(value)
}

impl Endpoints {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn add_url(&self, magnet_id: &str) -> String {
        format!("{}/add/{}", self.base_url, encode(magnet_id))
    }

    pub fn metadata_url(&self, magnet_id: &str) -> String {
        format!("{}/metadata/{}", self.base_url, encode(magnet_id))
    }

    pub fn stream_url(&self, magnet_id: &str) -> String {
        format!("{}/stream/{}", self.base_url, encode(magnet_id))
    }

    pub fn file_stream_url(&self, magnet_id: &str, file_key: &str) -> String {
        format!(
            "{}/streamfile/{}/{}",
            self.base_url,
            encode(magnet_id),
            encode(file_key)
        )
    }

    pub fn subtitle_url(&self, magnet_id: &str) -> String {
        format!("{}/subtitles/{}", self.base_url, encode(magnet_id))
    }

    pub fn external_player_url(&self, stream_url: &str) -> String {
        format!("{}/stream-to-vlc?url={}", self.base_url, encode(stream_url))
    }

    pub fn deselect_url(&self, magnet_id: &str, file_key: &str) -> String {
        format!(
            "{}/deselect/{}/{}",
            self.base_url,
            encode(magnet_id),
            encode(file_key)
        )
    }

    pub fn remove_url(&self, magnet_id: &str) -> String {
        format!("{}/remove/{}", self.base_url, encode(magnet_id))
    }

    pub fn ping_url(&self) -> String {
        format!("{}/ping", self.base_url)
    }
}

/// The REST surface of the streaming backend.
///
/// No retries happen at this layer; callers own retry and ordering policy.
pub trait Backend: Send + Sync {
    fn endpoints(&self) -> &Endpoints;

    fn add_torrent(&self, magnet_id: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn fetch_metadata(
        &self,
        magnet_id: &str,
    ) -> impl Future<Output = Result<Vec<FileEntry>, BackendError>> + Send;

    /// Ask the backend to open `stream_url` in an OS-level player.
    fn dispatch_to_external_player(
        &self,
        stream_url: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Known to be unreliable: one call can leave the file partially selected.
    fn deselect_file(
        &self,
        magnet_id: &str,
        file_key: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn remove_torrent(&self, magnet_id: &str)
    -> impl Future<Output = Result<(), BackendError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn stream_url(&self, magnet_id: &str) -> String {
        self.endpoints().stream_url(magnet_id)
    }

    fn file_stream_url(&self, magnet_id: &str, file_key: &str) -> String {
        self.endpoints().file_stream_url(magnet_id, file_key)
    }

    fn subtitle_url(&self, magnet_id: &str) -> String {
        self.endpoints().subtitle_url(magnet_id)
    }
}

pub struct BackendClient {
    client: Client,
    endpoints: Endpoints,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Self {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let client = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "failed to build configured HTTP client, using defaults");
            Client::new()
        });

        Self {
            client,
            endpoints: Endpoints::new(&config.url),
        }
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            endpoints: Endpoints::new(base_url),
        }
    }

    async fn send(&self, op: Operation, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|source| BackendError::Request { op, source })?;

        let status = response.status();
        if !status.is_success() {
            debug!(%op, %status, "backend returned non-success");
            return Err(BackendError::Status { op, status });
        }

        Ok(response)
    }

    async fn get(&self, op: Operation, url: &str) -> Result<Response, BackendError> {
        debug!(%op, url, "backend request");
        self.send(op, self.client.get(url)).await
    }
}

impl Backend for BackendClient {
    fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn add_torrent(&self, magnet_id: &str) -> Result<(), BackendError> {
        let url = self.endpoints.add_url(magnet_id);
        self.get(Operation::AddTorrent, &url).await?;
        Ok(())
    }

    async fn fetch_metadata(&self, magnet_id: &str) -> Result<Vec<FileEntry>, BackendError> {
        let op = Operation::FetchMetadata;
        let url = self.endpoints.metadata_url(magnet_id);
        let response = self.get(op, &url).await?;

        let body = response
            .text()
            .await
            .map_err(|source| BackendError::Request { op, source })?;

        serde_json::from_str(&body).map_err(|e| BackendError::InvalidResponse {
            op,
            message: e.to_string(),
        })
    }

    async fn dispatch_to_external_player(&self, stream_url: &str) -> Result<(), BackendError> {
        let url = self.endpoints.external_player_url(stream_url);
        self.get(Operation::ExternalPlayer, &url).await?;
        Ok(())
    }

    async fn deselect_file(&self, magnet_id: &str, file_key: &str) -> Result<(), BackendError> {
        let url = self.endpoints.deselect_url(magnet_id, file_key);
        self.get(Operation::DeselectFile, &url).await?;
        Ok(())
    }

    async fn remove_torrent(&self, magnet_id: &str) -> Result<(), BackendError> {
        let op = Operation::RemoveTorrent;
        let url = self.endpoints.remove_url(magnet_id);
        debug!(%op, url, "backend request");
        self.send(op, self.client.delete(&url)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let url = self.endpoints.ping_url();
        self.get(Operation::Ping, &url).await?;
        Ok(())
    }
}
