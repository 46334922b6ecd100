use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{AudioStream, SourceError, TrackSource};

const AUDIO_EXTENSIONS: [&str; 5] = [".mp3", ".wav", ".ogg", ".flac", ".m4a"];

/// Descarga el audio completo antes de reproducirlo
#[derive(Debug, Clone)]
pub struct DownloadSource {
    client: reqwest::Client,
    url: String,
}

impl DownloadSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Archivos finitos que conviene bajar completos
    pub fn is_audio_file(url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }

        let path = parsed.path().to_lowercase();
        AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }
}

fn classify(err: reqwest::Error) -> SourceError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        return SourceError::Transient(err.to_string());
    }

    match err.status() {
        Some(status) if status.is_server_error() => SourceError::Transient(err.to_string()),
        _ => SourceError::Fatal(err.to_string()),
    }
}

#[async_trait]
impl TrackSource for DownloadSource {
    async fn open(&self) -> Result<AudioStream, SourceError> {
        debug!("⬇️ Descargando {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(classify)?
            .error_for_status()
            .map_err(classify)?;

        let body = response.bytes().await.map_err(classify)?;
        if body.is_empty() {
            return Err(SourceError::Fatal(format!("respuesta vacía: {}", self.url)));
        }

        Ok(AudioStream::Bytes(body))
    }

    fn describe(&self) -> String {
        format!("download:{}", self.url)
    }
}
