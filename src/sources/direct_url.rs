use async_trait::async_trait;
use url::Url;

use super::{AudioStream, SourceError, TrackSource};

/// URL HTTP/HTTPS que el reproductor abre por su cuenta
#[derive(Debug, Clone)]
pub struct DirectUrlSource {
    url: String,
}

impl DirectUrlSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn is_valid_url(url: &str) -> bool {
        matches!(Url::parse(url), Ok(parsed) if matches!(parsed.scheme(), "http" | "https"))
    }
}

#[async_trait]
impl TrackSource for DirectUrlSource {
    async fn open(&self) -> Result<AudioStream, SourceError> {
        if !Self::is_valid_url(&self.url) {
            return Err(SourceError::Fatal(format!("URL mal formada: {}", self.url)));
        }

        Ok(AudioStream::Url(self.url.clone()))
    }

    fn describe(&self) -> String {
        format!("url:{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_detection() {
        assert!(DirectUrlSource::is_valid_url("https://example.com/song.mp3"));
        assert!(DirectUrlSource::is_valid_url("http://radio.example.com:8000/stream"));
        assert!(!DirectUrlSource::is_valid_url("ftp://example.com/song.mp3"));
        assert!(!DirectUrlSource::is_valid_url("lofi beats"));
    }

    #[tokio::test]
    async fn test_invalid_url_is_fatal() {
        let err = DirectUrlSource::new("not a url").open().await.unwrap_err();
        assert!(!err.is_transient());
    }
}
