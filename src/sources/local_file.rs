use async_trait::async_trait;
use std::path::PathBuf;
use url::Url;

use super::{AudioStream, SourceError, TrackSource};

/// Archivo de audio en disco
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    path: PathBuf,
}

impl LocalFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Acepta `file:///ruta/al/audio.ogg`
    pub fn from_file_url(url: &str) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        if parsed.scheme() != "file" {
            return None;
        }

        parsed.to_file_path().ok().map(Self::new)
    }
}

#[async_trait]
impl TrackSource for LocalFileSource {
    async fn open(&self) -> Result<AudioStream, SourceError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(AudioStream::File(self.path.clone())),
            Ok(_) => Err(SourceError::Fatal(format!(
                "no es un archivo: {}",
                self.path.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SourceError::Fatal(
                format!("archivo inexistente: {}", self.path.display()),
            )),
            Err(e) => Err(SourceError::Transient(e.to_string())),
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_existing_file_opens() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = LocalFileSource::new(file.path());

        let stream = source.open().await.unwrap();
        assert_eq!(stream, AudioStream::File(file.path().to_path_buf()));
    }

    #[test]
    fn test_only_file_urls_are_accepted() {
        let source = LocalFileSource::from_file_url("file:///music/song.ogg").unwrap();
        assert_eq!(source.describe(), "file:/music/song.ogg");

        assert!(LocalFileSource::from_file_url("https://example.com/song.ogg").is_none());
        assert!(LocalFileSource::from_file_url("song.ogg").is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalFileSource::new(dir.path().join("missing.ogg"));
        assert!(!source.open().await.unwrap_err().is_transient());

        let source = LocalFileSource::new(dir.path());
        assert!(!source.open().await.unwrap_err().is_transient());
    }
}
