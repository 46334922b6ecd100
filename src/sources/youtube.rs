use async_trait::async_trait;
use url::Url;

use super::{AudioStream, SourceError, TrackSource};

/// Enlace o búsqueda de YouTube; la extracción la hace yt-dlp al reproducir
#[derive(Debug, Clone)]
pub enum YoutubeSource {
    Link(String),
    Search(String),
}

impl YoutubeSource {
    pub fn link(url: impl Into<String>) -> Self {
        Self::Link(url.into())
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self::Search(query.into())
    }

    pub fn is_youtube_url(url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };

        matches!(
            parsed.host_str(),
            Some("www.youtube.com")
                | Some("youtube.com")
                | Some("youtu.be")
                | Some("m.youtube.com")
                | Some("music.youtube.com")
        )
    }
}

#[async_trait]
impl TrackSource for YoutubeSource {
    async fn open(&self) -> Result<AudioStream, SourceError> {
        match self {
            YoutubeSource::Link(url) => Ok(AudioStream::YoutubeDl(url.clone())),
            YoutubeSource::Search(query) if query.trim().is_empty() => {
                Err(SourceError::Fatal("búsqueda vacía".to_string()))
            }
            YoutubeSource::Search(query) => Ok(AudioStream::YoutubeSearch(query.clone())),
        }
    }

    fn describe(&self) -> String {
        match self {
            YoutubeSource::Link(url) => format!("youtube:{}", url),
            YoutubeSource::Search(query) => format!("ytsearch:{}", query),
        }
    }
}
