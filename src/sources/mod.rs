pub mod direct_url;
pub mod download;
pub mod local_file;
pub mod youtube;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{info, warn};

use crate::audio::error::VoiceError;

pub use direct_url::DirectUrlSource;
pub use download::DownloadSource;
pub use local_file::LocalFileSource;
pub use youtube::YoutubeSource;

/// Errores al materializar una fuente de audio
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Fallo pasajero (red, timeout); vale la pena reintentar
    #[error("fallo temporal: {0}")]
    Transient(String),

    /// Fallo definitivo (URL inválida, archivo inexistente, 4xx)
    #[error("fallo definitivo: {0}")]
    Fatal(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// Audio listo para entregar al reproductor.
///
/// Puede ser un localizador diferido (el reproductor abre el stream) o
/// bytes ya descargados.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioStream {
    Url(String),
    YoutubeDl(String),
    YoutubeSearch(String),
    File(PathBuf),
    Bytes(Bytes),
}

/// Productor de audio de una entrada de la cola
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackSource: Send + Sync {
    /// Materializa el stream; puede requerir I/O
    async fn open(&self) -> Result<AudioStream, SourceError>;

    /// Descripción corta para logs
    fn describe(&self) -> String;
}

/// Metadata opaca para el núcleo de voz
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub title: String,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl TrackInfo {
    pub fn new(title: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            title: title.into(),
            requested_by,
            added_at: Utc::now(),
        }
    }
}

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Entrada de la cola de reproducción
#[derive(Clone)]
pub struct QueueEntry {
    id: u64,
    pub source: Arc<dyn TrackSource>,
    pub volume: Option<f32>,
    pub info: TrackInfo,
}

impl QueueEntry {
    pub fn new(source: Arc<dyn TrackSource>, info: TrackInfo) -> Self {
        Self {
            id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            source,
            volume: None,
            info,
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Identificador único; las copias por repetición lo conservan
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn track_volume(&self) -> f32 {
        self.volume.unwrap_or(1.0)
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("id", &self.id)
            .field("source", &self.source.describe())
            .field("volume", &self.volume)
            .field("title", &self.info.title)
            .finish()
    }
}

/// Elige la fuente adecuada para lo que escribió el usuario
pub fn resolve_query(query: &str, http: &reqwest::Client) -> Arc<dyn TrackSource> {
    let query = query.trim();

    if let Some(file) = LocalFileSource::from_file_url(query) {
        return Arc::new(file);
    }

    if YoutubeSource::is_youtube_url(query) {
        return Arc::new(YoutubeSource::link(query));
    }

    if DownloadSource::is_audio_file(query) {
        return Arc::new(DownloadSource::new(http.clone(), query));
    }

    if DirectUrlSource::is_valid_url(query) {
        return Arc::new(DirectUrlSource::new(query));
    }

    Arc::new(YoutubeSource::search(query))
}

/// Abre la fuente reintentando sólo los fallos temporales.
///
/// Hace como máximo `limit` intentos con `delay` entre ellos; un fallo
/// definitivo o agotar los intentos se reporta como `SourceUnavailable`.
pub async fn open_with_retry(
    source: &dyn TrackSource,
    limit: u32,
    delay: Duration,
) -> Result<AudioStream, VoiceError> {
    let limit = limit.max(1);

    for attempt in 1..=limit {
        match source.open().await {
            Ok(stream) => {
                if attempt > 1 {
                    info!("✅ Fuente abierta en intento {}: {}", attempt, source.describe());
                }
                return Ok(stream);
            }
            Err(SourceError::Transient(reason)) if attempt < limit => {
                warn!(
                    "🔄 Intento {}/{} falló para {}: {}",
                    attempt,
                    limit,
                    source.describe(),
                    reason
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!("❌ No se pudo abrir {}: {}", source.describe(), e);
                return Err(VoiceError::SourceUnavailable(format!(
                    "{}: {}",
                    source.describe(),
                    e
                )));
            }
        }
    }

    Err(VoiceError::SourceUnavailable(source.describe()))
}
