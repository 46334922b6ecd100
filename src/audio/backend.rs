//! Contrato con el transporte de voz.
//!
//! El núcleo de sesiones sólo conoce estos traits; `songbird_backend`
//! los implementa sobre songbird y los tests usan un backend en memoria.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::mpsc;

use super::error::VoiceError;
use crate::sources::AudioStream;

/// Señales del reproductor y la conexión hacia la sesión
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    /// El track `generation` terminó (natural o por `stop`)
    TrackEnded { generation: u64 },
    /// El track `generation` falló durante la reproducción
    TrackFailed { generation: u64, reason: String },
    /// Se cayó la conexión de voz
    Disconnected,
}

pub type SignalSender = mpsc::UnboundedSender<SessionSignal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<SessionSignal>;

/// Conexión y reproductor recién abiertos para una guild
pub struct VoiceLink {
    pub connection: Box<dyn VoiceConnection>,
    pub player: Box<dyn AudioPlayer>,
}

#[async_trait]
pub trait VoiceBackend: Send + Sync {
    /// Abre la conexión; las señales de esta conexión salen por `signals`
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        signals: SignalSender,
    ) -> Result<VoiceLink, VoiceError>;
}

#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Mueve la conexión a otro canal de la misma guild
    async fn relocate(&self, channel_id: ChannelId) -> Result<(), VoiceError>;

    /// Libera el transporte. Debe tolerar llamadas repetidas.
    async fn destroy(&self);
}

#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Empieza a reproducir `stream`; el fin del track se señala con `generation`
    async fn play(
        &self,
        stream: AudioStream,
        volume: f32,
        generation: u64,
    ) -> Result<Box<dyn PlaybackResource>, VoiceError>;

    /// Detiene lo que suena; el track detenido emite `TrackEnded`
    async fn stop(&self);
}

/// Recurso en reproducción con volumen ajustable
pub trait PlaybackResource: Send + Sync {
    fn set_volume(&self, volume: f32) -> Result<(), VoiceError>;
}
