use serenity::model::id::GuildId;
use thiserror::Error;

/// Errores del núcleo de voz.
///
/// "No hay sesión" no es un error: `SessionRegistry::find` devuelve `None`
/// y el llamador decide qué mostrar.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    /// Ya existe una sesión para la guild; usar `find`
    #[error("ya hay una sesión de voz activa en la guild {0}")]
    AlreadyJoined(GuildId),

    /// La fuente del track no pudo materializarse
    #[error("fuente de audio no disponible: {0}")]
    SourceUnavailable(String),

    /// El transporte de voz se cayó
    #[error("conexión de voz perdida: {0}")]
    ConnectionLost(String),

    /// El transporte rechazó la conexión
    #[error("no se pudo conectar al canal de voz: {0}")]
    Join(String),

    /// Multiplicador de volumen fuera de (0, ∞)
    #[error("volumen inválido: {0}")]
    InvalidVolume(f32),

    /// El reproductor rechazó el recurso
    #[error("error de reproducción: {0}")]
    Playback(String),
}
