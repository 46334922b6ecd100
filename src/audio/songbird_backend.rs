use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    events::{
        context_data::{DisconnectKind, DisconnectReason},
        CoreEvent,
    },
    input::{File, HttpRequest, Input, YoutubeDl},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    backend::{
        AudioPlayer, PlaybackResource, SessionSignal, SignalSender, VoiceBackend,
        VoiceConnection, VoiceLink,
    },
    error::VoiceError,
};
use crate::sources::AudioStream;

/// Transporte de voz real sobre songbird
pub struct SongbirdBackend {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdBackend {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self { manager, http }
    }
}

#[async_trait]
impl VoiceBackend for SongbirdBackend {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        signals: SignalSender,
    ) -> Result<VoiceLink, VoiceError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| VoiceError::Join(e.to_string()))?;

        {
            let mut handler = call.lock().await;
            handler.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DisconnectNotifier {
                    guild_id,
                    signals: signals.clone(),
                },
            );
        }

        Ok(VoiceLink {
            connection: Box::new(SongbirdConnection {
                manager: self.manager.clone(),
                guild_id,
            }),
            player: Box::new(SongbirdPlayer {
                call,
                http: self.http.clone(),
                signals,
            }),
        })
    }
}

struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild_id: GuildId,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn relocate(&self, channel_id: ChannelId) -> Result<(), VoiceError> {
        self.manager
            .join(self.guild_id, channel_id)
            .await
            .map(|_| ())
            .map_err(|e| VoiceError::Join(e.to_string()))
    }

    async fn destroy(&self) {
        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Conexión de guild {} ya liberada: {}", self.guild_id, e);
        }
    }
}

struct SongbirdPlayer {
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    signals: SignalSender,
}

impl SongbirdPlayer {
    fn to_input(&self, stream: AudioStream) -> Input {
        match stream {
            AudioStream::Url(url) => HttpRequest::new(self.http.clone(), url).into(),
            AudioStream::YoutubeDl(url) => YoutubeDl::new(self.http.clone(), url).into(),
            AudioStream::YoutubeSearch(query) => {
                YoutubeDl::new_search(self.http.clone(), query).into()
            }
            AudioStream::File(path) => File::new(path).into(),
            AudioStream::Bytes(bytes) => Input::from(bytes),
        }
    }
}

#[async_trait]
impl AudioPlayer for SongbirdPlayer {
    async fn play(
        &self,
        stream: AudioStream,
        volume: f32,
        generation: u64,
    ) -> Result<Box<dyn PlaybackResource>, VoiceError> {
        let input = self.to_input(stream);

        let handle = {
            let mut handler = self.call.lock().await;
            handler.play_input(input)
        };

        arm_track(&handle, volume, generation, &self.signals)?;

        Ok(Box::new(SongbirdResource { handle }))
    }

    async fn stop(&self) {
        self.call.lock().await.stop();
    }
}

/// Operaciones sobre un track recién lanzado
#[cfg_attr(test, mockall::automock)]
trait TrackControl {
    fn set_volume(&self, volume: f32) -> Result<(), String>;
    fn watch(&self, generation: u64, signals: SignalSender) -> Result<(), String>;
    fn stop(&self);
}

impl TrackControl for TrackHandle {
    fn set_volume(&self, volume: f32) -> Result<(), String> {
        TrackHandle::set_volume(self, volume).map_err(|e| e.to_string())
    }

    fn watch(&self, generation: u64, signals: SignalSender) -> Result<(), String> {
        for event in [TrackEvent::End, TrackEvent::Error] {
            self.add_event(
                Event::Track(event),
                TrackSignal {
                    generation,
                    signals: signals.clone(),
                },
            )
            .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn stop(&self) {
        if let Err(e) = TrackHandle::stop(self) {
            debug!("Track ya detenido: {}", e);
        }
    }
}

/// Aplica volumen y handlers de fin; si algo falla el track se detiene
/// para que no quede sonando sin dueño.
fn arm_track(
    track: &impl TrackControl,
    volume: f32,
    generation: u64,
    signals: &SignalSender,
) -> Result<(), VoiceError> {
    let armed = track
        .set_volume(volume)
        .and_then(|_| track.watch(generation, signals.clone()));

    if let Err(e) = armed {
        track.stop();
        return Err(VoiceError::Playback(e));
    }
    Ok(())
}

struct SongbirdResource {
    handle: TrackHandle,
}

impl PlaybackResource for SongbirdResource {
    fn set_volume(&self, volume: f32) -> Result<(), VoiceError> {
        self.handle
            .set_volume(volume)
            .map_err(|e| VoiceError::Playback(e.to_string()))
    }
}

/// Traduce eventos de un track a señales de la sesión
struct TrackSignal {
    generation: u64,
    signals: SignalSender,
}

#[async_trait]
impl VoiceEventHandler for TrackSignal {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let failure = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{:?}", e)),
                _ => None,
            }),
            _ => None,
        };

        let signal = match failure {
            Some(reason) => SessionSignal::TrackFailed {
                generation: self.generation,
                reason,
            },
            None => SessionSignal::TrackEnded {
                generation: self.generation,
            },
        };

        let _ = self.signals.send(signal);
        None
    }
}

/// Avisa a la sesión cuando el driver pierde la conexión
struct DisconnectNotifier {
    guild_id: GuildId,
    signals: SignalSender,
}

#[async_trait]
impl VoiceEventHandler for DisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::DriverDisconnect(data) = ctx else {
            return None;
        };

        if !ends_session(data.kind, data.reason) {
            debug!(
                "Desconexión {:?} ({:?}) en guild {} no cierra la sesión",
                data.kind, data.reason, self.guild_id
            );
            return None;
        }

        warn!(
            "🔌 Driver de voz desconectado en guild {}: {:?} ({:?})",
            self.guild_id, data.kind, data.reason
        );
        let _ = self.signals.send(SessionSignal::Disconnected);
        None
    }
}

/// Decide si una desconexión del driver termina la sesión.
///
/// Sin motivo o con `Requested` la pidió el propio bot (salir o cambiar
/// de canal); `AttemptDiscarded` es un intento reemplazado por otro más
/// nuevo. Un cierre reanudable lo reconecta songbird. El resto llega
/// cuando songbird ya agotó sus reintentos.
fn ends_session(kind: DisconnectKind, reason: Option<DisconnectReason>) -> bool {
    match (kind, reason) {
        (_, None | Some(DisconnectReason::Requested | DisconnectReason::AttemptDiscarded)) => {
            false
        }
        (DisconnectKind::Runtime, Some(DisconnectReason::WsClosed(Some(code)))) => {
            !code.should_resume()
        }
        (_, Some(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use songbird::model::CloseCode;
    use tokio::sync::mpsc;

    fn signals() -> SignalSender {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn test_arm_track_keeps_track_on_success() {
        let mut track = MockTrackControl::new();
        track
            .expect_set_volume()
            .with(eq(0.5))
            .times(1)
            .returning(|_| Ok(()));
        track
            .expect_watch()
            .withf(|generation, _| *generation == 7)
            .times(1)
            .returning(|_, _| Ok(()));
        track.expect_stop().never();

        assert!(arm_track(&track, 0.5, 7, &signals()).is_ok());
    }

    #[test]
    fn test_arm_track_stops_track_when_volume_fails() {
        let mut track = MockTrackControl::new();
        track
            .expect_set_volume()
            .returning(|_| Err("track finalizado".to_string()));
        track.expect_watch().never();
        track.expect_stop().times(1).return_const(());

        let err = arm_track(&track, 1.0, 1, &signals()).unwrap_err();
        assert_eq!(err, VoiceError::Playback("track finalizado".to_string()));
    }

    #[test]
    fn test_arm_track_stops_track_when_events_fail() {
        let mut track = MockTrackControl::new();
        track.expect_set_volume().returning(|_| Ok(()));
        track
            .expect_watch()
            .returning(|_, _| Err("handler rechazado".to_string()));
        track.expect_stop().times(1).return_const(());

        assert!(arm_track(&track, 1.0, 1, &signals()).is_err());
    }

    #[test]
    fn test_requested_disconnects_keep_session() {
        assert!(!ends_session(DisconnectKind::Runtime, None));
        assert!(!ends_session(
            DisconnectKind::Runtime,
            Some(DisconnectReason::Requested)
        ));
        assert!(!ends_session(
            DisconnectKind::Connect,
            Some(DisconnectReason::AttemptDiscarded)
        ));
    }

    #[test]
    fn test_resumable_close_keeps_session() {
        assert!(!ends_session(
            DisconnectKind::Runtime,
            Some(DisconnectReason::WsClosed(Some(CloseCode::VoiceServerCrash)))
        ));
    }

    #[test]
    fn test_exhausted_or_fatal_disconnects_end_session() {
        assert!(ends_session(
            DisconnectKind::Runtime,
            Some(DisconnectReason::WsClosed(Some(CloseCode::Disconnected)))
        ));
        assert!(ends_session(
            DisconnectKind::Reconnect,
            Some(DisconnectReason::TimedOut)
        ));
        assert!(ends_session(DisconnectKind::Connect, Some(DisconnectReason::Io)));
    }
}
