//! Backend de voz en memoria para tests.
//!
//! `FakeVoice` registra lo que se reprodujo y se comporta como el
//! reproductor real: `stop` emite `TrackEnded` para el track que sonaba.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Notify};

use super::{
    backend::{
        AudioPlayer, PlaybackResource, SessionSignal, SignalReceiver, SignalSender, VoiceBackend,
        VoiceConnection, VoiceLink,
    },
    error::VoiceError,
    session::{SessionSettings, VoiceSession},
};
use crate::sources::{AudioStream, QueueEntry, SourceError, TrackInfo, TrackSource};

#[derive(Debug, Default)]
pub struct FakeVoiceState {
    /// (stream, volumen inicial, generación) en orden de reproducción
    pub played: Vec<(AudioStream, f32, u64)>,
    /// Volumen vigente por generación
    pub volumes: HashMap<u64, f32>,
    pub playing: Option<u64>,
    pub stops: usize,
    pub destroyed: bool,
    pub channel: Option<ChannelId>,
    /// Cada track falla apenas arranca, antes de que `play` vuelva
    pub fail_on_play: bool,
    /// Si está, `play` no vuelve hasta que el test lo libere
    pub play_gate: Option<Arc<Notify>>,
}

pub struct FakeVoice {
    pub state: Mutex<FakeVoiceState>,
    signals: SignalSender,
}

impl FakeVoice {
    pub fn new(signals: SignalSender) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeVoiceState::default()),
            signals,
        })
    }

    /// Simula el fin natural del track que suena
    pub fn finish_current(&self) -> Option<SessionSignal> {
        let generation = self.state.lock().playing.take()?;
        Some(SessionSignal::TrackEnded { generation })
    }

    /// Fin natural entregado por el canal de señales, como el reproductor real
    pub fn end_current(&self) {
        if let Some(signal) = self.finish_current() {
            let _ = self.signals.send(signal);
        }
    }

    pub fn disconnect(&self) {
        let _ = self.signals.send(SessionSignal::Disconnected);
    }

    /// Títulos (URL) reproducidos en orden
    pub fn played_urls(&self) -> Vec<String> {
        self.state
            .lock()
            .played
            .iter()
            .map(|(stream, _, _)| match stream {
                AudioStream::Url(url) => url.clone(),
                other => format!("{:?}", other),
            })
            .collect()
    }

    pub fn current_volume(&self) -> Option<f32> {
        let state = self.state.lock();
        state.playing.and_then(|g| state.volumes.get(&g).copied())
    }
}

struct FakeConnection(Arc<FakeVoice>);

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn relocate(&self, channel_id: ChannelId) -> Result<(), VoiceError> {
        self.0.state.lock().channel = Some(channel_id);
        Ok(())
    }

    async fn destroy(&self) {
        self.0.state.lock().destroyed = true;
    }
}

struct FakePlayer(Arc<FakeVoice>);

#[async_trait]
impl AudioPlayer for FakePlayer {
    async fn play(
        &self,
        stream: AudioStream,
        volume: f32,
        generation: u64,
    ) -> Result<Box<dyn PlaybackResource>, VoiceError> {
        let (fail, gate) = {
            let mut state = self.0.state.lock();
            state.played.push((stream, volume, generation));
            state.volumes.insert(generation, volume);
            if !state.fail_on_play {
                state.playing = Some(generation);
            }
            (state.fail_on_play, state.play_gate.clone())
        };

        if fail {
            let _ = self.0.signals.send(SessionSignal::TrackFailed {
                generation,
                reason: "decodificación".to_string(),
            });
            tokio::task::yield_now().await;
        }
        if let Some(gate) = gate {
            gate.notified().await;
        }

        Ok(Box::new(FakeResource {
            voice: self.0.clone(),
            generation,
        }))
    }

    async fn stop(&self) {
        let ended = {
            let mut state = self.0.state.lock();
            state.stops += 1;
            state.playing.take()
        };

        if let Some(generation) = ended {
            let _ = self.0.signals.send(SessionSignal::TrackEnded { generation });
        }
    }
}

struct FakeResource {
    voice: Arc<FakeVoice>,
    generation: u64,
}

impl PlaybackResource for FakeResource {
    fn set_volume(&self, volume: f32) -> Result<(), VoiceError> {
        self.voice
            .state
            .lock()
            .volumes
            .insert(self.generation, volume);
        Ok(())
    }
}

/// Arma un link falso y devuelve también el lado de control
pub fn fake_link(signals: SignalSender) -> (VoiceLink, Arc<FakeVoice>) {
    let voice = FakeVoice::new(signals);
    let link = VoiceLink {
        connection: Box::new(FakeConnection(voice.clone())),
        player: Box::new(FakePlayer(voice.clone())),
    };
    (link, voice)
}

/// Sesión aislada con su receptor de señales
pub fn fake_session() -> (Arc<VoiceSession>, Arc<FakeVoice>, SignalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (link, voice) = fake_link(tx);
    let settings = SessionSettings {
        retry_delay: Duration::ZERO,
        ..SessionSettings::default()
    };
    let session = Arc::new(VoiceSession::new(
        GuildId::new(1),
        ChannelId::new(10),
        link,
        settings,
    ));
    (session, voice, rx)
}

/// Entrega a la sesión todas las señales pendientes, incluidas las que
/// genere al procesarlas
pub async fn drain_signals(session: &VoiceSession, rx: &mut SignalReceiver) {
    while let Ok(signal) = rx.try_recv() {
        session.handle_signal(signal).await;
    }
}

/// Backend que entrega conexiones falsas y guarda su lado de control
#[derive(Default)]
pub struct FakeBackend {
    pub voices: DashMap<GuildId, Arc<FakeVoice>>,
    pub fail_connect: AtomicBool,
    pub connects: AtomicUsize,
}

impl FakeBackend {
    pub fn voice(&self, guild_id: GuildId) -> Option<Arc<FakeVoice>> {
        self.voices.get(&guild_id).map(|v| v.clone())
    }
}

#[async_trait]
impl VoiceBackend for FakeBackend {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        signals: SignalSender,
    ) -> Result<VoiceLink, VoiceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(VoiceError::Join("canal lleno".to_string()));
        }

        let (link, voice) = fake_link(signals);
        voice.state.lock().channel = Some(channel_id);
        self.voices.insert(guild_id, voice);
        Ok(link)
    }
}

/// Fuente que siempre abre la misma URL
pub struct StaticSource(pub String);

#[async_trait]
impl TrackSource for StaticSource {
    async fn open(&self) -> Result<AudioStream, SourceError> {
        Ok(AudioStream::Url(self.0.clone()))
    }

    fn describe(&self) -> String {
        format!("static:{}", self.0)
    }
}

/// Fuente que siempre falla
pub struct BrokenSource {
    pub transient: bool,
    pub attempts: AtomicUsize,
}

impl BrokenSource {
    pub fn new(transient: bool) -> Self {
        Self {
            transient,
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TrackSource for BrokenSource {
    async fn open(&self) -> Result<AudioStream, SourceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.transient {
            Err(SourceError::Transient("connection reset".to_string()))
        } else {
            Err(SourceError::Fatal("404".to_string()))
        }
    }

    fn describe(&self) -> String {
        "broken".to_string()
    }
}

/// Fuente que no termina de abrir hasta que el test la libera
pub struct GatedSource {
    pub url: String,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedSource {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl TrackSource for GatedSource {
    async fn open(&self) -> Result<AudioStream, SourceError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(AudioStream::Url(self.url.clone()))
    }

    fn describe(&self) -> String {
        format!("gated:{}", self.url)
    }
}

pub fn track(name: &str) -> QueueEntry {
    QueueEntry::new(
        Arc::new(StaticSource(url_for(name))),
        TrackInfo::new(name, serenity::model::id::UserId::new(42)),
    )
}

pub fn url_for(name: &str) -> String {
    format!("https://cdn.example.com/{}.ogg", name)
}

/// Espera hasta que `condition` se cumpla o pase un segundo
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
