//! # Voice Session
//!
//! Máquina de estados de una guild: conexión, reproductor y cola.
//!
//! ```text
//! Idle ──play──▶ Loading ──recurso listo──▶ Playing ──fin──▶ Loading | Idle
//!   ▲                                          │
//!   └──────────────── stop ──▶ Stopped ◀───────┘
//! cualquier estado ──shutdown──▶ Destroyed
//! ```
//!
//! Las señales del reproductor (`TrackEnded`, `TrackFailed`) y de la
//! conexión (`Disconnected`) entran por [`VoiceSession::handle_signal`].
//! Cada track reproducido lleva un número de generación; una señal de una
//! generación que ya no suena se descarta. El fin de un track que todavía
//! no terminó de instalarse queda anotado y se aplica al instalarlo.
//!
//! El estado vive detrás de un `parking_lot::Mutex` que nunca se sostiene
//! a través de un `.await`. La sección crítica "sacar cabeza y arrancar la
//! siguiente" la protege [`AdvanceGuard`].

use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{
    backend::{AudioPlayer, PlaybackResource, SessionSignal, VoiceConnection, VoiceLink},
    error::VoiceError,
    queue::PlaybackQueue,
};
use crate::sources::{self, AudioStream, QueueEntry, TrackInfo};

/// Parámetros de cada sesión
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub default_volume: f32,
    pub retry_limit: u32,
    pub retry_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_volume: 1.0,
            retry_limit: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Conectado, sin nada que reproducir
    Idle,
    /// Resolviendo la fuente de la cabeza
    Loading,
    /// Recurso de la cabeza entregado al reproductor
    Playing,
    /// Detenido a pedido; sigue conectado
    Stopped,
    /// Conexión liberada; terminal
    Destroyed,
}

/// Resultado de procesar una señal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Continue,
    /// La conexión se perdió; hay que sacar la sesión del registro
    Quit,
}

/// Vista de sólo lectura para mostrar la cola
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub channel_id: ChannelId,
    pub phase: SessionPhase,
    pub volume: f32,
    pub repeat: bool,
    pub entries: Vec<TrackInfo>,
}

/// Token de exclusión de la sección crítica de avance.
///
/// `try_acquire` devuelve `None` si otro avance está en curso; el token
/// libera el guard al soltarse.
#[derive(Debug, Default)]
pub struct AdvanceGuard {
    busy: AtomicBool,
}

pub struct AdvanceToken<'a> {
    guard: &'a AdvanceGuard,
}

impl AdvanceGuard {
    pub fn try_acquire(&self) -> Option<AdvanceToken<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| AdvanceToken { guard: self })
    }

    #[cfg(test)]
    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for AdvanceToken<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

struct ActiveTrack {
    resource: Box<dyn PlaybackResource>,
    entry_id: u64,
    track_volume: f32,
}

struct SessionState {
    channel_id: ChannelId,
    queue: PlaybackQueue,
    current: Option<ActiveTrack>,
    volume: f32,
    repeat: bool,
    phase: SessionPhase,
    /// Generación del track instalado como actual
    generation: u64,
    /// Última generación emitida, instalada o no
    issued: u64,
    /// Generación entregada al reproductor que aún no se instaló
    pending: Option<u64>,
    /// La generación pendiente terminó antes de instalarse
    ended_early: Option<EarlyEnd>,
    /// Ticket de la carga vigente; cambiarlo cancela cargas en vuelo
    load_ticket: u64,
}

#[derive(Debug, Clone, Copy)]
struct EarlyEnd {
    generation: u64,
    failed: bool,
}

impl SessionState {
    fn begin_load(&mut self) -> u64 {
        self.load_ticket += 1;
        self.phase = SessionPhase::Loading;
        self.load_ticket
    }

    fn cancel_loads(&mut self) {
        self.load_ticket += 1;
    }
}

enum Attach {
    Started,
    /// La cabeza cambió mientras se resolvía; reintentar con la nueva
    HeadChanged,
    /// Sesión cerrada o carga reemplazada; descartar
    Cancelled,
}

pub struct VoiceSession {
    guild_id: GuildId,
    connection: Box<dyn VoiceConnection>,
    player: Box<dyn AudioPlayer>,
    state: Mutex<SessionState>,
    advancing: AdvanceGuard,
    alive: AtomicBool,
    closed: Notify,
    settings: SessionSettings,
}

impl VoiceSession {
    pub fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        link: VoiceLink,
        settings: SessionSettings,
    ) -> Self {
        Self {
            guild_id,
            connection: link.connection,
            player: link.player,
            state: Mutex::new(SessionState {
                channel_id,
                queue: PlaybackQueue::new(),
                current: None,
                volume: settings.default_volume,
                repeat: false,
                phase: SessionPhase::Idle,
                generation: 0,
                issued: 0,
                pending: None,
                ended_early: None,
                load_ticket: 0,
            }),
            advancing: AdvanceGuard::default(),
            alive: AtomicBool::new(true),
            closed: Notify::new(),
            settings,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.state.lock().channel_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            channel_id: state.channel_id,
            phase: state.phase,
            volume: state.volume,
            repeat: state.repeat,
            entries: state.queue.iter().map(|e| e.info.clone()).collect(),
        }
    }

    /// Agrega a la cola; si estaba vacía arranca la reproducción.
    ///
    /// Un error `SourceUnavailable` indica que la entrada (o las que le
    /// siguieron) se saltó; la sesión ya continuó con lo que quedaba.
    pub async fn play(&self, entry: QueueEntry) -> Result<(), VoiceError> {
        let ticket = {
            let mut state = self.state.lock();
            if !self.is_alive() {
                return Err(VoiceError::ConnectionLost(format!(
                    "la sesión de la guild {} ya se cerró",
                    self.guild_id
                )));
            }

            let was_empty = state.queue.is_empty();
            state.queue.append(entry);
            was_empty.then(|| state.begin_load())
        };

        match ticket {
            Some(ticket) => self.start_head(ticket).await,
            None => Ok(()),
        }
    }

    /// Fin del track `generation`: pasa a la siguiente entrada o a Idle.
    ///
    /// Señales duplicadas o de generaciones viejas no mueven la cola.
    pub async fn advance(&self, generation: u64) -> Result<(), VoiceError> {
        self.complete(generation, false).await
    }

    async fn complete(&self, generation: u64, failed: bool) -> Result<(), VoiceError> {
        {
            let mut state = self.state.lock();
            if state.pending == Some(generation) {
                debug!(
                    "Track {} terminó antes de instalarse en guild {}",
                    generation, self.guild_id
                );
                state.ended_early = Some(EarlyEnd { generation, failed });
                return Ok(());
            }
        }

        let Some(_token) = self.advancing.try_acquire() else {
            debug!("⏭️ Avance ya en curso en guild {}, señal ignorada", self.guild_id);
            return Ok(());
        };

        if !self.is_current_generation(generation) {
            debug!(
                "Señal de fin obsoleta (generación {}) en guild {}",
                generation, self.guild_id
            );
            return Ok(());
        }

        // Un tick para que asiente lo que esté en vuelo (skip, stop)
        tokio::task::yield_now().await;

        let ticket = {
            let mut state = self.state.lock();
            if !self.is_alive()
                || state.phase != SessionPhase::Playing
                || state.generation != generation
            {
                return Ok(());
            }

            state.current = None;
            let repeat = state.repeat;
            let has_next = state.queue.pop_head_for_advance(repeat).is_some();
            if has_next {
                Some(state.begin_load())
            } else {
                state.phase = SessionPhase::Idle;
                None
            }
        };

        match ticket {
            Some(ticket) => self.start_head(ticket).await,
            None => {
                info!("📭 Cola terminada en guild {}", self.guild_id);
                Ok(())
            }
        }
    }

    /// Salta `count` tracks contando el actual. Devuelve cuántos se saltaron.
    ///
    /// Si algo suena se detiene el reproductor y el avance lo hace la señal
    /// de fin; si la cabeza todavía se está cargando se quita aquí.
    pub async fn skip(&self, count: i64) -> usize {
        let (skipped, stop_player) = {
            let mut state = self.state.lock();
            if !self.is_alive() || state.queue.is_empty() {
                return 0;
            }

            let removed = state.queue.skip(count);
            match state.phase {
                SessionPhase::Playing => (removed + 1, true),
                SessionPhase::Loading => {
                    let repeat = state.repeat;
                    state.queue.pop_head_for_advance(repeat);
                    (removed + 1, false)
                }
                _ => (removed, false),
            }
        };

        info!("⏭️ Saltando {} track(s) en guild {}", skipped, self.guild_id);
        if stop_player {
            self.player.stop().await;
        }

        skipped
    }

    pub fn shuffle(&self) {
        self.state.lock().queue.shuffle_tail();
        info!("🔀 Cola mezclada en guild {}", self.guild_id);
    }

    pub fn set_repeat(&self, enabled: bool) {
        self.state.lock().repeat = enabled;
        if enabled {
            info!("🔁 Repetición activada en guild {}", self.guild_id);
        } else {
            info!("➡️ Repetición desactivada en guild {}", self.guild_id);
        }
    }

    /// Cambia el multiplicador de la sesión sin reiniciar el track.
    ///
    /// Devuelve la escala efectiva aplicada al recurso actual, si hay uno.
    pub fn set_volume(&self, level: f32) -> Result<Option<f32>, VoiceError> {
        if !level.is_finite() || level <= 0.0 {
            return Err(VoiceError::InvalidVolume(level));
        }

        let mut state = self.state.lock();
        state.volume = level;

        match &state.current {
            Some(active) => {
                let effective = active.track_volume * level;
                active.resource.set_volume(effective)?;
                info!(
                    "🔊 Volumen {}% en guild {} (efectivo {:.2})",
                    (level * 100.0) as u32,
                    self.guild_id,
                    effective
                );
                Ok(Some(effective))
            }
            None => Ok(None),
        }
    }

    /// Vacía la cola y detiene el reproductor; la sesión sigue conectada
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if !self.is_alive() {
                return;
            }

            state.queue.clear();
            state.current = None;
            state.phase = SessionPhase::Stopped;
            state.cancel_loads();
        }

        self.player.stop().await;
        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
    }

    /// Mueve la sesión a otro canal
    pub async fn rejoin(&self, channel_id: ChannelId) -> Result<(), VoiceError> {
        self.connection.relocate(channel_id).await?;
        self.state.lock().channel_id = channel_id;
        info!("🔀 Sesión de guild {} movida al canal {}", self.guild_id, channel_id);
        Ok(())
    }

    /// Procesa una señal del transporte
    pub async fn handle_signal(&self, signal: SessionSignal) -> SignalOutcome {
        match signal {
            SessionSignal::TrackEnded { generation } => {
                if let Err(e) = self.advance(generation).await {
                    warn!("⚠️ Error al avanzar la cola en guild {}: {}", self.guild_id, e);
                }
                SignalOutcome::Continue
            }
            SessionSignal::TrackFailed { generation, reason } => {
                warn!(
                    "❌ Track {} falló en guild {}: {}",
                    generation, self.guild_id, reason
                );
                if let Err(e) = self.complete(generation, true).await {
                    warn!("⚠️ Error al avanzar la cola en guild {}: {}", self.guild_id, e);
                }
                SignalOutcome::Continue
            }
            SessionSignal::Disconnected => {
                warn!("🔌 Conexión de voz perdida en guild {}", self.guild_id);
                SignalOutcome::Quit
            }
        }
    }

    /// Cierra la sesión: cola vacía, reproductor detenido, conexión liberada.
    ///
    /// Sólo la llama el registro; llamadas repetidas no hacen nada.
    pub(crate) async fn shutdown(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }

        {
            let mut state = self.state.lock();
            state.queue.clear();
            state.current = None;
            state.phase = SessionPhase::Destroyed;
            state.cancel_loads();
        }

        self.player.stop().await;
        self.connection.destroy().await;
        self.closed.notify_one();
        info!("👋 Sesión cerrada en guild {}", self.guild_id);
    }

    /// Se completa cuando la sesión se cerró
    pub(crate) async fn closed(&self) {
        if self.is_alive() {
            self.closed.notified().await;
        }
    }

    fn is_current_generation(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.phase == SessionPhase::Playing && state.generation == generation
    }

    /// Resuelve la cabeza y la entrega al reproductor.
    ///
    /// Las entradas cuya fuente no se puede abrir se descartan y se sigue
    /// con la próxima; se devuelve el primer error para informar al llamador.
    async fn start_head(&self, ticket: u64) -> Result<(), VoiceError> {
        let mut first_error = None;

        loop {
            let head = {
                let mut state = self.state.lock();
                if !self.is_alive() || state.load_ticket != ticket {
                    break;
                }

                match state.queue.head() {
                    Some(head) => head.clone(),
                    None => {
                        if state.phase == SessionPhase::Loading {
                            state.phase = SessionPhase::Idle;
                        }
                        break;
                    }
                }
            };

            info!("🎵 Cargando {} en guild {}", head.info.title, self.guild_id);

            let opened = sources::open_with_retry(
                head.source.as_ref(),
                self.settings.retry_limit,
                self.settings.retry_delay,
            )
            .await;

            let result = match opened {
                Ok(stream) => self.attach(&head, stream, ticket).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(Attach::Started) | Ok(Attach::Cancelled) => break,
                Ok(Attach::HeadChanged) => continue,
                Err(e) => {
                    warn!(
                        "⏭️ Saltando {} en guild {}: {}",
                        head.info.title, self.guild_id, e
                    );
                    self.discard_failed_head(head.id(), ticket);
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn attach(
        &self,
        head: &QueueEntry,
        stream: AudioStream,
        ticket: u64,
    ) -> Result<Attach, VoiceError> {
        let (generation, volume) = {
            let mut state = self.state.lock();
            if !self.is_alive() || state.load_ticket != ticket {
                return Ok(Attach::Cancelled);
            }
            if state.queue.head().map(QueueEntry::id) != Some(head.id()) {
                return Ok(Attach::HeadChanged);
            }

            state.issued += 1;
            state.pending = Some(state.issued);
            (state.issued, head.track_volume() * state.volume)
        };

        let resource = match self.player.play(stream, volume, generation).await {
            Ok(resource) => resource,
            Err(e) => {
                self.clear_pending(generation);
                return Err(e);
            }
        };

        let mut ended_early = false;
        let installed = {
            let mut state = self.state.lock();
            let still_current = self.is_alive()
                && state.load_ticket == ticket
                && state.queue.head().map(QueueEntry::id) == Some(head.id());
            if state.pending == Some(generation) {
                state.pending = None;
            }
            let early = state
                .ended_early
                .take_if(|end| end.generation == generation);

            if let (true, Some(end)) = (still_current, early) {
                // Ya terminó: se completa y se sigue con la cola.
                // Un track que falla al arrancar no se repite
                state.current = None;
                let repeat = state.repeat && !end.failed;
                state.queue.pop_head_for_advance(repeat);
                ended_early = true;
                false
            } else if still_current {
                // El volumen pudo cambiar mientras el reproductor arrancaba
                let effective = head.track_volume() * state.volume;
                if effective != volume {
                    resource.set_volume(effective)?;
                }

                state.current = Some(ActiveTrack {
                    resource,
                    entry_id: head.id(),
                    track_volume: head.track_volume(),
                });
                state.generation = generation;
                state.phase = SessionPhase::Playing;
                true
            } else {
                false
            }
        };

        if installed {
            info!("▶️ Reproduciendo {} en guild {}", head.info.title, self.guild_id);
            return Ok(Attach::Started);
        }

        if ended_early {
            info!("⏭️ {} terminó al arrancar en guild {}", head.info.title, self.guild_id);
            return Ok(Attach::HeadChanged);
        }

        // La sesión cambió durante el arranque: no dejar sonando un recurso huérfano
        debug!("Recurso descartado en guild {}", self.guild_id);
        self.player.stop().await;
        if self.is_alive() && self.state.lock().load_ticket == ticket {
            Ok(Attach::HeadChanged)
        } else {
            Ok(Attach::Cancelled)
        }
    }

    fn clear_pending(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.pending == Some(generation) {
            state.pending = None;
        }
        if state.ended_early.is_some_and(|end| end.generation == generation) {
            state.ended_early = None;
        }
    }

    fn discard_failed_head(&self, entry_id: u64, ticket: u64) {
        let mut state = self.state.lock();
        if state.load_ticket != ticket {
            return;
        }

        // Un track que no abre no se repite aunque `repeat` esté activo
        if state.queue.head().map(QueueEntry::id) == Some(entry_id) {
            state.queue.pop_head_for_advance(false);
        }
    }

    #[cfg(test)]
    pub(crate) fn current_entry_id(&self) -> Option<u64> {
        self.state.lock().current.as_ref().map(|active| active.entry_id)
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    #[cfg(test)]
    pub(crate) fn queued_titles(&self) -> Vec<String> {
        self.state
            .lock()
            .queue
            .iter()
            .map(|e| e.info.title.clone())
            .collect()
    }
}
