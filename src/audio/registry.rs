use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{
    backend::{SignalReceiver, VoiceBackend},
    error::VoiceError,
    session::{SessionSettings, SignalOutcome, VoiceSession},
};

enum Slot {
    /// Reservado mientras se abre la conexión
    Joining,
    Active(Arc<VoiceSession>),
}

struct RegistryInner {
    sessions: DashMap<GuildId, Slot>,
    backend: Arc<dyn VoiceBackend>,
    settings: SessionSettings,
}

/// Registro de sesiones de voz, una por guild como máximo.
///
/// Se construye una vez al arrancar el proceso y se comparte clonándolo;
/// todos los clones ven el mismo mapa. No hay limpieza implícita: una
/// sesión sólo sale del registro con [`SessionRegistry::remove`].
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn VoiceBackend>, settings: SessionSettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                backend,
                settings,
            }),
        }
    }

    /// Abre la conexión y registra una sesión vacía.
    ///
    /// Falla con `AlreadyJoined` si la guild ya tiene sesión (o una en
    /// proceso de conexión).
    pub async fn create(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<VoiceSession>, VoiceError> {
        match self.inner.sessions.entry(guild_id) {
            Entry::Occupied(_) => return Err(VoiceError::AlreadyJoined(guild_id)),
            Entry::Vacant(slot) => {
                slot.insert(Slot::Joining);
            }
        }

        let (signals, receiver) = mpsc::unbounded_channel();
        let link = match self
            .inner
            .backend
            .connect(guild_id, channel_id, signals)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                self.inner.sessions.remove(&guild_id);
                error!("❌ No se pudo conectar en guild {}: {}", guild_id, e);
                return Err(e);
            }
        };

        let session = Arc::new(VoiceSession::new(
            guild_id,
            channel_id,
            link,
            self.inner.settings.clone(),
        ));

        let installed = match self.inner.sessions.get_mut(&guild_id) {
            Some(mut slot) if matches!(*slot, Slot::Joining) => {
                *slot = Slot::Active(session.clone());
                true
            }
            _ => false,
        };

        if !installed {
            // Alguien llamó a remove mientras conectábamos
            session.shutdown().await;
            return Err(VoiceError::ConnectionLost(format!(
                "conexión cancelada en guild {}",
                guild_id
            )));
        }

        self.spawn_signal_pump(session.clone(), receiver);
        info!("🔊 Conectado al canal {} en guild {}", channel_id, guild_id);

        Ok(session)
    }

    /// Sesión activa de la guild, si la hay
    pub fn find(&self, guild_id: GuildId) -> Option<Arc<VoiceSession>> {
        self.inner
            .sessions
            .get(&guild_id)
            .and_then(|slot| match &*slot {
                Slot::Active(session) => Some(session.clone()),
                Slot::Joining => None,
            })
    }

    /// Crea la sesión o la mueve si ya existe en otro canal
    pub async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<VoiceSession>, VoiceError> {
        if let Some(session) = self.find(guild_id) {
            if session.channel_id() != channel_id {
                session.rejoin(channel_id).await?;
            }
            return Ok(session);
        }

        self.create(guild_id, channel_id).await
    }

    /// Cierra la sesión y libera la conexión. Sin sesión no hace nada.
    pub async fn remove(&self, guild_id: GuildId) {
        let Some((_, slot)) = self.inner.sessions.remove(&guild_id) else {
            return;
        };

        if let Slot::Active(session) = slot {
            session.shutdown().await;
        }
    }

    /// Quita la sesión sólo si sigue siendo la registrada para su guild
    async fn remove_session(&self, session: &Arc<VoiceSession>) {
        let removed = self
            .inner
            .sessions
            .remove_if(&session.guild_id(), |_, slot| {
                matches!(slot, Slot::Active(current) if Arc::ptr_eq(current, session))
            })
            .is_some();

        if removed {
            session.shutdown().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Active(_)))
            .count()
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.inner
            .sessions
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Active(_)))
            .map(|slot| *slot.key())
            .collect()
    }

    /// Despacha las señales del transporte a la sesión hasta que se cierre.
    ///
    /// Las señales se procesan de a una y en orden de llegada.
    fn spawn_signal_pump(&self, session: Arc<VoiceSession>, mut receiver: SignalReceiver) {
        let registry = self.clone();

        tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    signal = receiver.recv() => match signal {
                        Some(signal) => signal,
                        None => break,
                    },
                    _ = session.closed() => break,
                };

                if session.handle_signal(signal).await == SignalOutcome::Quit {
                    registry.remove_session(&session).await;
                    break;
                }
            }

            debug!("Fin del despacho de señales de guild {}", session.guild_id());
        });
    }
}
