//! # Bot Module
//!
//! Discord glue for Ripple Music.
//!
//! This module contains:
//! - Command registration and handling
//! - The voice-state router that keeps sessions in sync with the bot's channel
//! - Per-user command cooldowns
//!
//! ## Architecture
//!
//! The bot is built around the [`RippleBot`] struct which implements
//! Serenity's [`EventHandler`] trait. Voice sessions live in a
//! [`SessionRegistry`] built once in `main`; the bot only looks sessions
//! up, creates them on `/join` or `/play`, and removes them on `/quit` or
//! when the router decides the session is over.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, ShardManager, VoiceState},
    async_trait,
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod cooldown;
pub mod handlers;
pub mod router;

use crate::{
    audio::{error::VoiceError, registry::SessionRegistry},
    config::Config,
};
use cooldown::Cooldown;
use router::{RouteAction, VoiceChange};

/// Shard manager shared through the client's `TypeMap`, used by `/ping`.
pub struct ShardManagerContainer;

impl TypeMapKey for ShardManagerContainer {
    type Value = Arc<ShardManager>;
}

/// Main Discord bot handler for Ripple Music.
///
/// ## Fields
///
/// - `config`: Bot configuration (tokens, limits, features)
/// - `registry`: One voice session per guild
/// - `http`: Shared HTTP client for downloads and songbird inputs
/// - `cooldown`: Per-user per-command rate limit
pub struct RippleBot {
    pub(crate) config: Arc<Config>,
    pub(crate) registry: SessionRegistry,
    pub(crate) http: reqwest::Client,
    pub(crate) cooldown: Cooldown,
}

impl RippleBot {
    pub fn new(config: Config, registry: SessionRegistry, http: reqwest::Client) -> Self {
        let cooldown = Cooldown::new(config.command_cooldown());

        Self {
            config: Arc::new(config),
            registry,
            http,
            cooldown,
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands are registered per-guild when `guild_id` is configured
    /// (~1 second propagation, useful for development) and globally
    /// otherwise (~1 hour propagation).
    ///
    /// The bot must have `applications.commands` permission in the target guild(s).
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    async fn apply_route(&self, guild_id: GuildId, action: RouteAction) {
        match action {
            RouteAction::Join(channel_id) => match self.registry.join(guild_id, channel_id).await {
                Ok(_) => {}
                // La sesión se está creando; ese mismo join movió al bot
                Err(VoiceError::AlreadyJoined(_)) => {
                    debug!("Join de guild {} ya en curso", guild_id)
                }
                Err(e) => warn!("⚠️ No se pudo seguir al bot en guild {}: {}", guild_id, e),
            },
            RouteAction::QuitEmptyChannel | RouteAction::QuitBotLeft => {
                if !self.config.auto_leave {
                    debug!("AutoLeave desactivado, se ignora {:?} en guild {}", action, guild_id);
                    return;
                }

                info!("🚪 Cerrando sesión de guild {} ({:?})", guild_id, action);
                self.registry.remove(guild_id).await;
            }
        }
    }
}

#[async_trait]
impl EventHandler for RippleBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Feeds member channel changes to the router.
    ///
    /// Only guilds with an active session (or bot moves) produce actions.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        let bot_id = ctx.cache.current_user().id;
        let change = VoiceChange {
            user_id: new.user_id,
            before: old.and_then(|state| state.channel_id),
            after: new.channel_id,
        };

        let occupancy = self
            .registry
            .find(guild_id)
            .map(|session| router::occupancy(&ctx.cache, guild_id, session.channel_id(), bot_id));

        if let Some(action) = router::route(&change, bot_id, occupancy.as_ref()) {
            self.apply_route(guild_id, action).await;
        }
    }
}
