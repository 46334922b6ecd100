use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::{CommandDataOptionValue, CommandInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        error::VoiceError,
        session::{SessionPhase, SessionSnapshot, VoiceSession},
    },
    bot::{cooldown::Cooldown, RippleBot, ShardManagerContainer},
    sources::{self, QueueEntry, TrackInfo},
};

/// Entradas de la cola que se listan en `/queue`
const QUEUE_PAGE: usize = 10;

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RippleBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond(ctx, &command, "❌ Este comando sólo funciona en un servidor", true).await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    if let Err(remaining) = bot.cooldown.check(command.user.id, &command.data.name) {
        return respond(ctx, &command, Cooldown::describe(remaining), true).await;
    }

    match command.data.name.as_str() {
        "join" => handle_join(ctx, &command, bot, guild_id).await?,
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await?,
        "ping" => handle_ping(ctx, &command).await?,
        "info" => handle_info(ctx, &command, bot).await?,
        "skip" | "shuffle" | "repeat" | "volume" | "stop" | "quit" => {
            handle_control(ctx, &command, bot, guild_id).await?
        }
        _ => {
            respond(ctx, &command, "❌ Comando no reconocido", true).await?;
        }
    }

    Ok(())
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &RippleBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(channel_id) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        return respond(ctx, command, "❌ Debes estar en un canal de voz", true).await;
    };

    let message = match bot.registry.join(guild_id, channel_id).await {
        Ok(_) => format!("🔊 Conectado a <#{}>", channel_id),
        Err(VoiceError::AlreadyJoined(_)) => "⏳ Ya me estoy conectando".to_string(),
        Err(e) => {
            warn!("No se pudo unir a {} en guild {}: {}", channel_id, guild_id, e);
            format!("❌ {}", e)
        }
    };

    respond(ctx, command, message, false).await
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &RippleBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = option(command, "query")
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    let track_volume = match option(command, "volume").and_then(|value| value.as_i64()) {
        Some(percent) => match percent_to_volume(percent) {
            Some(volume) => Some(volume),
            None => return respond(ctx, command, "❌ El volumen va de 1 a 200", true).await,
        },
        None => None,
    };

    // Defer la respuesta ya que resolver la fuente puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let session = match bot.registry.find(guild_id) {
        Some(session) => session,
        None => {
            let Some(channel_id) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
                return edit(ctx, command, "❌ Debes estar en un canal de voz").await;
            };

            match bot.registry.join(guild_id, channel_id).await {
                Ok(session) => session,
                Err(e) => {
                    warn!("No se pudo unir a {} en guild {}: {}", channel_id, guild_id, e);
                    return edit(ctx, command, format!("❌ {}", e)).await;
                }
            }
        }
    };

    if session.queue_len() >= bot.config.max_queue_size {
        return edit(
            ctx,
            command,
            format!("❌ La cola está llena ({} canciones)", bot.config.max_queue_size),
        )
        .await;
    }

    let source = sources::resolve_query(&query, &bot.http);
    debug!("Fuente elegida para '{}': {}", query, source.describe());

    let mut entry = QueueEntry::new(source, TrackInfo::new(query.clone(), command.user.id));
    if let Some(volume) = track_volume {
        entry = entry.with_volume(volume);
    }

    let message = match session.play(entry).await {
        Ok(()) => format!("🎵 Agregado: **{}** (posición {})", query, session.queue_len()),
        Err(VoiceError::SourceUnavailable(reason)) => {
            warn!("Fuente no disponible en guild {}: {}", guild_id, reason);
            format!("❌ No se pudo reproducir **{}**", query)
        }
        Err(e) => format!("❌ {}", e),
    };

    edit(ctx, command, message).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &RippleBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = bot.registry.find(guild_id) else {
        return respond(ctx, command, NO_SESSION, true).await;
    };

    respond(ctx, command, format_queue(&session.snapshot()), false).await
}

async fn handle_ping(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    let latency = shard_latency(ctx).await;
    respond(ctx, command, format_ping(latency, ctx.shard_id.0), true).await
}

async fn handle_info(ctx: &Context, command: &CommandInteraction, bot: &RippleBot) -> Result<()> {
    let guilds = ctx.cache.guilds();
    let members = guilds
        .iter()
        .filter_map(|id| ctx.cache.guild(*id).map(|guild| guild.member_count))
        .sum();

    let stats = BotStats {
        guilds: guilds.len(),
        members,
        shard: ctx.shard_id.0,
        shard_count: ctx.cache.shard_count(),
        sessions: bot.registry.len(),
    };

    respond(ctx, command, format_info(&stats), true).await
}

/// Latencia del último heartbeat del shard que atiende la interacción
async fn shard_latency(ctx: &Context) -> Option<Duration> {
    let manager = ctx.data.read().await.get::<ShardManagerContainer>()?.clone();
    let runners = manager.runners.lock().await;
    runners.get(&ctx.shard_id).and_then(|runner| runner.latency)
}

const NO_SESSION: &str = "❌ No estoy conectado a un canal de voz";

/// Comandos que operan sobre la sesión existente.
///
/// Exigen que quien los usa esté en el mismo canal que el bot.
async fn handle_control(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &RippleBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = bot.registry.find(guild_id) else {
        return respond(ctx, command, NO_SESSION, true).await;
    };

    if get_user_voice_channel(ctx, guild_id, command.user.id) != Some(session.channel_id()) {
        return respond(ctx, command, "❌ Debes estar en mi canal de voz", true).await;
    }

    let message = match command.data.name.as_str() {
        "skip" => {
            let count = option(command, "count")
                .and_then(|value| value.as_i64())
                .unwrap_or(1);
            match session.skip(count).await {
                0 => "❌ No hay nada que saltar".to_string(),
                n => format!("⏭️ Saltadas {} canciones", n),
            }
        }
        "shuffle" => {
            session.shuffle();
            "🔀 Cola mezclada".to_string()
        }
        "repeat" => {
            let enabled = option(command, "enabled")
                .and_then(|value| value.as_bool())
                .unwrap_or(false);
            session.set_repeat(enabled);
            if enabled {
                "🔁 Repetición activada".to_string()
            } else {
                "➡️ Repetición desactivada".to_string()
            }
        }
        "volume" => set_volume(&session, option(command, "level").and_then(|v| v.as_i64())),
        "stop" => {
            session.stop().await;
            "⏹️ Reproducción detenida y cola limpiada".to_string()
        }
        "quit" => {
            bot.registry.remove(guild_id).await;
            "👋 Desconectado del canal de voz".to_string()
        }
        other => format!("❌ Comando no reconocido: {}", other),
    };

    respond(ctx, command, message, false).await
}

fn set_volume(session: &VoiceSession, percent: Option<i64>) -> String {
    let Some(level) = percent.and_then(percent_to_volume) else {
        return "❌ El volumen va de 1 a 200".to_string();
    };

    match session.set_volume(level) {
        Ok(_) => format!("🔊 Volumen ajustado a {}%", (level * 100.0).round() as u32),
        Err(e) => format!("❌ {}", e),
    }
}

/// Porcentaje de Discord (1-200) a multiplicador
fn percent_to_volume(percent: i64) -> Option<f32> {
    (1..=200).contains(&percent).then(|| percent as f32 / 100.0)
}

fn format_queue(snapshot: &SessionSnapshot) -> String {
    if snapshot.entries.is_empty() {
        return "📭 La cola está vacía".to_string();
    }

    let status = match snapshot.phase {
        SessionPhase::Playing => "▶️",
        SessionPhase::Loading => "⏳",
        _ => "⏸️",
    };

    let mut lines = Vec::with_capacity(QUEUE_PAGE + 2);
    for (i, info) in snapshot.entries.iter().take(QUEUE_PAGE).enumerate() {
        if i == 0 {
            lines.push(format!("{} **{}** (<@{}>)", status, info.title, info.requested_by));
        } else {
            lines.push(format!("`{}.` {} (<@{}>)", i, info.title, info.requested_by));
        }
    }

    if snapshot.entries.len() > QUEUE_PAGE {
        lines.push(format!("… y {} más", snapshot.entries.len() - QUEUE_PAGE));
    }

    lines.push(format!(
        "📍 <#{}> · 🔊 {}% · 🔁 {}",
        snapshot.channel_id,
        (snapshot.volume * 100.0).round() as u32,
        if snapshot.repeat { "sí" } else { "no" }
    ));

    lines.join("\n")
}

fn format_ping(latency: Option<Duration>, shard: u32) -> String {
    match latency {
        Some(latency) => format!(
            "🏓 Pong! Gateway a {}ms · shard #{}",
            latency.as_millis(),
            shard
        ),
        None => format!("🏓 Pong! Latencia aún sin medir · shard #{}", shard),
    }
}

struct BotStats {
    guilds: usize,
    members: u64,
    /// Índice base cero
    shard: u32,
    shard_count: u32,
    sessions: usize,
}

fn format_info(stats: &BotStats) -> String {
    [
        format!("🤖 **Ripple Music** v{}", env!("CARGO_PKG_VERSION")),
        format!("🏠 Servidores: `{}`", stats.guilds),
        format!("👥 Miembros: `{}`", stats.members),
        format!("🧩 Shard `{}` de `{}`", stats.shard + 1, stats.shard_count.max(1)),
        format!("🔊 Sesiones de voz activas: `{}`", stats.sessions),
    ]
    .join("\n")
}

// Funciones auxiliares

fn option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a CommandDataOptionValue> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .map(|opt| &opt.value)
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    content: impl Into<String>,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;

    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;

    Ok(())
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(titles: &[&str]) -> SessionSnapshot {
        SessionSnapshot {
            channel_id: ChannelId::new(2),
            phase: SessionPhase::Playing,
            volume: 0.5,
            repeat: true,
            entries: titles
                .iter()
                .map(|title| TrackInfo::new(*title, UserId::new(9)))
                .collect(),
        }
    }

    #[test]
    fn test_percent_to_volume_bounds() {
        assert_eq!(percent_to_volume(0), None);
        assert_eq!(percent_to_volume(1), Some(0.01));
        assert_eq!(percent_to_volume(150), Some(1.5));
        assert_eq!(percent_to_volume(201), None);
    }

    #[test]
    fn test_format_empty_queue() {
        assert_eq!(format_queue(&snapshot(&[])), "📭 La cola está vacía");
    }

    #[test]
    fn test_format_queue_marks_head_and_settings() {
        let text = format_queue(&snapshot(&["uno", "dos"]));
        assert_eq!(
            text,
            "▶️ **uno** (<@9>)\n`1.` dos (<@9>)\n📍 <#2> · 🔊 50% · 🔁 sí"
        );
    }

    #[test]
    fn test_format_ping_with_latency() {
        assert_eq!(
            format_ping(Some(Duration::from_millis(42)), 0),
            "🏓 Pong! Gateway a 42ms · shard #0"
        );
    }

    #[test]
    fn test_format_ping_before_first_heartbeat() {
        assert_eq!(
            format_ping(None, 3),
            "🏓 Pong! Latencia aún sin medir · shard #3"
        );
    }

    #[test]
    fn test_format_info_lists_counts_and_shard() {
        let stats = BotStats {
            guilds: 12,
            members: 3400,
            shard: 1,
            shard_count: 4,
            sessions: 2,
        };

        assert_eq!(
            format_info(&stats),
            format!(
                "🤖 **Ripple Music** v{}\n🏠 Servidores: `12`\n👥 Miembros: `3400`\n🧩 Shard `2` de `4`\n🔊 Sesiones de voz activas: `2`",
                env!("CARGO_PKG_VERSION")
            )
        );
    }

    #[test]
    fn test_format_info_before_shard_count_is_known() {
        let stats = BotStats {
            guilds: 0,
            members: 0,
            shard: 0,
            shard_count: 0,
            sessions: 0,
        };

        assert!(format_info(&stats).contains("🧩 Shard `1` de `1`"));
    }

    #[test]
    fn test_format_queue_truncates_long_queues() {
        let titles: Vec<String> = (0..25).map(|i| format!("t{}", i)).collect();
        let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
        let text = format_queue(&snapshot(&refs));

        assert_eq!(text.lines().count(), QUEUE_PAGE + 2);
        assert!(text.contains("… y 15 más"));
        assert!(!text.contains("t10"));
    }
}
