//! Decide qué hacer con la sesión de una guild ante un cambio de estado
//! de voz. La decisión es pura; `RippleBot` arma las entradas desde la
//! caché de serenity y aplica la acción.

use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId, UserId},
};

/// Cambio de canal de un miembro
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceChange {
    pub user_id: UserId,
    pub before: Option<ChannelId>,
    pub after: Option<ChannelId>,
}

/// Canal de la sesión y cuántas personas (no bots) quedan en él
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOccupancy {
    pub channel_id: ChannelId,
    pub humans: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    /// El bot fue movido a otro canal
    Join(ChannelId),
    /// No queda nadie escuchando
    QuitEmptyChannel,
    /// El bot salió (o lo sacaron) del canal
    QuitBotLeft,
}

/// Aplica las reglas en orden; como máximo una se dispara por evento.
///
/// `session` es la ocupación del canal de la sesión activa, si existe.
pub fn route(
    change: &VoiceChange,
    bot_id: UserId,
    session: Option<&ChannelOccupancy>,
) -> Option<RouteAction> {
    let is_bot = change.user_id == bot_id;

    if is_bot && change.before != change.after {
        if let Some(channel_id) = change.after {
            return Some(RouteAction::Join(channel_id));
        }
    }

    if let Some(occupancy) = session {
        if occupancy.humans == 0 {
            return Some(RouteAction::QuitEmptyChannel);
        }
    }

    if is_bot && change.before.is_some() && change.after.is_none() {
        return Some(RouteAction::QuitBotLeft);
    }

    None
}

/// Cuenta los miembros humanos conectados a `channel_id` según la caché
pub fn occupancy(
    cache: &Cache,
    guild_id: GuildId,
    channel_id: ChannelId,
    bot_id: UserId,
) -> ChannelOccupancy {
    let humans = cache
        .guild(guild_id)
        .map(|guild| {
            guild
                .voice_states
                .values()
                .filter(|state| state.channel_id == Some(channel_id))
                .filter(|state| state.user_id != bot_id)
                .filter(|state| !state.member.as_ref().is_some_and(|m| m.user.bot))
                .count()
        })
        .unwrap_or(0);

    ChannelOccupancy { channel_id, humans }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BOT: UserId = UserId::new(1);
    const USER: UserId = UserId::new(2);
    const C1: ChannelId = ChannelId::new(10);
    const C2: ChannelId = ChannelId::new(20);

    fn change(user_id: UserId, before: Option<ChannelId>, after: Option<ChannelId>) -> VoiceChange {
        VoiceChange {
            user_id,
            before,
            after,
        }
    }

    fn occupied(humans: usize) -> ChannelOccupancy {
        ChannelOccupancy {
            channel_id: C1,
            humans,
        }
    }

    #[test]
    fn test_bot_moved_rejoins() {
        assert_eq!(
            route(&change(BOT, Some(C1), Some(C2)), BOT, Some(&occupied(3))),
            Some(RouteAction::Join(C2))
        );
    }

    #[test]
    fn test_last_listener_leaving_quits() {
        assert_eq!(
            route(&change(USER, Some(C1), None), BOT, Some(&occupied(0))),
            Some(RouteAction::QuitEmptyChannel)
        );
        assert_eq!(
            route(&change(USER, Some(C1), None), BOT, Some(&occupied(1))),
            None
        );
    }

    #[test]
    fn test_bot_leaving_quits() {
        assert_eq!(
            route(&change(BOT, Some(C1), None), BOT, Some(&occupied(2))),
            Some(RouteAction::QuitBotLeft)
        );
    }

    #[test]
    fn test_empty_channel_wins_over_bot_leaving() {
        assert_eq!(
            route(&change(BOT, Some(C1), None), BOT, Some(&occupied(0))),
            Some(RouteAction::QuitEmptyChannel)
        );
    }

    #[test]
    fn test_no_session_ignores_other_members() {
        assert_eq!(route(&change(USER, None, Some(C1)), BOT, None), None);
        assert_eq!(route(&change(USER, Some(C1), None), BOT, None), None);
    }

    #[test]
    fn test_bot_without_channel_change_is_ignored() {
        // Mute/deafen del bot llega como cambio sin mover de canal
        assert_eq!(
            route(&change(BOT, Some(C1), Some(C1)), BOT, Some(&occupied(1))),
            None
        );
    }
}
