//! # Audio Module
//!
//! Voice sessions for Ripple Music: one playback queue and one voice
//! connection per guild.
//!
//! ## Architecture
//!
//! ### [`registry`] - Session Registry
//! - At most one [`session::VoiceSession`] per guild
//! - Atomic creation; concurrent joins for the same guild race for one slot
//! - Pumps transport signals into each session
//!
//! ### [`session`] - Voice Session
//! - Playback state machine (Idle, Loading, Playing, Stopped, Destroyed)
//! - Skip, shuffle, repeat and volume control
//! - Generation-tagged completion signals so stale events never advance the queue
//!
//! ### [`queue`] - Playback Queue
//! - FIFO of entries; the head is what plays
//! - Repeat re-appends the finished head
//!
//! ### [`backend`] / [`songbird_backend`] - Voice Transport
//! - Traits the session core depends on
//! - songbird implementation used in production
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use ripple_music::audio::{registry::SessionRegistry, session::SessionSettings};
//! # use std::sync::Arc;
//! # async fn example(backend: Arc<dyn ripple_music::audio::backend::VoiceBackend>) -> anyhow::Result<()> {
//! use serenity::all::{ChannelId, GuildId};
//!
//! let registry = SessionRegistry::new(backend, SessionSettings::default());
//! let session = registry.create(GuildId::new(1), ChannelId::new(2)).await?;
//! session.skip(1).await;
//! registry.remove(GuildId::new(1)).await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod queue;
pub mod registry;
pub mod session;
pub mod songbird_backend;

#[cfg(test)]
pub mod testing;
