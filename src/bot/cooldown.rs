use dashmap::DashMap;
use serenity::model::id::UserId;
use std::time::{Duration, Instant};

/// Límite de frecuencia por usuario y comando
pub struct Cooldown {
    window: Duration,
    last_used: DashMap<(UserId, String), Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_used: DashMap::new(),
        }
    }

    /// Registra el uso o devuelve cuánto falta para poder repetirlo
    pub fn check(&self, user_id: UserId, command: &str) -> Result<(), Duration> {
        self.check_at(user_id, command, Instant::now())
    }

    fn check_at(&self, user_id: UserId, command: &str, now: Instant) -> Result<(), Duration> {
        // Las entradas vencidas ya no limitan a nadie
        self.last_used
            .retain(|_, last| now.saturating_duration_since(*last) < self.window);

        let key = (user_id, command.to_string());
        if let Some(last) = self.last_used.get(&key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.window {
                return Err(self.window - elapsed);
            }
        }

        self.last_used.insert(key, now);
        Ok(())
    }

    /// Mensaje legible con el tiempo restante
    pub fn describe(remaining: Duration) -> String {
        // Redondeado a segundos para no mostrar nanosegundos
        let secs = Duration::from_secs(remaining.as_secs().max(1));
        format!(
            "⏳ Espera {} antes de repetir el comando",
            humantime::format_duration(secs)
        )
    }
}
