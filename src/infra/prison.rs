//! Prison — the Ban List
//!
//! Tracks outpoints excluded from participation for a time window.
//! Cheating offenses serve the long sentence, disruption the short one.
//! Punishment is idempotent: a new sentence never shortens one already
//! being served.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CoordinatorConfig;
use crate::core::coin::OutPoint;
use crate::error::Offense;
use crate::round::round::RoundId;

/// One served sentence.
#[derive(Clone, Debug)]
pub struct Sentence {
    /// What the outpoint did.
    pub offense: Offense,
    /// Round the offense happened in.
    pub round_id: RoundId,
    /// When the ban lifts.
    pub until: Instant,
    /// Client-facing end of the ban window.
    pub until_utc: DateTime<Utc>,
}

/// The ban list.
#[derive(Debug)]
pub struct Prison {
    cheating_ban: Duration,
    disruption_ban: Duration,
    inmates: Mutex<HashMap<OutPoint, Sentence>>,
}

impl Prison {
    /// Create a prison with explicit ban windows.
    pub fn new(cheating_ban: Duration, disruption_ban: Duration) -> Self {
        Self { cheating_ban, disruption_ban, inmates: Mutex::new(HashMap::new()) }
    }

    /// Create a prison from the coordinator configuration.
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.cheating_ban_duration, config.disruption_ban_duration)
    }

    /// Ban an outpoint for an offense evidenced in `round_id`.
    ///
    /// If the outpoint is already serving a sentence that ends later,
    /// the existing sentence stands unchanged.
    pub fn punish(&self, outpoint: OutPoint, offense: Offense, round_id: RoundId, now: Instant) {
        let duration = if offense.is_cheating() { self.cheating_ban } else { self.disruption_ban };
        let until = now + duration;
        let mut inmates = self.inmates.lock().unwrap();
        match inmates.get(&outpoint) {
            Some(existing) if existing.until >= until => {
                warn!(%outpoint, ?offense, "already serving a longer sentence");
            }
            _ => {
                info!(%outpoint, ?offense, round_id = %round_id, "outpoint banned");
                inmates.insert(outpoint, Sentence {
                    offense,
                    round_id,
                    until,
                    until_utc: DateTime::<Utc>::from(SystemTime::now() + duration),
                });
            }
        }
    }

    /// The sentence the outpoint is serving, if any.
    pub fn sentence(&self, outpoint: &OutPoint, now: Instant) -> Option<Sentence> {
        let mut inmates = self.inmates.lock().unwrap();
        match inmates.get(outpoint) {
            Some(sentence) if sentence.until > now => Some(sentence.clone()),
            Some(_) => {
                inmates.remove(outpoint);
                None
            }
            None => None,
        }
    }

    /// Whether the outpoint is currently banned.
    pub fn is_banned(&self, outpoint: &OutPoint, now: Instant) -> bool {
        self.sentence(outpoint, now).is_some()
    }

    /// Drop every sentence whose window has passed.
    pub fn release_expired(&self, now: Instant) {
        self.inmates.lock().unwrap().retain(|_, s| s.until > now);
    }

    /// Current inmate count.
    pub fn count(&self) -> usize {
        self.inmates.lock().unwrap().len()
    }
}
