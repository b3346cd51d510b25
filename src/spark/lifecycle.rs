// Countdown to expiry. A pure function of two timestamps; callers re-run it
// on their own tick (the CLI's `show --live` does so every second).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Remaining {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Countdown {
    Active(Remaining),
    Expired,
}

impl Countdown {
    pub fn is_expired(&self) -> bool {
        matches!(self, Countdown::Expired)
    }
}

/// Time left until `expires_at`, or `Expired` once `now >= expires_at`.
pub fn remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Countdown {
    if now >= expires_at {
        return Countdown::Expired;
    }
    let diff_ms = (expires_at - now).num_milliseconds();
    Countdown::Active(Remaining {
        hours: diff_ms / 3_600_000,
        minutes: (diff_ms % 3_600_000) / 60_000,
        seconds: (diff_ms % 60_000) / 1_000,
    })
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Countdown::Active(r) => write!(f, "{}h {}m {}s", r.hours, r.minutes, r.seconds),
            Countdown::Expired => write!(f, "Expired"),
        }
    }
}
