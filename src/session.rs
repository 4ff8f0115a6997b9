use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Trading session label used as a cache-invalidation boundary.
/// Detections made under one volatility regime must not leak into the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionLabel {
    Asian,
    London,
    NewYork,
}

impl std::fmt::Display for SessionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Session in effect at `timestamp`, by UTC hour window:
/// 21:00-06:59 Asian, 07:00-12:59 London, 13:00-20:59 New York.
pub fn session_at(timestamp: DateTime<Utc>) -> SessionLabel {
    match timestamp.hour() {
        7..=12 => SessionLabel::London,
        13..=20 => SessionLabel::NewYork,
        _ => SessionLabel::Asian,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 30, 0).unwrap()
    }

    #[test]
    fn session_windows() {
        assert_eq!(session_at(at_hour(2)), SessionLabel::Asian);
        assert_eq!(session_at(at_hour(8)), SessionLabel::London);
        assert_eq!(session_at(at_hour(15)), SessionLabel::NewYork);
        assert_eq!(session_at(at_hour(22)), SessionLabel::Asian);
    }

    #[test]
    fn london_open_is_a_boundary() {
        assert_ne!(session_at(at_hour(6)), session_at(at_hour(7)));
    }
}
