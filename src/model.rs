use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_type!(UserId);
id_type!(MovieId);
id_type!(EventId);
id_type!(ReviewId);

/// Who generated an event or review. `None` is the anonymous viewer.
pub type Viewer = Option<UserId>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub username: String,
    pub password_hash: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Movie {
    pub title: String,
    /// Minutes, always positive.
    pub duration: u32,
    pub description: String,
    pub url: String,
}

/// Longest offset a timestamp may carry, in seconds.
pub const MAX_PLAYBACK_SECS: f64 = u32::MAX as f64;

/// Offset into playback, in seconds. Always finite, non-negative and at most
/// [`MAX_PLAYBACK_SECS`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct PlaybackTime(f64);

impl PlaybackTime {
    pub fn from_secs(secs: f64) -> Result<PlaybackTime> {
        if secs.is_finite() && secs >= 0.0 && secs <= MAX_PLAYBACK_SECS {
            // adding zero turns -0.0 into 0.0 so equal times share a bit pattern
            Ok(PlaybackTime(secs + 0.0))
        } else {
            Err(Error::InvalidTimestamp(secs.to_string()))
        }
    }

    /// Parses `HH:MM:SS`, `MM:SS` or `SS`, where the seconds may be fractional.
    pub fn parse_clock(s: &str) -> Result<PlaybackTime> {
        let invalid = || Error::InvalidTimestamp(s.to_owned());
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() > 3 {
            return Err(invalid());
        }
        let (seconds, units) = parts.split_last().ok_or_else(invalid)?;
        let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
        if !seconds.is_finite() || seconds < 0.0 || (!units.is_empty() && seconds >= 60.0) {
            return Err(invalid());
        }
        let mut total = 0u64;
        for (i, unit) in units.iter().enumerate() {
            let value: u64 = unit.parse().map_err(|_| invalid())?;
            // minutes are bounded only when hours precede them
            if i > 0 && value >= 60 {
                return Err(invalid());
            }
            total = total
                .checked_mul(60)
                .and_then(|total| total.checked_add(value))
                .ok_or_else(invalid)?;
        }
        PlaybackTime::from_secs(total as f64 * 60.0 + seconds)
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Rounds to the nearest tenth of a second.
    pub fn to_tenths(self) -> PlaybackTime {
        PlaybackTime((self.0 * 10.0).round() / 10.0)
    }
}

impl PartialEq for PlaybackTime {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for PlaybackTime {}

impl PartialOrd for PlaybackTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PlaybackTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for PlaybackTime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl FromStr for PlaybackTime {
    type Err = Error;

    /// Accepts either a clock string or plain seconds.
    fn from_str(s: &str) -> Result<PlaybackTime> {
        if s.contains(':') {
            PlaybackTime::parse_clock(s)
        } else {
            let secs: f64 = s
                .trim()
                .parse()
                .map_err(|_| Error::InvalidTimestamp(s.to_owned()))?;
            PlaybackTime::from_secs(secs)
        }
    }
}

impl fmt::Display for PlaybackTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // round first so that 59.95 carries into the next minute
        let tenths = (self.0 * 10.0).round() as u64;
        let whole = tenths / 10;
        write!(
            f,
            "{:02}:{:02}:{:02}",
            whole / 3600,
            whole % 3600 / 60,
            whole % 60
        )?;
        if self.0.fract() != 0.0 {
            write!(f, ".{}", tenths % 10)?;
        }
        Ok(())
    }
}

/// What the viewer did at a point in playback. Ordered by name.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Play,
    Skip,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Play => "play",
            Action::Skip => "skip",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Action> {
        match s {
            "play" => Ok(Action::Play),
            "skip" => Ok(Action::Skip),
            other => Err(Error::InvalidAction(other.to_owned())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ViewEvent {
    pub id: EventId,
    pub viewer: Viewer,
    pub movie_id: MovieId,
    pub timestamp: PlaybackTime,
    pub action: Action,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Review {
    pub id: ReviewId,
    pub viewer: Viewer,
    pub movie_id: MovieId,
    pub rating: u8,
    pub comment: String,
}

/// Progress report from the playback widget.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SmartWatchEvent {
    pub id: EventId,
    pub movie_id: MovieId,
    pub timestamp: PlaybackTime,
    pub event: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> PlaybackTime {
        PlaybackTime::from_secs(s).unwrap()
    }

    #[test]
    fn parse_clock_formats() {
        assert_eq!(PlaybackTime::parse_clock("00:03:00").unwrap(), secs(180.0));
        assert_eq!(PlaybackTime::parse_clock("00:10:15").unwrap(), secs(615.0));
        assert_eq!(PlaybackTime::parse_clock("01:00:00").unwrap(), secs(3600.0));
        assert_eq!(PlaybackTime::parse_clock("2:30").unwrap(), secs(150.0));
        assert_eq!(PlaybackTime::parse_clock("75:00").unwrap(), secs(4500.0));
        assert_eq!(PlaybackTime::parse_clock("12.5").unwrap(), secs(12.5));
    }

    #[test]
    fn parse_clock_rejects_garbage() {
        for input in &["", "aa:bb", "00:61:00", "00:00:60", "1:2:3:4", "-5", "00:-1:00"] {
            assert!(
                PlaybackTime::parse_clock(input).is_err(),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn from_secs_rejects_negative_and_nan() {
        assert!(PlaybackTime::from_secs(-0.5).is_err());
        assert!(PlaybackTime::from_secs(f64::NAN).is_err());
        assert!(PlaybackTime::from_secs(f64::INFINITY).is_err());
        assert_eq!(PlaybackTime::from_secs(-0.0).unwrap(), secs(0.0));
    }

    #[test]
    fn from_secs_rejects_huge_offsets() {
        assert_eq!(secs(MAX_PLAYBACK_SECS).as_secs(), MAX_PLAYBACK_SECS);
        for input in &[MAX_PLAYBACK_SECS + 1.0, 1e20, f64::MAX] {
            match PlaybackTime::from_secs(*input) {
                Err(Error::InvalidTimestamp(_)) => {}
                other => panic!("accepted {}: {:?}", input, other),
            }
        }
        assert!("1e20".parse::<PlaybackTime>().is_err());
        assert!(PlaybackTime::parse_clock("99999999999:00:00").is_err());
        assert!(PlaybackTime::parse_clock("999999999999999999:00:00").is_err());
    }

    #[test]
    fn from_str_accepts_both_encodings() {
        assert_eq!("00:00:42".parse::<PlaybackTime>().unwrap(), secs(42.0));
        assert_eq!("42.3".parse::<PlaybackTime>().unwrap(), secs(42.3));
    }

    #[test]
    fn display() {
        assert_eq!(secs(1245.0).to_string(), "00:20:45");
        assert_eq!(secs(3725.0).to_string(), "01:02:05");
        assert_eq!(secs(12.5).to_string(), "00:00:12.5");
        assert_eq!(secs(59.95).to_string(), "00:01:00.0");
        assert_eq!(secs(3599.96).to_string(), "01:00:00.0");
        assert_eq!(secs(0.04).to_string(), "00:00:00.0");
    }

    #[test]
    fn tenths() {
        assert_eq!(secs(12.34).to_tenths(), secs(12.3));
        assert_eq!(secs(12.36).to_tenths(), secs(12.4));
    }

    #[test]
    fn action_order_is_by_name() {
        assert!(Action::Play < Action::Skip);
        assert_eq!("skip".parse::<Action>().unwrap(), Action::Skip);
        assert!("pause".parse::<Action>().is_err());
    }
}
