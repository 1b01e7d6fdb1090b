use crate::analytics::{SegmentWidth, DEFAULT_SEGMENT_WIDTH};
use clap::Parser;
use std::path::PathBuf;

// Cookie keys shorter than this are rejected by the identity policy.
const MIN_COOKIE_KEY_LEN: usize = 32;

/// Movie reviews and viewing engagement analytics
#[derive(Parser, Debug, Clone)]
#[command(name = "reelpulse", version)]
pub struct Config {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080", env = "REELPULSE_BIND")]
    pub bind: String,

    /// Database directory; a temporary database is used when omitted
    #[arg(long, env = "REELPULSE_DATABASE")]
    pub database: Option<PathBuf>,

    /// Directory containing the page templates
    #[arg(
        long,
        default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/templates"),
        env = "REELPULSE_TEMPLATES"
    )]
    pub templates: PathBuf,

    /// Heatmap segment width in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_SEGMENT_WIDTH,
        value_parser = clap::value_parser!(u32).range(1..),
        env = "REELPULSE_SEGMENT_WIDTH"
    )]
    pub segment_width: u32,

    /// Secret for signing session cookies, at least 32 bytes
    #[arg(
        long,
        default_value = "reelpulse-development-cookie-key-change-me",
        env = "REELPULSE_COOKIE_KEY"
    )]
    pub cookie_key: String,

    /// Add a demo movie when the catalog is empty
    #[arg(long)]
    pub seed_demo: bool,
}

/// Values the request handlers need.
#[derive(Debug, Clone)]
pub struct Settings {
    pub segment_width: SegmentWidth,
}

impl Config {
    pub fn open_database(&self) -> sled::Result<sled::Db> {
        match &self.database {
            Some(path) => sled::open(path),
            None => sled::Config::new().temporary(true).open(),
        }
    }

    pub fn templates_glob(&self) -> String {
        format!("{}/**/*", self.templates.display())
    }

    pub fn cookie_key(&self) -> Result<Vec<u8>, String> {
        let key = self.cookie_key.as_bytes();
        if key.len() < MIN_COOKIE_KEY_LEN {
            return Err(format!(
                "cookie key must be at least {} bytes",
                MIN_COOKIE_KEY_LEN
            ));
        }
        Ok(key.to_vec())
    }

    pub fn settings(&self) -> crate::error::Result<Settings> {
        Ok(Settings {
            segment_width: SegmentWidth::new(self.segment_width)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(&["reelpulse"]).unwrap();
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.database, None);
        assert_eq!(config.segment_width, 10);
        assert!(!config.seed_demo);
        assert!(config.cookie_key().is_ok());
        assert!(config.templates_glob().ends_with("templates/**/*"));
        assert_eq!(config.settings().unwrap().segment_width.secs(), 10);
    }

    #[test]
    fn overrides() {
        let config = Config::try_parse_from(&[
            "reelpulse",
            "--bind",
            "0.0.0.0:9000",
            "--database",
            "/tmp/reelpulse",
            "--segment-width",
            "30",
            "--seed-demo",
        ])
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.database, Some(PathBuf::from("/tmp/reelpulse")));
        assert_eq!(config.settings().unwrap().segment_width.secs(), 30);
        assert!(config.seed_demo);
    }

    #[test]
    fn zero_segment_width_is_rejected() {
        assert!(Config::try_parse_from(&["reelpulse", "--segment-width", "0"]).is_err());
    }

    #[test]
    fn short_cookie_key_is_rejected() {
        let config = Config::try_parse_from(&["reelpulse", "--cookie-key", "short"]).unwrap();
        assert!(config.cookie_key().is_err());
    }
}
