//! Server configuration, loaded from a TOML file the way the teacher
//! project's own config layer works: a plain `serde`-derived struct with
//! sensible defaults, never read from process-wide global state.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: General,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct General {
    pub host: String,
    pub port: u16,
    /// Trace-log every packet sent/received, hex-dumped. Expensive; meant
    /// for debugging a live handshake, not production use.
    pub protocol_analysis: bool,
    /// Disconnect a client after this many milliseconds of inactivity.
    pub idle_timeout_ms: u64,
}

impl Default for General {
    fn default() -> Self {
        General {
            host: "0.0.0.0".to_owned(),
            port: 25565,
            protocol_analysis: false,
            idle_timeout_ms: 30_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config { general: General::default() }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        toml::from_str(s).map_err(|e| Error::BadFormat(format!("invalid config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.general.host, self.general.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_document() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.general.port, 25565);
        assert!(!config.general.protocol_analysis);
    }

    #[test]
    fn overrides_apply() {
        let config = Config::from_toml_str(
            r#"
            [general]
            host = "127.0.0.1"
            port = 25566
            protocol_analysis = true
            "#,
        )
        .unwrap();
        assert_eq!(config.general.host, "127.0.0.1");
        assert_eq!(config.general.port, 25566);
        assert!(config.general.protocol_analysis);
    }

    #[test]
    fn malformed_toml_is_bad_format() {
        assert!(matches!(Config::from_toml_str("not valid [ toml"), Err(Error::BadFormat(_))));
    }
}
