//! File-based configuration for a whole server.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//!
//! [connection]
//! socket_read_timeout = 5000
//!
//! [request]
//! body_size = 1048576
//!
//! [security]
//! jail_duration = 600000
//! suspicious_paths = [".env", "wp-login.php"]
//!
//! [mime]
//! mkv = "video/x-matroska"
//! ```
//!
//! Every section is optional. [`Config::load`] reads the file named by
//! `HEARTH_CONFIG` (when set) and then applies `HEARTH_LISTEN`.

use crate::limits::{ConnLimits, ReqLimits, RespLimits, SecurityLimits};
use anyhow::Context;
use serde::Deserialize;
use std::{collections::BTreeMap, net::SocketAddr, path::Path};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "HEARTH_CONFIG";
/// Environment variable overriding [`Config::listen`].
pub const LISTEN_ENV: &str = "HEARTH_LISTEN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the demo binary binds (default: `127.0.0.1:8080`).
    pub listen: SocketAddr,

    pub connection: ConnLimits,
    pub request: ReqLimits,
    pub response: RespLimits,
    pub security: SecurityLimits,

    /// Extra `suffix = "mime/type"` pairs for file responses.
    pub mime: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            connection: ConnLimits::default(),
            request: ReqLimits::default(),
            response: RespLimits::default(),
            security: SecurityLimits::default(),
            mime: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Loads from the environment: the file named by `HEARTH_CONFIG` (or the
    /// defaults), then the `HEARTH_LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var_os(CONFIG_ENV);
        let listen = std::env::var(LISTEN_ENV).ok();

        Self::load_from(path.as_deref().map(Path::new), listen.as_deref())
    }

    fn load_from(path: Option<&Path>, listen: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                tracing::debug!("loading configuration from {}", path.display());
                Self::from_file(path)?
            }
            None => Self::default(),
        };

        if let Some(listen) = listen {
            config.listen = listen
                .parse()
                .with_context(|| format!("{LISTEN_ENV} is not a socket address: {listen:?}"))?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn partial_file() {
        let config = Config::from_toml_str(
            r#"
            listen = "0.0.0.0:9000"

            [request]
            header_count = 20

            [security]
            jail_duration = 1500
            suspicious_paths = [".env"]

            [mime]
            mkv = "video/x-matroska"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.request.header_count, 20);
        assert_eq!(config.request.body_size, ReqLimits::default().body_size);
        assert_eq!(config.security.jail_duration, Duration::from_millis(1500));
        assert_eq!(config.security.suspicious_paths, [".env"]);
        assert_eq!(config.mime["mkv"], "video/x-matroska");
        assert_eq!(config.response.server_token, "hearth");
    }

    #[test]
    fn rejects_garbage() {
        #[rustfmt::skip]
        let cases = [
            "listen = \"not an address\"",
            "[request]\nheader_count = \"many\"",
            "unknown_section = 1",
        ];

        for text in cases {
            assert!(Config::from_toml_str(text).is_err(), "{text}");
        }
    }

    #[test]
    fn environment_overrides() {
        let path = std::env::temp_dir().join("hearth_config_overrides.toml");
        std::fs::write(&path, "listen = \"127.0.0.1:7000\"\n[response]\nserver_token = \"x\"\n").unwrap();

        let config = Config::load_from(Some(&path), None).unwrap();
        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.response.server_token, "x");

        let config = Config::load_from(Some(&path), Some("10.0.0.1:81")).unwrap();
        assert_eq!(config.listen, "10.0.0.1:81".parse().unwrap());

        assert!(Config::load_from(None, Some("nope")).is_err());
        assert_eq!(Config::load_from(None, None).unwrap().listen.port(), 8080);

        let missing = std::env::temp_dir().join("hearth_config_missing.toml");
        assert!(Config::load_from(Some(&missing), None).is_err());

        std::fs::remove_file(path).unwrap();
    }
}
