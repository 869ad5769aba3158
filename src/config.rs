//! On-disk agent configuration (ambient stack, mirroring the teacher's
//! `config`/`config::customer` modules: a `serde`+`toml` struct loaded from
//! a path, with defaults supplied for every optional field).

use std::convert::TryInto;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

#[cfg(all(not(debug_assertions), feature = "allow_custom_retry_floor"))]
compile_error!(
    "crate cannot be built for release with the `allow_custom_retry_floor` feature enabled"
);

/// Minimum `retry_wait` enforced unless `allow_custom_retry_floor` is set:
/// a busy retry loop against an unreachable peer is indistinguishable from
/// a connect-flood (spec §4.2's retry loop has no other backpressure).
const RETRY_WAIT_FLOOR: Duration = Duration::from_secs(1);

fn deserialize_retry_wait<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw: Duration = humantime_serde::deserialize(deserializer)?;

    #[cfg(feature = "allow_custom_retry_floor")]
    {
        Ok(raw)
    }

    #[cfg(not(feature = "allow_custom_retry_floor"))]
    {
        if raw < RETRY_WAIT_FLOOR {
            eprintln!(
                "Ignoring retry_wait of {raw:?} below the {RETRY_WAIT_FLOOR:?} floor because \
                this binary was built to enforce it"
            );
            Ok(RETRY_WAIT_FLOOR)
        } else {
            Ok(raw)
        }
    }
}

pub mod defaults {
    use super::Duration;

    pub const fn retry_total() -> Duration {
        Duration::from_secs(300)
    }

    pub const fn retry_wait() -> Duration {
        Duration::from_secs(5)
    }

    pub const fn comms() -> Duration {
        Duration::from_secs(600)
    }

    pub const fn expiry() -> Duration {
        Duration::from_secs(7 * 24 * 60 * 60)
    }

    pub fn server_name() -> String {
        "localhost".to_string()
    }
}

/// The retry/expiry/comms budgets consulted by the Establisher and the
/// dispatch loop (spec §3's timeouts record, §4.2, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct Timeouts {
    #[serde(with = "humantime_serde", default = "defaults::retry_total")]
    pub retry_total: Duration,
    #[serde(
        serialize_with = "humantime_serde::serialize",
        deserialize_with = "deserialize_retry_wait",
        default = "defaults::retry_wait"
    )]
    pub retry_wait: Duration,
    #[serde(with = "humantime_serde", default = "defaults::comms")]
    pub comms: Duration,
    #[serde(with = "humantime_serde", default = "defaults::expiry")]
    pub expiry: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            retry_total: defaults::retry_total(),
            retry_wait: defaults::retry_wait(),
            comms: defaults::comms(),
            expiry: defaults::expiry(),
        }
    }
}

/// Top-level agent configuration loaded from a TOML file (spec.md treats
/// configuration loading itself as outside the core, but a runnable binary
/// still needs one, grounded in the teacher's `config::customer::Config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
#[non_exhaustive]
pub struct AgentConfig {
    /// Transport URL per spec.md §4.1/§6's grammar.
    pub url: String,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Server name presented during the TLS handshake's SNI (spec §4.5).
    #[serde(default = "defaults::server_name")]
    pub server_name: String,
    /// Hex-encoded 32-byte ChaCha20 key; absent means packets beyond
    /// PLAIN_REQUEST/PLAIN_RESPONSE travel unencrypted.
    #[serde(default)]
    pub cipher_key: Option<String>,
}

impl AgentConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let contents = tokio::fs::read_to_string(&path).await?;
        let config: AgentConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn cipher(&self) -> Result<Option<crate::crypto::ChaCha20Cipher>, anyhow::Error> {
        match &self.cipher_key {
            None => Ok(None),
            Some(hex_key) => {
                let bytes = hex::decode(hex_key)?;
                let key: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("cipher_key must be exactly 32 bytes hex-encoded"))?;
                Ok(Some(crate::crypto::ChaCha20Cipher::new(key)))
            }
        }
    }
}

/// Default config file location, mirroring `zeekoe`'s use of `directories`
/// to locate a per-user configuration home.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "relaylink")
        .map(|dirs| dirs.config_dir().join("agent.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_round_trip_through_toml() {
        let toml_str = r#"
            retry_total = "1m"
            retry_wait = "1s"
            comms = "10m"
            expiry = "7d"
        "#;
        let timeouts: Timeouts = toml::from_str(toml_str).unwrap();
        assert_eq!(timeouts.retry_total, Duration::from_secs(60));
        assert_eq!(timeouts.comms, Duration::from_secs(600));
    }

    #[test]
    #[cfg(not(feature = "allow_custom_retry_floor"))]
    fn retry_wait_below_floor_is_clamped() {
        let toml_str = r#"
            retry_total = "1m"
            retry_wait = "10ms"
            comms = "10m"
            expiry = "7d"
        "#;
        let timeouts: Timeouts = toml::from_str(toml_str).unwrap();
        assert_eq!(timeouts.retry_wait, RETRY_WAIT_FLOOR);
    }

    #[test]
    fn agent_config_fills_in_defaults() {
        let toml_str = r#"url = "tcp://10.0.0.5:4444""#;
        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server_name, "localhost");
        assert_eq!(config.timeouts.retry_wait, Duration::from_secs(5));
    }
}
