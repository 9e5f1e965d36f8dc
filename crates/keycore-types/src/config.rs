//! Key-management configuration with sensible defaults.
//!
//! All operational parameters are centralized here. Every value has a
//! documented default; environment variables may override the ones the
//! key core consumes at runtime (see [`EnvOverrides`]).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{KeycoreError, Result, ShareConfig};

// ---------------------------------------------------------------------------
// Environment variable names
// ---------------------------------------------------------------------------

/// BIP-39 mnemonic phrase for the environment backend.
pub const ENV_MNEMONIC: &str = "LUX_MNEMONIC";

/// Hex-encoded secp256k1 private key (optional `0x` prefix).
pub const ENV_PRIVATE_KEY: &str = "LUX_PRIVATE_KEY";

/// Hex-encoded BLS private key, used alongside [`ENV_PRIVATE_KEY`].
pub const ENV_BLS_KEY: &str = "LUX_BLS_KEY";

/// Keystore password used when no explicit password is supplied.
pub const ENV_KEY_PASSWORD: &str = "LUX_KEY_PASSWORD";

/// Session inactivity timeout override (e.g. `"45s"`, `"5m"`).
pub const ENV_SESSION_TIMEOUT: &str = "LUX_KEY_SESSION_TIMEOUT";

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Inactivity timeout after which an unlocked key locks itself.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for any session timeout; longer values are clamped.
pub const MAX_SESSION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Timeout for ordinary K-Chain RPC calls.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for flows that wait on human or device approval.
pub const DEFAULT_SIGNING_TIMEOUT: Duration = Duration::from_secs(300);

/// Default K-Chain endpoint (963N port range).
pub const DEFAULT_KCHAIN_ENDPOINT: &str = "http://localhost:9630";

/// Default validator set used by `save_key` on the distributed backend.
pub const DEFAULT_VALIDATORS: [&str; 5] = [
    "validator-1.kchain.lux.network:9630",
    "validator-2.kchain.lux.network:9631",
    "validator-3.kchain.lux.network:9632",
    "validator-4.kchain.lux.network:9633",
    "validator-5.kchain.lux.network:9634",
];

/// Default reconstruction threshold (K of [`DEFAULT_VALIDATORS`]).
pub const DEFAULT_THRESHOLD: usize = 3;

// ---------------------------------------------------------------------------
// KeycoreConfig
// ---------------------------------------------------------------------------

/// Configuration for the key backends.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeycoreConfig {
    /// Base directory holding one sub-directory per key set.
    pub data_dir: PathBuf,

    /// Sliding inactivity timeout for unlocked sessions.
    #[serde(with = "duration_secs")]
    pub session_timeout: Duration,

    /// K-Chain JSON-RPC endpoint (scheme + host + port).
    pub kchain_endpoint: String,

    /// Optional bearer token for the K-Chain endpoint.
    pub kchain_api_key: Option<String>,

    /// Timeout applied to each K-Chain RPC call.
    #[serde(with = "duration_secs")]
    pub rpc_timeout: Duration,

    /// Timeout for signing flows that await remote approval.
    #[serde(with = "duration_secs")]
    pub signing_timeout: Duration,

    /// Validator addresses used when no explicit share config is given.
    pub default_validators: Vec<String>,

    /// Threshold K used with [`Self::default_validators`].
    pub default_threshold: usize,
}

impl Default for KeycoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            kchain_endpoint: DEFAULT_KCHAIN_ENDPOINT.to_owned(),
            kchain_api_key: None,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            signing_timeout: DEFAULT_SIGNING_TIMEOUT,
            default_validators: DEFAULT_VALIDATORS.iter().map(|s| s.to_string()).collect(),
            default_threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl KeycoreConfig {
    /// Default configuration with a custom data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Applies environment overrides on top of `self`.
    pub fn with_env(mut self, env: &EnvOverrides) -> Self {
        if let Some(timeout) = env.session_timeout {
            self.session_timeout = timeout;
        }
        self
    }

    /// Share config built from the default validator set.
    pub fn default_share_config(&self) -> ShareConfig {
        ShareConfig::new(self.default_threshold, self.default_validators.clone())
    }

    /// Validates all configuration values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(KeycoreError::ConfigError {
                reason: "data_dir must not be empty".into(),
            });
        }

        if self.session_timeout.is_zero() {
            return Err(KeycoreError::ConfigError {
                reason: "session_timeout must be greater than 0".into(),
            });
        }

        if self.session_timeout > MAX_SESSION_TIMEOUT {
            return Err(KeycoreError::ConfigError {
                reason: format!(
                    "session_timeout must not exceed {}s",
                    MAX_SESSION_TIMEOUT.as_secs()
                ),
            });
        }

        if self.rpc_timeout.is_zero() || self.signing_timeout.is_zero() {
            return Err(KeycoreError::ConfigError {
                reason: "rpc and signing timeouts must be greater than 0".into(),
            });
        }

        if !(self.kchain_endpoint.starts_with("http://")
            || self.kchain_endpoint.starts_with("https://"))
        {
            return Err(KeycoreError::ConfigError {
                reason: format!(
                    "kchain_endpoint must be an http(s) URL, got '{}'",
                    self.kchain_endpoint
                ),
            });
        }

        self.default_share_config()
            .validate()
            .map_err(|e| KeycoreError::ConfigError {
                reason: format!("default validator set: {e}"),
            })
    }
}

/// `$HOME/.lux/keys`, or `./.lux/keys` when no home directory is set.
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lux")
        .join("keys")
}

// ---------------------------------------------------------------------------
// EnvOverrides
// ---------------------------------------------------------------------------

/// Values read from the process environment.
///
/// Every field is optional. Invalid values are dropped here so callers
/// fall back to safe defaults rather than failing at startup.
#[derive(Clone, Default)]
pub struct EnvOverrides {
    /// `LUX_MNEMONIC`, trimmed.
    pub mnemonic: Option<String>,
    /// `LUX_PRIVATE_KEY` with any `0x` prefix removed.
    pub private_key_hex: Option<String>,
    /// `LUX_BLS_KEY` with any `0x` prefix removed.
    pub bls_key_hex: Option<String>,
    /// `LUX_KEY_PASSWORD`.
    pub password: Option<String>,
    /// Parsed `LUX_KEY_SESSION_TIMEOUT`, present only if positive.
    pub session_timeout: Option<Duration>,
}

// EnvOverrides does not implement Debug to prevent leakage.

impl EnvOverrides {
    /// Reads all recognized variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads variables through `lookup`; used by tests to avoid touching
    /// the real environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let strip_hex = |v: String| v.trim_start_matches("0x").to_owned();

        let session_timeout = non_empty(ENV_SESSION_TIMEOUT).and_then(|raw| {
            let parsed = parse_duration(&raw);
            if parsed.is_none() {
                tracing::warn!(value = %raw, "ignoring invalid {ENV_SESSION_TIMEOUT}");
            }
            parsed
        });

        Self {
            mnemonic: non_empty(ENV_MNEMONIC),
            private_key_hex: non_empty(ENV_PRIVATE_KEY).map(strip_hex),
            bls_key_hex: non_empty(ENV_BLS_KEY).map(strip_hex),
            password: lookup(ENV_KEY_PASSWORD).filter(|p| !p.is_empty()),
            session_timeout,
        }
    }

    /// Returns `true` if any key material variable is set.
    pub fn has_key_material(&self) -> bool {
        self.mnemonic.is_some() || self.private_key_hex.is_some() || self.bls_key_hex.is_some()
    }
}

impl Drop for EnvOverrides {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.mnemonic.zeroize();
        self.private_key_hex.zeroize();
        self.bls_key_hex.zeroize();
        self.password.zeroize();
    }
}

/// Parses a duration such as `"30s"`, `"5m"`, `"1h30m"`, `"500ms"`, or a
/// bare number of seconds.
///
/// Returns `None` for malformed, zero, negative, or unrepresentable
/// values. Results above [`MAX_SESSION_TIMEOUT`] are clamped to it.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('-') {
        return None;
    }

    if let Ok(secs) = raw.parse::<u64>() {
        return (secs > 0).then(|| Duration::from_secs(secs).min(MAX_SESSION_TIMEOUT));
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let millis_per_unit = match &rest[..unit_len] {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => return None,
        };
        rest = &rest[unit_len..];

        let secs = value * millis_per_unit / 1_000.0;
        if !secs.is_finite() {
            return None;
        }
        let part = Duration::try_from_secs_f64(secs).ok()?;
        total = total.checked_add(part)?;
    }

    (!total.is_zero()).then(|| total.min(MAX_SESSION_TIMEOUT))
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = KeycoreConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_values() {
        let config = KeycoreConfig::default();
        assert_eq!(config.session_timeout, Duration::from_secs(30));
        assert_eq!(config.rpc_timeout, Duration::from_secs(30));
        assert_eq!(config.kchain_endpoint, "http://localhost:9630");
        assert_eq!(config.default_validators.len(), 5);
        assert_eq!(config.default_threshold, 3);
        assert!(config.data_dir.ends_with(".lux/keys"));
    }

    #[test]
    fn zero_session_timeout_rejected() {
        let config = KeycoreConfig {
            session_timeout: Duration::ZERO,
            ..KeycoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_endpoint_rejected() {
        let config = KeycoreConfig {
            kchain_endpoint: "localhost:9630".into(),
            ..KeycoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_above_validator_count_rejected() {
        let config = KeycoreConfig {
            default_threshold: 6,
            ..KeycoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("10 parsecs"), None);
        assert_eq!(parse_duration("-5s"), None);
        assert_eq!(parse_duration("0s"), None);
        assert_eq!(parse_duration("0"), None);
    }

    #[test]
    fn parse_duration_survives_huge_values() {
        assert_eq!(parse_duration("99999999999999999999999h"), None);
        assert_eq!(parse_duration(&format!("{}s{}s", u64::MAX, u64::MAX)), None);
        assert_eq!(
            parse_duration("18446744073709551615"),
            Some(MAX_SESSION_TIMEOUT)
        );
        assert_eq!(parse_duration("48h"), Some(MAX_SESSION_TIMEOUT));
    }

    #[test]
    fn env_huge_timeout_does_not_panic() {
        let env = EnvOverrides::from_lookup(lookup(&[(
            ENV_SESSION_TIMEOUT,
            "99999999999999999999999h",
        )]));
        assert!(env.session_timeout.is_none());
        let config = KeycoreConfig::default().with_env(&env);
        assert_eq!(config.session_timeout, DEFAULT_SESSION_TIMEOUT);
    }

    #[test]
    fn session_timeout_above_cap_rejected() {
        let config = KeycoreConfig {
            session_timeout: MAX_SESSION_TIMEOUT + Duration::from_secs(1),
            ..KeycoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_invalid_timeout_falls_back_to_default() {
        let env = EnvOverrides::from_lookup(lookup(&[(ENV_SESSION_TIMEOUT, "forever")]));
        assert!(env.session_timeout.is_none());
        let config = KeycoreConfig::default().with_env(&env);
        assert_eq!(config.session_timeout, DEFAULT_SESSION_TIMEOUT);
    }

    #[test]
    fn env_valid_timeout_applies() {
        let env = EnvOverrides::from_lookup(lookup(&[(ENV_SESSION_TIMEOUT, "2m")]));
        let config = KeycoreConfig::default().with_env(&env);
        assert_eq!(config.session_timeout, Duration::from_secs(120));
    }

    #[test]
    fn env_strips_hex_prefix_and_blank_values() {
        let env = EnvOverrides::from_lookup(lookup(&[
            (ENV_PRIVATE_KEY, "0xabcd"),
            (ENV_MNEMONIC, "   "),
        ]));
        assert_eq!(env.private_key_hex.as_deref(), Some("abcd"));
        assert!(env.mnemonic.is_none());
        assert!(env.has_key_material());
    }

    #[test]
    fn empty_env_has_no_material() {
        let env = EnvOverrides::from_lookup(lookup(&[]));
        assert!(!env.has_key_material());
        assert!(env.password.is_none());
    }
}
