//! Task-level settings (`spec.md` §6 settings table), loaded the same way a
//! typical daemon config loads: a `config::Config` builder layering a TOML
//! file over environment variables over hard defaults. Persisting settings
//! back to disk is out of scope (`spec.md` §1 Non-goals: "configuration
//! persistence"), so there is no `save`.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Retry ceiling for cookie/invalid-KE-group retries (`spec.md` §3, §6).
pub const MAX_RETRIES: u32 = 5;

/// Upper bound on the key-exchange plan: 1 primary + 7 additional
/// (`spec.md` §3, §6).
pub const MAX_KEY_EXCHANGES: usize = 8;

/// Settings consumed by the task (`spec.md` §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Enables RFC 7427 hash-algorithm negotiation (`spec.md` §4.4).
    pub signature_authentication: bool,
    /// Emits `REDIRECT_SUPPORTED` and acts on `REDIRECT` (`spec.md` §4.5).
    pub follow_redirects: bool,
    /// When `true`, clears the `SkipPrivate` selection flag, permitting
    /// private-use transform IDs in the chosen proposal.
    pub accept_private_algs: bool,
    /// When `true`, clears the `PreferSupplied` selection flag so our own
    /// configured proposal order wins over the peer's.
    pub prefer_configured_proposals: bool,
    /// On rekey, reuse the predecessor's key-exchange group rather than the
    /// IKE config's top choice (`spec.md` §8 scenario 5).
    pub prefer_previous_dh_group: bool,
}

impl Settings {
    /// Loads settings from `ike-init.toml` (if present), then the
    /// `IKE_INIT_*` environment namespace, falling back to the defaults
    /// from `spec.md` §6's settings table.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("ike-init.toml").required(false))
            .add_source(Environment::with_prefix("IKE_INIT"))
            .set_default("signature_authentication", true)?
            .set_default("follow_redirects", true)?
            .set_default("accept_private_algs", false)?
            .set_default("prefer_configured_proposals", true)?
            .set_default("prefer_previous_dh_group", true)?
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            signature_authentication: true,
            follow_redirects: true,
            accept_private_algs: false,
            prefer_configured_proposals: true,
            prefer_previous_dh_group: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let s = Settings::default();
        assert!(s.signature_authentication);
        assert!(s.follow_redirects);
        assert!(!s.accept_private_algs);
        assert!(s.prefer_configured_proposals);
        assert!(s.prefer_previous_dh_group);
    }

    #[test]
    fn load_falls_back_to_defaults_without_a_config_file() {
        let s = Settings::load().expect("defaults alone must build a valid config");
        assert_eq!(s.accept_private_algs, Settings::default().accept_private_algs);
    }
}
