//! Configuration for support-desk
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables of the form `SUPPORT_DESK__TICKETS__COOLDOWN_SECS`.

use crate::core::{Capability, CapabilitySet};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the data directory
pub const CONFIG_FILE_NAME: &str = "support-desk.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "SUPPORT_DESK";

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub tickets: TicketConfig,
    pub protocol: ProtocolConfig,
    pub access: AccessConfig,
}

impl Config {
    /// Load configuration from `file` (if it exists) and the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load from the default file inside `data_dir`, then force `data_dir`
    pub fn load_for_data_dir(data_dir: &Path, file: Option<&Path>) -> Result<Self> {
        let default_file = data_dir.join(CONFIG_FILE_NAME);
        let mut config = Self::load(Some(file.unwrap_or(&default_file)))?;
        config.storage.data_dir = data_dir.to_path_buf();
        Ok(config)
    }
}

/// Where persisted state lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Platform data directory, falling back to a dot directory in the cwd
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "support-desk").map_or_else(
        || PathBuf::from(".support-desk"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

/// Ticket lifecycle tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Prefix of every ticket channel name
    pub channel_prefix: String,
    /// Category the ticket channels are grouped under
    pub category: String,
    /// Minimum time between two granted creations by one requester
    pub cooldown_secs: u64,
    /// Delay between `close` and physical deletion
    pub grace_period_secs: u64,
    /// Maximum messages included in a transcript
    pub transcript_limit: usize,
    /// First message posted into a new ticket channel
    pub welcome_message: String,
}

impl TicketConfig {
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "ticket-".to_string(),
            category: "TICKETS".to_string(),
            cooldown_secs: 300,
            grace_period_secs: 5,
            transcript_limit: 100,
            welcome_message: "Our support team will assist you shortly. Describe your issue \
                              clearly; you can ping other members to add them to the ticket."
                .to_string(),
        }
    }
}

/// Acknowledgment deadlines imposed by the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub initial_deadline_ms: u64,
    pub finalize_deadline_secs: u64,
}

impl ProtocolConfig {
    #[must_use]
    pub const fn initial_deadline(&self) -> Duration {
        Duration::from_millis(self.initial_deadline_ms)
    }

    #[must_use]
    pub const fn finalize_deadline(&self) -> Duration {
        Duration::from_secs(self.finalize_deadline_secs)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            initial_deadline_ms: 3_000,
            finalize_deadline_secs: 15 * 60,
        }
    }
}

/// Mapping from platform role names to capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub roles: BTreeMap<String, Vec<Capability>>,
}

impl AccessConfig {
    /// Capabilities granted by holding `roles`
    ///
    /// Role names match case-insensitively; configuration sources may
    /// normalise key case.
    #[must_use]
    pub fn resolve<S: AsRef<str>>(&self, roles: &[S]) -> CapabilitySet {
        self.roles
            .iter()
            .filter(|(name, _)| {
                roles
                    .iter()
                    .any(|role| role.as_ref().eq_ignore_ascii_case(name))
            })
            .flat_map(|(_, caps)| caps.iter().copied())
            .collect()
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        let staff: Vec<Capability> = Capability::ALL.to_vec();
        let roles = [
            ("Admin".to_string(), staff.clone()),
            ("Moderator".to_string(), staff),
        ]
        .into_iter()
        .collect();
        Self { roles }
    }
}
