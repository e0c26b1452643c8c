//! Capabilities an actor may hold
//!
//! Capabilities are derived once per inbound event from the actor's roles
//! (see [`crate::config::AccessConfig`]) and checked structurally by the
//! lifecycle operations.

use crate::error::PermissionDenied;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single permission relevant to ticket handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Claim open tickets
    Claim,
    /// Close tickets the actor did not open
    CloseAny,
    /// Rename ticket channels
    Rename,
    /// Export channel transcripts
    Transcript,
    /// Add members to tickets the actor did not open
    ManageMembers,
}

impl Capability {
    /// Every capability; what the default staff roles receive
    pub const ALL: [Self; 5] = [
        Self::Claim,
        Self::CloseAny,
        Self::Rename,
        Self::Transcript,
        Self::ManageMembers,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::CloseAny => "close_any",
            Self::Rename => "rename",
            Self::Transcript => "transcript",
            Self::ManageMembers => "manage_members",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of capabilities held by one actor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All capabilities
    #[must_use]
    pub fn staff() -> Self {
        Capability::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    #[must_use]
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fails with [`PermissionDenied`] unless `capability` is held
    pub fn require(
        &self,
        capability: Capability,
        action: &'static str,
    ) -> Result<(), PermissionDenied> {
        if self.contains(capability) {
            Ok(())
        } else {
            Err(PermissionDenied {
                action,
                required: capability,
            })
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Capability> for CapabilitySet {
    fn extend<I: IntoIterator<Item = Capability>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}
