//! Durable participant profiles and the read-only store that supplies them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::ProfileId;
use crate::zone::ZoneProfile;

/// A durable identity (family member or guest).
///
/// Profiles outlive sessions and are never used as a storage key for coins or
/// timeline data; only their `id` is referenced by session entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: ProfileId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<ZoneProfile>,
}

/// Read-only source of profiles.
///
/// This trait allows the orchestrator to work with different profile sources
/// (e.g., configuration files, a user database, or test fixtures).
pub trait ProfileStore: Send + Sync {
    /// Looks up a profile by id.
    fn profile(&self, id: &ProfileId) -> Option<Profile>;

    /// Returns the zone profile for a profile, if one is configured.
    fn zone_profile(&self, id: &ProfileId) -> Option<ZoneProfile> {
        self.profile(id).and_then(|p| p.zones)
    }
}

/// In-memory profile store, typically built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticProfiles {
    profiles: HashMap<ProfileId, Profile>,
}

impl StaticProfiles {
    pub fn new(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl ProfileStore for StaticProfiles {
    fn profile(&self, id: &ProfileId) -> Option<Profile> {
        self.profiles.get(id).cloned()
    }
}
