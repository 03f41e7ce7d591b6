//! Core identifier types with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty or whitespace-only.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The provided value contained control characters.
    #[error("{field} contains control characters: {value:?}")]
    ControlCharacters { field: &'static str, value: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                if id.chars().any(char::is_control) {
                    return Err(ValidationError::ControlCharacters {
                        field: $field_name,
                        value: id,
                    });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = ValidationError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated physical sensor identifier.
    ///
    /// Device IDs are stable hardware identifiers (e.g. an ANT+ device number).
    DeviceId, "device ID"
);

define_string_id!(
    /// A validated profile identifier.
    ///
    /// Profiles are durable identities (family members, guests) that outlive sessions.
    ProfileId, "profile ID"
);

define_string_id!(
    /// A validated session entity identifier.
    ///
    /// Entity IDs are unique per creation within a session and are the only key
    /// used for coin and timeline attribution.
    EntityId, "entity ID"
);

define_string_id!(
    /// A validated session identifier.
    SessionId, "session ID"
);

define_string_id!(
    /// A validated heart-rate zone identifier (e.g. "warm", "hot").
    ZoneId, "zone ID"
);

impl SessionId {
    /// A fresh random (UUID v4) session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl EntityId {
    /// The `n`th entity id of a session: `ent-0001`, `ent-0002`, ...
    pub fn sequential(n: usize) -> Self {
        Self(format!("ent-{n:04}"))
    }
}

impl ZoneId {
    /// Builds an id from a built-in zone name.
    pub(crate) fn from_static(id: &'static str) -> Self {
        debug_assert!(!id.trim().is_empty());
        Self(id.to_string())
    }
}
