//! Strongly-typed identifiers for rollcall

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares an opaque string identifier issued by an external system
/// (user directory, academic catalogue, venue setup).
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a student, teacher or admin in the user directory
    UserId
);

string_id!(
    /// Identifier (course code) of a subject / class session
    SubjectId
);

string_id!(
    /// Identifier of a bookable venue
    VenueId
);

/// Unique identifier for a leave/permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(Uuid);

impl PermissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PermissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a connected IPC client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_id_equality() {
        let a = VenueId::new("hall-a");
        let b = VenueId::from("hall-a");
        let c = VenueId::new("hall-b");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn blank_ids_are_detected() {
        assert!(SubjectId::new("   ").is_blank());
        assert!(!SubjectId::new("CS101").is_blank());
    }

    #[test]
    fn string_ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&UserId::new("s-1001")).unwrap();
        assert_eq!(json, "\"s-1001\"");

        let parsed: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_str(), "s-1001");
    }

    #[test]
    fn permission_id_parses_its_display_form() {
        let id = PermissionId::new();
        let parsed = PermissionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(PermissionId::parse("not-a-uuid").is_none());
    }
}
