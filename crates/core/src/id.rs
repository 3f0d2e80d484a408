//! Identifiers for local records and external tasks.

use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a local task record.
///
/// For Taskwarrior this is the task UUID. Stable for the life of the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    /// Wrap a store-assigned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Placeholder id for a record that a dry run would have created.
    pub fn planned(identity_value: &str) -> Self {
        Self(format!("dry-run:{identity_value}"))
    }

    /// True for ids produced by [`LocalId::planned`].
    pub fn is_planned(&self) -> bool {
        self.0.starts_with("dry-run:")
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The external task sources kept in sync with the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Things 3 (macOS).
    Things3,
    /// Asana.
    Asana,
}

impl Source {
    /// Every known source, in sync order.
    pub const ALL: [Source; 2] = [Source::Things3, Source::Asana];

    /// Value written to the store's `source` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Things3 => "things3",
            Source::Asana => "asana",
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Things3 => "Things 3",
            Source::Asana => "Asana",
        }
    }

    /// Identity field carrying this source's task ids.
    pub fn identity_field(&self) -> IdentityField {
        match self {
            Source::Things3 => IdentityField::Things3Uuid,
            Source::Asana => IdentityField::AsanaGid,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = crate::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "things" | "things3" => Ok(Source::Things3),
            "asana" => Ok(Source::Asana),
            other => Err(crate::ParseError::UnknownSource(other.to_string())),
        }
    }
}

/// Store attribute holding an external identity value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
    /// `things3_uuid`
    Things3Uuid,
    /// `asana_gid`
    AsanaGid,
}

impl IdentityField {
    /// Attribute name in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityField::Things3Uuid => "things3_uuid",
            IdentityField::AsanaGid => "asana_gid",
        }
    }

    /// Attribute recording that a local completion was pushed back.
    pub fn synced_attribute(&self) -> &'static str {
        match self {
            IdentityField::Things3Uuid => "things3_synced",
            IdentityField::AsanaGid => "asana_synced",
        }
    }

    /// Source that owns this namespace.
    pub fn source(&self) -> Source {
        match self {
            IdentityField::Things3Uuid => Source::Things3,
            IdentityField::AsanaGid => Source::Asana,
        }
    }
}

impl std::fmt::Display for IdentityField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (field, value) pair naming one task inside one source's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Which namespace
    pub field: IdentityField,
    /// Opaque id within that namespace
    pub value: String,
}

impl ExternalIdentity {
    /// Create an identity.
    pub fn new(field: IdentityField, value: impl Into<String>) -> Self {
        Self { field, value: value.into() }
    }
}

impl std::fmt::Display for ExternalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.field, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planned_ids_are_marked() {
        let id = LocalId::planned("t1");
        assert!(id.is_planned());
        assert_eq!(id.as_str(), "dry-run:t1");
        assert!(!LocalId::new("6f1b2c3d-0000-0000-0000-000000000000").is_planned());
    }

    #[test]
    fn test_source_parse() {
        assert_eq!("things".parse::<Source>().unwrap(), Source::Things3);
        assert_eq!("Asana".parse::<Source>().unwrap(), Source::Asana);
        assert!("jira".parse::<Source>().is_err());
    }

    #[test]
    fn test_field_source_mapping() {
        for source in Source::ALL {
            assert_eq!(source.identity_field().source(), source);
        }
        assert_eq!(IdentityField::AsanaGid.synced_attribute(), "asana_synced");
    }
}
