//! Canonical task model - the source-agnostic shape every fetcher produces.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::id::{ExternalIdentity, Source};
use crate::ParseError;

/// Longest annotation attached to a local record, in characters.
pub const MAX_ANNOTATION_CHARS: usize = 1000;

/// Task priority as understood by the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// High
    H,
    /// Medium
    M,
    /// Low
    L,
}

impl Priority {
    /// Parse a store priority code. Anything other than `H`, `M` or `L` is `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "H" => Some(Priority::H),
            "M" => Some(Priority::M),
            "L" => Some(Priority::L),
            _ => None,
        }
    }

    /// Store priority code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::H => "H",
            Priority::M => "M",
            Priority::L => "L",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One task as fetched from a source, normalized for the local store.
///
/// Built fresh every run through [`TaskBuilder`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalTask {
    /// Task title
    pub description: String,

    /// Identity in the originating source
    pub identity: ExternalIdentity,

    /// Originating source
    pub source: Source,

    /// Normalized tags; always contains the source tag
    pub tags: BTreeSet<String>,

    /// Project name
    pub project: Option<String>,

    /// Due date
    pub due: Option<NaiveDate>,

    /// Priority
    pub priority: Option<Priority>,

    /// Free-text notes, in order
    pub annotations: Vec<String>,

    /// Identity value of the parent task in the same source
    pub parent: Option<String>,
}

impl CanonicalTask {
    /// Text handed to the relevance classifier as notes.
    pub fn notes(&self) -> &str {
        self.annotations.first().map(String::as_str).unwrap_or("")
    }
}

/// Normalize a tag token: the store forbids whitespace inside tags.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().split_whitespace().collect::<Vec<_>>().join("_")
}

/// Normalize a collection of tags into a set, dropping empty tokens.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| normalize_tag(t.as_ref()))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Trim an annotation and cap it at [`MAX_ANNOTATION_CHARS`].
///
/// Returns `None` for blank text.
pub fn clean_annotation(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_ANNOTATION_CHARS).collect())
}

/// Builder turning source-native fields into a [`CanonicalTask`].
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    description: String,
    identity: ExternalIdentity,
    source: Source,
    source_tag: String,
    tags: Vec<String>,
    project: Option<String>,
    due: Option<NaiveDate>,
    priority: Option<Priority>,
    annotations: Vec<String>,
    parent: Option<String>,
}

impl TaskBuilder {
    /// Start a task for `source` with the given identity value.
    ///
    /// The source tag defaults to the source's own name.
    pub fn new(source: Source, identity_value: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            identity: ExternalIdentity::new(source.identity_field(), identity_value),
            source,
            source_tag: source.as_str().to_string(),
            tags: Vec::new(),
            project: None,
            due: None,
            priority: None,
            annotations: Vec::new(),
            parent: None,
        }
    }

    /// Tag always attached to tasks from this source.
    pub fn source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = tag.into();
        self
    }

    /// Source-side tags.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Project name; blank names are dropped.
    pub fn project(mut self, project: Option<impl Into<String>>) -> Self {
        self.project = project.map(Into::into).filter(|p: &String| !p.trim().is_empty());
        self
    }

    /// Due date.
    pub fn due(mut self, due: Option<NaiveDate>) -> Self {
        self.due = due;
        self
    }

    /// Priority code; codes other than H/M/L are ignored.
    pub fn priority_code(mut self, code: Option<&str>) -> Self {
        self.priority = code.and_then(Priority::from_code);
        self
    }

    /// Append an annotation (notes).
    pub fn annotation(mut self, text: impl Into<String>) -> Self {
        self.annotations.push(text.into());
        self
    }

    /// Parent task identity value in the same source.
    pub fn parent(mut self, parent: Option<impl Into<String>>) -> Self {
        self.parent = parent.map(Into::into).filter(|p: &String| !p.is_empty());
        self
    }

    /// Finish the task.
    pub fn build(self) -> Result<CanonicalTask, ParseError> {
        let description = self.description.trim().to_string();
        if description.is_empty() {
            return Err(ParseError::EmptyDescription(self.identity.to_string()));
        }
        if self.identity.value.is_empty() {
            return Err(ParseError::EmptyIdentity(self.identity.field));
        }

        let mut tags = normalize_tags(&self.tags);
        let source_tag = normalize_tag(&self.source_tag);
        if !source_tag.is_empty() {
            tags.insert(source_tag);
        }

        Ok(CanonicalTask {
            description,
            identity: self.identity,
            source: self.source,
            tags,
            project: self.project,
            due: self.due,
            priority: self.priority,
            annotations: self.annotations,
            parent: self.parent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdentityField;

    #[test]
    fn test_builder_adds_source_tag() {
        let task = TaskBuilder::new(Source::Asana, "1201", "Write report")
            .source_tag("work")
            .tags(["deep focus", "writing"])
            .build()
            .unwrap();

        let tags: Vec<_> = task.tags.iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["deep_focus", "work", "writing"]);
        assert_eq!(task.identity.field, IdentityField::AsanaGid);
    }

    #[test]
    fn test_builder_does_not_duplicate_source_tag() {
        let task = TaskBuilder::new(Source::Things3, "abc", "Plan trip")
            .tags(["things3"])
            .build()
            .unwrap();
        assert_eq!(task.tags.len(), 1);
    }

    #[test]
    fn test_builder_rejects_blank_description() {
        let err = TaskBuilder::new(Source::Things3, "abc", "   ").build().unwrap_err();
        assert!(matches!(err, ParseError::EmptyDescription(_)));
    }

    #[test]
    fn test_builder_drops_unknown_priority_and_blank_project() {
        let task = TaskBuilder::new(Source::Asana, "9", "Ship it")
            .priority_code(Some("urgent"))
            .project(Some("  "))
            .build()
            .unwrap();
        assert_eq!(task.priority, None);
        assert_eq!(task.project, None);

        let task = TaskBuilder::new(Source::Asana, "9", "Ship it")
            .priority_code(Some("H"))
            .build()
            .unwrap();
        assert_eq!(task.priority, Some(Priority::H));
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("my tag"), "my_tag");
        assert_eq!(normalize_tag("  a \t b  "), "a_b");
        assert_eq!(normalize_tag("my_tag"), "my_tag");
    }

    #[test]
    fn test_clean_annotation() {
        assert_eq!(clean_annotation("  \n "), None);
        assert_eq!(clean_annotation(" note ").as_deref(), Some("note"));

        let long = "é".repeat(MAX_ANNOTATION_CHARS + 50);
        let capped = clean_annotation(&long).unwrap();
        assert_eq!(capped.chars().count(), MAX_ANNOTATION_CHARS);
    }

    #[test]
    fn test_priority_serializes_as_code() {
        let json = serde_json::to_string(&Priority::M).unwrap();
        assert_eq!(json, "\"M\"");
    }
}
