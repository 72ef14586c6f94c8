//! Wire-level representation of a parsed note, before anything touches
//! the database.

use chrono::{DateTime, Utc};
use serde_yaml::{Mapping, Value};

/// Typed view over the frontmatter mapping. Unknown keys are carried in
/// `extra` so a rewrite never loses user data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFrontmatter {
    pub title: Option<String>,
    pub entity_type: Option<String>,
    pub permalink: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub extra: Mapping,
}

impl EntityFrontmatter {
    /// Rebuild the full YAML mapping, known keys first, preserving
    /// whatever else the note carried.
    pub fn to_mapping(&self) -> Mapping {
        let mut mapping = Mapping::new();
        if let Some(title) = &self.title {
            mapping.insert(Value::from("title"), Value::from(title.clone()));
        }
        if let Some(entity_type) = &self.entity_type {
            mapping.insert(Value::from("type"), Value::from(entity_type.clone()));
        }
        if let Some(permalink) = &self.permalink {
            mapping.insert(Value::from("permalink"), Value::from(permalink.clone()));
        }
        if let Some(created) = &self.created {
            mapping.insert(Value::from("created"), Value::from(created.to_rfc3339()));
        }
        if let Some(modified) = &self.modified {
            mapping.insert(Value::from("modified"), Value::from(modified.to_rfc3339()));
        }
        if !self.tags.is_empty() {
            mapping.insert(
                Value::from("tags"),
                Value::Sequence(self.tags.iter().map(|t| Value::from(t.clone())).collect()),
            );
        }
        for (key, value) in &self.extra {
            mapping.insert(key.clone(), value.clone());
        }
        mapping
    }
}

/// One bullet from an observations section: `- [category] content #tag (context)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedObservation {
    pub category: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    pub context: Option<String>,
}

/// One wiki-link edge: `- relation_type [[target]] (context)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRelation {
    pub relation_type: String,
    pub target: String,
    pub context: Option<String>,
}

/// The full parse result for one markdown file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityMarkdown {
    pub frontmatter: EntityFrontmatter,
    pub body: String,
    pub observations: Vec<ParsedObservation>,
    pub relations: Vec<ParsedRelation>,
}

impl EntityMarkdown {
    /// Serialize back to markdown. Observations and relations live in the
    /// body already, so this is frontmatter plus body.
    pub fn to_markdown(&self) -> Result<String, String> {
        let mapping = self.frontmatter.to_mapping();
        if mapping.is_empty() {
            return Ok(self.body.clone());
        }
        super::frontmatter::compose(&mapping, &self.body)
    }
}
