use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchItemType {
    Entity,
    Observation,
    Relation,
}

impl SearchItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchItemType::Entity => "entity",
            SearchItemType::Observation => "observation",
            SearchItemType::Relation => "relation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "entity" => Some(SearchItemType::Entity),
            "observation" => Some(SearchItemType::Observation),
            "relation" => Some(SearchItemType::Relation),
            _ => None,
        }
    }
}

/// One search request. Every field is optional; empty means "match
/// everything" bounded by `limit`.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Free text, prefix-matched against title and content.
    pub text: Option<String>,
    /// Exact permalink match.
    pub permalink: Option<String>,
    /// Glob permalink match, `*` as the wildcard. Ignored when
    /// `permalink` is set.
    pub permalink_glob: Option<String>,
    pub types: Vec<SearchItemType>,
    pub entity_types: Vec<String>,
    /// Only items created at or after this instant.
    pub after_date: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        SearchQuery {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn permalink(permalink: impl Into<String>) -> Self {
        SearchQuery {
            permalink: Some(permalink.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.permalink.is_none()
            && self.permalink_glob.is_none()
            && self.types.is_empty()
            && self.entity_types.is_empty()
            && self.after_date.is_none()
    }
}

/// One row out of the index, ordered by descending relevance.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub item_type: SearchItemType,
    pub title: String,
    pub content: String,
    pub permalink: Option<String>,
    pub file_path: String,
    /// bm25 rank; lower is more relevant. Zero for non-text queries.
    pub score: f64,
    pub entity_id: Option<i64>,
    pub from_id: Option<i64>,
    pub to_id: Option<i64>,
    pub relation_type: Option<String>,
    pub category: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}
