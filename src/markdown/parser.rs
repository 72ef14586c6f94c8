//! Tolerant markdown-to-knowledge parser.
//!
//! A malformed field degrades to its default and is logged; only an
//! unreadable file or structurally broken frontmatter is an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{CoreError, Result};

use super::frontmatter;
use super::schema::{EntityFrontmatter, EntityMarkdown, ParsedObservation, ParsedRelation};

const MAX_OBSERVATION_CHARS: usize = 1000;

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s{0,3}(#{1,6})\s+(.+?)\s*$").unwrap());
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-*]\s+(.+?)\s*$").unwrap());
static WIKI_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap());

#[derive(Debug, Clone, Copy, Default)]
pub struct EntityParser;

impl EntityParser {
    pub fn new() -> Self {
        EntityParser
    }

    /// Parse a whole document. `path` is only used for diagnostics.
    pub fn parse(&self, path: &str, content: &str) -> Result<EntityMarkdown> {
        let (mapping, body) =
            frontmatter::split(content).map_err(|reason| CoreError::parse(path, reason))?;

        let fm = mapping
            .map(|m| parse_frontmatter(path, m))
            .unwrap_or_default();

        let (observations, relations) = parse_body(path, body);

        Ok(EntityMarkdown {
            frontmatter: fm,
            body: body.to_string(),
            observations,
            relations,
        })
    }
}

fn parse_frontmatter(path: &str, mapping: Mapping) -> EntityFrontmatter {
    let mut fm = EntityFrontmatter::default();

    for (key, value) in mapping {
        let key_name = key.as_str().unwrap_or_default().to_string();
        match key_name.as_str() {
            "title" => fm.title = scalar_string(&value),
            "type" => fm.entity_type = scalar_string(&value),
            "permalink" => fm.permalink = scalar_string(&value),
            "created" => match parse_datetime(&value) {
                Some(dt) => fm.created = Some(dt),
                None => debug!(path, ?value, "ignoring invalid created date"),
            },
            "modified" | "updated" => match parse_datetime(&value) {
                Some(dt) => fm.modified = Some(dt),
                None => debug!(path, ?value, "ignoring invalid modified date"),
            },
            "tags" => fm.tags = parse_tags(&value),
            _ => {
                fm.extra.insert(key, value);
            }
        }
    }

    fm
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// ISO-8601 with trailing `Z` permitted; a couple of naive fallbacks.
/// Anything else is `None` and the caller falls back to file stat times.
fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let raw = scalar_string(value)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

fn parse_tags(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Sequence(seq) => seq
            .iter()
            .filter_map(scalar_string)
            .map(|t| t.trim_start_matches('#').to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_body(path: &str, body: &str) -> (Vec<ParsedObservation>, Vec<ParsedRelation>) {
    let mut observations = Vec::new();
    let mut relations: Vec<ParsedRelation> = Vec::new();
    let mut in_observations = false;

    for line in body.lines() {
        if let Some(heading) = HEADING.captures(line) {
            in_observations = heading[2].trim().eq_ignore_ascii_case("observations");
            continue;
        }

        let Some(bullet) = BULLET.captures(line) else {
            continue;
        };
        let text = &bullet[1];

        if let Some(relation) = parse_relation(text) {
            relations.push(relation);
        } else if in_observations {
            if let Some(obs) = parse_observation(path, text) {
                observations.push(obs);
            }
        } else if text.starts_with('[') && text.contains(']') {
            // ad-hoc categorised bullet outside the observations section
            if let Some(obs) = parse_observation(path, text) {
                observations.push(obs);
            }
        }
    }

    // wiki-links anywhere in the body that were not captured as explicit
    // relation bullets become `mentions` edges
    let explicit: Vec<&str> = relations.iter().map(|r| r.target.as_str()).collect();
    let mut mentioned: Vec<String> = Vec::new();
    for capture in WIKI_LINK.captures_iter(body) {
        let target = capture[1].trim();
        if target.is_empty()
            || explicit.contains(&target)
            || mentioned.iter().any(|m| m == target)
        {
            continue;
        }
        mentioned.push(target.to_string());
    }
    for target in mentioned {
        relations.push(ParsedRelation {
            relation_type: "mentions".to_string(),
            target,
            context: None,
        });
    }

    (observations, relations)
}

/// `[category] content #tag1 #tag2 (context)`, every part but content
/// optional. Empty category degrades to no category.
fn parse_observation(path: &str, text: &str) -> Option<ParsedObservation> {
    let mut rest = text.trim();

    let mut category = None;
    if let Some(after) = rest.strip_prefix('[') {
        if let Some(end) = after.find(']') {
            let cat = after[..end].trim();
            category = (!cat.is_empty()).then(|| cat.to_string());
            rest = after[end + 1..].trim();
        }
    }

    let mut context = None;
    if rest.ends_with(')') {
        if let Some(start) = rest.rfind('(') {
            let ctx = rest[start + 1..rest.len() - 1].trim();
            context = (!ctx.is_empty()).then(|| ctx.to_string());
            rest = rest[..start].trim_end();
        }
    }

    let mut tags = Vec::new();
    let mut content_parts = Vec::new();
    for part in rest.split_whitespace() {
        match part.strip_prefix('#') {
            Some(tag) if !tag.is_empty() => tags.push(tag.to_string()),
            _ => content_parts.push(part),
        }
    }

    let content = content_parts.join(" ");
    if content.is_empty() {
        return None;
    }
    if content.chars().count() > MAX_OBSERVATION_CHARS {
        debug!(path, "skipping observation longer than {MAX_OBSERVATION_CHARS} chars");
        return None;
    }

    Some(ParsedObservation {
        category,
        content,
        tags,
        context,
    })
}

/// `relation_type [[target]] (context)`; the type defaults to
/// `relates_to` when the bullet starts directly with the link.
fn parse_relation(text: &str) -> Option<ParsedRelation> {
    let start = text.find("[[")?;
    let end = text[start..].find("]]")? + start;

    let target = text[start + 2..end].trim();
    if target.is_empty() {
        return None;
    }

    let relation_type = {
        let prefix = text[..start].trim();
        if prefix.is_empty() {
            "relates_to".to_string()
        } else {
            prefix.to_string()
        }
    };

    let mut context = None;
    let remaining = text[end + 2..].trim();
    if remaining.starts_with('(') && remaining.ends_with(')') {
        let ctx = remaining[1..remaining.len() - 1].trim();
        context = (!ctx.is_empty()).then(|| ctx.to_string());
    }

    Some(ParsedRelation {
        relation_type,
        target: target.to_string(),
        context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> EntityMarkdown {
        EntityParser::new().parse("test.md", content).unwrap()
    }

    #[test]
    fn parses_full_document() {
        let doc = "\
---
title: Coffee Brewing
type: knowledge
permalink: coffee/brewing
tags: [coffee, howto]
created: 2024-01-01T00:00:00Z
---

# Coffee Brewing

Some freeform text.

## Observations
- [method] Pour-over gives cleaner taste #brewing #technique (tested twice)
- Plain observation without category

## Relations
- requires [[Coffee Beans]]
- mentions [[Grinder]] (seen in review)
";
        let parsed = parse(doc);

        assert_eq!(parsed.frontmatter.title.as_deref(), Some("Coffee Brewing"));
        assert_eq!(parsed.frontmatter.entity_type.as_deref(), Some("knowledge"));
        assert_eq!(
            parsed.frontmatter.permalink.as_deref(),
            Some("coffee/brewing")
        );
        assert_eq!(parsed.frontmatter.tags, vec!["coffee", "howto"]);
        assert!(parsed.frontmatter.created.is_some());

        assert_eq!(parsed.observations.len(), 2);
        assert_eq!(parsed.observations[0].category.as_deref(), Some("method"));
        assert_eq!(
            parsed.observations[0].content,
            "Pour-over gives cleaner taste"
        );
        assert_eq!(parsed.observations[0].tags, vec!["brewing", "technique"]);
        assert_eq!(
            parsed.observations[0].context.as_deref(),
            Some("tested twice")
        );
        assert_eq!(parsed.observations[1].category, None);

        assert_eq!(parsed.relations.len(), 2);
        assert_eq!(parsed.relations[0].relation_type, "requires");
        assert_eq!(parsed.relations[0].target, "Coffee Beans");
        assert_eq!(parsed.relations[1].context.as_deref(), Some("seen in review"));
    }

    #[test]
    fn body_links_become_mentions() {
        let doc = "See [[Other Note]] and [[Other Note]] again, plus [[Third]].\n\n- depends_on [[Explicit]]\n";
        let parsed = parse(doc);

        let types: Vec<_> = parsed
            .relations
            .iter()
            .map(|r| (r.relation_type.as_str(), r.target.as_str()))
            .collect();
        assert_eq!(
            types,
            vec![
                ("depends_on", "Explicit"),
                ("mentions", "Other Note"),
                ("mentions", "Third"),
            ]
        );
    }

    #[test]
    fn explicit_relation_suppresses_mention_of_same_target() {
        let doc = "- depends_on [[b]]\n\nAlso referenced: [[b]]\n";
        let parsed = parse(doc);
        assert_eq!(parsed.relations.len(), 1);
        assert_eq!(parsed.relations[0].relation_type, "depends_on");
    }

    #[test]
    fn bare_link_defaults_to_relates_to() {
        let parsed = parse("- [[Somewhere]]\n");
        assert_eq!(parsed.relations[0].relation_type, "relates_to");
    }

    #[test]
    fn empty_category_degrades_to_none() {
        let parsed = parse("## Observations\n- [] still a valid observation\n");
        assert_eq!(parsed.observations.len(), 1);
        assert_eq!(parsed.observations[0].category, None);
        assert_eq!(parsed.observations[0].content, "still a valid observation");
    }

    #[test]
    fn empty_content_is_skipped() {
        let parsed = parse("## Observations\n- [cat] #only #tags\n");
        assert!(parsed.observations.is_empty());
    }

    #[test]
    fn oversized_observation_is_skipped() {
        let doc = format!("## Observations\n- {}\n", "x".repeat(1001));
        let parsed = parse(&doc);
        assert!(parsed.observations.is_empty());
    }

    #[test]
    fn ad_hoc_categorised_bullets_outside_section() {
        let parsed = parse("# Notes\n\n- [idea] capture this anywhere\n- not an observation\n");
        assert_eq!(parsed.observations.len(), 1);
        assert_eq!(parsed.observations[0].category.as_deref(), Some("idea"));
    }

    #[test]
    fn observations_section_heading_is_case_insensitive() {
        let parsed = parse("## OBSERVATIONS\n- plain one\n\n## Other\n- not captured\n");
        assert_eq!(parsed.observations.len(), 1);
        assert_eq!(parsed.observations[0].content, "plain one");
    }

    #[test]
    fn invalid_dates_degrade_to_none() {
        let parsed = parse("---\ncreated: not-a-date\ntitle: T\n---\nbody\n");
        assert!(parsed.frontmatter.created.is_none());
        assert_eq!(parsed.frontmatter.title.as_deref(), Some("T"));
    }

    #[test]
    fn unknown_frontmatter_keys_are_preserved() {
        let parsed = parse("---\ntitle: T\naliases: [x, y]\n---\nbody\n");
        assert!(parsed
            .frontmatter
            .extra
            .contains_key("aliases"));
    }

    #[test]
    fn tags_accept_comma_separated_string() {
        let parsed = parse("---\ntags: a, b , ,c\n---\n");
        assert_eq!(parsed.frontmatter.tags, vec!["a", "b", "c"]);
    }

    #[test]
    fn round_trip_preserves_document() {
        let doc = "\
---
title: Note
custom_key: kept
---

Body with [[link]].

## Observations
- [cat] something #tag
";
        let parsed = parse(doc);
        let serialized = parsed.to_markdown().unwrap();
        let reparsed = EntityParser::new().parse("test.md", &serialized).unwrap();
        assert_eq!(parsed, reparsed);
    }
}
