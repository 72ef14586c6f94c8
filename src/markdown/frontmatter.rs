//! YAML frontmatter fences: splitting a document into `(mapping, body)`
//! and composing it back without touching the body bytes.

use serde_yaml::Mapping;

/// Split a document into its frontmatter mapping and body.
///
/// A document starts a frontmatter block only when its very first line is
/// a `---` fence. Missing frontmatter is legal and yields `(None, input)`.
/// An opened but unterminated block, or a block that is not a YAML
/// mapping, is a structural error.
pub fn split(content: &str) -> Result<(Option<Mapping>, &str), String> {
    let rest = match content.strip_prefix("---") {
        Some(rest) if rest.starts_with('\n') || rest.starts_with("\r\n") => rest,
        _ => return Ok((None, content)),
    };

    // scan line by line for the closing fence
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == "---" || trimmed == "..." {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            if yaml.trim().is_empty() {
                return Ok((Some(Mapping::new()), body));
            }
            let mapping: Mapping = serde_yaml::from_str(yaml)
                .map_err(|e| format!("invalid frontmatter yaml: {e}"))?;
            return Ok((Some(mapping), body));
        }
        offset += line.len();
    }

    Err("unterminated frontmatter block".to_string())
}

/// Compose a document from a frontmatter mapping and a body. The body is
/// emitted verbatim, so `split(compose(m, b)) == (Some(m), b)`.
pub fn compose(mapping: &Mapping, body: &str) -> Result<String, String> {
    let yaml =
        serde_yaml::to_string(mapping).map_err(|e| format!("cannot serialize frontmatter: {e}"))?;
    Ok(format!("---\n{yaml}---\n{body}"))
}

/// Merge `updates` into `mapping`, replacing existing keys in place and
/// appending new ones. Unknown keys in `mapping` are untouched.
pub fn merge(mapping: &mut Mapping, updates: &Mapping) {
    for (key, value) in updates {
        mapping.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    #[test]
    fn splits_frontmatter_and_body() {
        let doc = "---\ntitle: Hello\ntags: [a, b]\n---\n\n# Hello\n";
        let (mapping, body) = split(doc).unwrap();
        let mapping = mapping.unwrap();
        assert_eq!(
            mapping.get("title"),
            Some(&Value::from("Hello"))
        );
        assert_eq!(body, "\n# Hello\n");
    }

    #[test]
    fn missing_frontmatter_is_legal() {
        let doc = "# Just a note\n";
        let (mapping, body) = split(doc).unwrap();
        assert!(mapping.is_none());
        assert_eq!(body, doc);
    }

    #[test]
    fn dashes_inside_body_are_not_fences() {
        let doc = "# Title\n\n---\n\nhorizontal rule above\n";
        let (mapping, body) = split(doc).unwrap();
        assert!(mapping.is_none());
        assert_eq!(body, doc);
    }

    #[test]
    fn unterminated_block_is_an_error() {
        assert!(split("---\ntitle: Oops\n").is_err());
    }

    #[test]
    fn round_trips_byte_for_byte() {
        let mut mapping = Mapping::new();
        mapping.insert(Value::from("title"), Value::from("Note"));
        mapping.insert(Value::from("custom"), Value::from(42));
        let body = "\nBody text with [[link]].\n";

        let doc = compose(&mapping, body).unwrap();
        let (parsed, parsed_body) = split(&doc).unwrap();
        assert_eq!(parsed.unwrap(), mapping);
        assert_eq!(parsed_body, body);
    }

    #[test]
    fn merge_preserves_unknown_keys() {
        let mut mapping = Mapping::new();
        mapping.insert(Value::from("title"), Value::from("Note"));
        mapping.insert(Value::from("custom"), Value::from("keep me"));

        let mut updates = Mapping::new();
        updates.insert(Value::from("permalink"), Value::from("notes/note-1"));
        merge(&mut mapping, &updates);

        assert_eq!(
            mapping.get("custom"),
            Some(&Value::from("keep me"))
        );
        assert_eq!(
            mapping.get("permalink"),
            Some(&Value::from("notes/note-1"))
        );
    }
}
