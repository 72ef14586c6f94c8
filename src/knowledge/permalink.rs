//! Permalink derivation: a project-unique, URL-safe slug computed from a
//! relative file path. Directory separators survive; everything else is
//! folded into lowercase dash-separated segments.

/// `notes/My File.md` becomes `notes/my-file`; `attachment.pdf` becomes
/// `attachment-pdf` (only the `.md` extension is dropped).
pub fn permalink_from_path(file_path: &str) -> String {
    let without_md = match file_path.len().checked_sub(3).and_then(|i| file_path.get(i..)) {
        Some(ext) if ext.eq_ignore_ascii_case(".md") => &file_path[..file_path.len() - 3],
        _ => file_path,
    };

    without_md
        .split('/')
        .map(slugify_segment)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn slugify_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut pending_dash = false;

    for c in segment.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            // '_', spaces, '.', and any other unsafe character collapse
            // into a single dash
            pending_dash = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_md_extension_and_lowercases() {
        assert_eq!(permalink_from_path("notes/Hello.md"), "notes/hello");
    }

    #[test]
    fn preserves_directory_separators() {
        assert_eq!(permalink_from_path("a/b/c.md"), "a/b/c");
    }

    #[test]
    fn collapses_underscores_spaces_and_dots() {
        assert_eq!(
            permalink_from_path("My Project_Notes v2.md"),
            "my-project-notes-v2"
        );
        assert_eq!(permalink_from_path("a__b  c.md"), "a-b-c");
    }

    #[test]
    fn non_markdown_extension_becomes_part_of_the_slug() {
        assert_eq!(permalink_from_path("attachment.pdf"), "attachment-pdf");
    }

    #[test]
    fn strips_leading_and_trailing_junk_per_segment() {
        assert_eq!(permalink_from_path("-draft-/_note_.md"), "draft/note");
    }

    #[test]
    fn keeps_unicode_alphanumerics() {
        assert_eq!(permalink_from_path("Café Notes.md"), "café-notes");
    }
}
