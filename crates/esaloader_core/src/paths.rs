use std::path::{Path, PathBuf};

use crate::client::CatalogItem;

pub const MAX_SEGMENT_BYTES: usize = 255;
pub const EMPTY_SEGMENT_PLACEHOLDER: &str = "unnamed";
pub const DOCUMENT_EXTENSION: &str = "md";

/// Turn arbitrary text into a single path segment that is safe on common
/// filesystems and no longer than 255 UTF-8 bytes.
pub fn sanitize_segment(segment: &str) -> String {
    sanitize_with_limit(segment, MAX_SEGMENT_BYTES)
}

pub fn sanitize_with_limit(segment: &str, max_bytes: usize) -> String {
    let replaced = segment.chars().map(replace_unsafe_char).collect::<String>();
    let trimmed = trim_edges(&replaced);
    let mut output = if trimmed.is_empty() {
        EMPTY_SEGMENT_PLACEHOLDER.to_string()
    } else {
        trimmed.to_string()
    };

    if output.len() > max_bytes {
        let mut cut = max_bytes;
        while !output.is_char_boundary(cut) {
            cut -= 1;
        }
        output.truncate(cut);
        // Truncation can expose a trailing space or dot.
        let kept = output.trim_end_matches([' ', '.']).len();
        output.truncate(kept);
        if output.is_empty() {
            output = EMPTY_SEGMENT_PLACEHOLDER.to_string();
        }
    }
    output
}

/// Directory for an item: each `/`-separated category level becomes one
/// sanitized directory under `output_root`.
pub fn category_dir(output_root: &Path, category: &str) -> PathBuf {
    let mut output = output_root.to_path_buf();
    if category.is_empty() {
        return output;
    }
    for part in category.split('/') {
        output.push(sanitize_segment(part));
    }
    output
}

/// `{number}_{title}.md`, with the title shortened so the whole name fits
/// in one segment.
pub fn document_filename(number: u64, title: &str) -> String {
    let prefix = format!("{number}_");
    let budget = MAX_SEGMENT_BYTES - prefix.len() - DOCUMENT_EXTENSION.len() - 1;
    format!(
        "{prefix}{}.{DOCUMENT_EXTENSION}",
        sanitize_with_limit(title, budget)
    )
}

/// Directory an item's document and images are written to.
pub fn layout(output_root: &Path, item: &CatalogItem) -> PathBuf {
    category_dir(output_root, item.category_path())
}

fn replace_unsafe_char(ch: char) -> char {
    match ch {
        '/' | '\\' | '*' | '?' | '|' => '_',
        ':' => '-',
        '"' => '\'',
        '<' => '(',
        '>' => ')',
        ch if ch.is_control() => ' ',
        ch => ch,
    }
}

fn trim_edges(value: &str) -> &str {
    value.trim_matches([' ', '.'])
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{MAX_SEGMENT_BYTES, category_dir, document_filename, layout, sanitize_segment};
    use crate::client::CatalogItem;

    const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\n', '\r', '\t'];

    fn tricky_inputs() -> Vec<String> {
        vec![
            String::new(),
            " ".to_string(),
            "...".to_string(),
            "a/b\\c".to_string(),
            "what? *really*".to_string(),
            "\"quoted\" <tag> | pipe".to_string(),
            "line\nbreak\r\ttab".to_string(),
            " .hidden. ".to_string(),
            "開発/仕様書: ドラフト".to_string(),
            "x".repeat(300),
            format!("{}. .", "y".repeat(254)),
            "あ".repeat(120),
            format!("{} é", "z".repeat(253)),
        ]
    }

    #[test]
    fn substitution_table() {
        assert_eq!(sanitize_segment("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_segment("12:30"), "12-30");
        assert_eq!(sanitize_segment("what?*"), "what__");
        assert_eq!(sanitize_segment("say \"hi\""), "say 'hi'");
        assert_eq!(sanitize_segment("<draft>"), "(draft)");
        assert_eq!(sanitize_segment("a|b"), "a_b");
        assert_eq!(sanitize_segment("a\nb\rc\td"), "a b c d");
    }

    #[test]
    fn strips_edges_and_fills_empty() {
        assert_eq!(sanitize_segment("  .notes.  "), "notes");
        assert_eq!(sanitize_segment(""), "unnamed");
        assert_eq!(sanitize_segment(" . . "), "unnamed");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for input in tricky_inputs() {
            let once = sanitize_segment(&input);
            assert_eq!(sanitize_segment(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn sanitized_output_is_bounded_and_clean() {
        for input in tricky_inputs() {
            let output = sanitize_segment(&input);
            assert!(output.len() <= MAX_SEGMENT_BYTES, "input: {input:?}");
            assert!(!output.contains(FORBIDDEN), "input: {input:?}");
            assert!(!output.is_empty());
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let output = sanitize_segment(&"あ".repeat(120));
        assert_eq!(output.len(), 255);
        assert_eq!(output.chars().count(), 85);
    }

    #[test]
    fn category_levels_become_sanitized_directories() {
        let root = Path::new("/tmp/out");
        assert_eq!(category_dir(root, ""), root);
        assert_eq!(
            category_dir(root, "開発/仕様: v2/a|b"),
            root.join("開発").join("仕様- v2").join("a_b")
        );
        assert_eq!(
            category_dir(root, "a//b"),
            root.join("a").join("unnamed").join("b")
        );
    }

    #[test]
    fn document_filename_fits_one_segment() {
        assert_eq!(document_filename(12, "Hello: World?"), "12_Hello- World_.md");
        let long = document_filename(123456, &"t".repeat(400));
        assert_eq!(long.len(), MAX_SEGMENT_BYTES);
        assert!(long.starts_with("123456_"));
        assert!(long.ends_with(".md"));
    }

    #[test]
    fn layout_follows_item_category() {
        let item = CatalogItem {
            number: 5,
            name: "Spec/Draft".to_string(),
            category: Some("dev/docs".to_string()),
            ..CatalogItem::default()
        };
        assert_eq!(
            layout(Path::new("out"), &item),
            Path::new("out").join("dev").join("docs")
        );

        let uncategorized = CatalogItem {
            category: None,
            ..item
        };
        assert_eq!(layout(Path::new("out"), &uncategorized), Path::new("out"));
    }
}
