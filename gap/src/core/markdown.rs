//! Minimal line-level markdown scanning: headings and fenced blocks.
//!
//! Enough structure to find data blocks embedded in artifacts, nothing more.

use std::sync::LazyLock;

use regex::Regex;

const FENCE_MARKERS: [&str; 3] = ["```", "'''", "~~~"];
const STRUCTURED_INFO: [&str; 3] = ["yaml", "yml", "json"];

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+(.*?)\s*#*\s*$").expect("heading regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Heading text without the leading `#`s.
    Heading(String),
    /// Fenced block with lowercased info string and raw body.
    Fence { info: String, body: String },
}

/// True for fence info strings that carry YAML or JSON data.
pub fn is_structured_info(info: &str) -> bool {
    STRUCTURED_INFO.contains(&info)
}

/// Headings and fenced blocks in document order. Headings inside fences are
/// not headings; an unterminated fence runs to the end of the document.
pub fn blocks(content: &str) -> Vec<Block> {
    let mut found = Vec::new();
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        if let Some((marker, info)) = fence_open(line) {
            let mut body = Vec::new();
            for inner in lines.by_ref() {
                if inner.trim_start().starts_with(marker) {
                    break;
                }
                body.push(inner);
            }
            found.push(Block::Fence {
                info,
                body: body.join("\n"),
            });
            continue;
        }
        if let Some(caps) = HEADING.captures(line) {
            found.push(Block::Heading(caps[1].to_string()));
        }
    }
    found
}

/// Body of the first `yaml`/`yml`/`json` fenced block anywhere in `content`.
pub fn first_structured_block(content: &str) -> Option<String> {
    blocks(content).into_iter().find_map(|block| match block {
        Block::Fence { info, body } if is_structured_info(&info) => Some(body),
        _ => None,
    })
}

fn fence_open(line: &str) -> Option<(&'static str, String)> {
    let trimmed = line.trim_start();
    FENCE_MARKERS.iter().find_map(|marker| {
        trimmed
            .strip_prefix(marker)
            .map(|info| (*marker, info.trim().to_ascii_lowercase()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_inside_fences_are_body_text() {
        let found = blocks("# Title\n```text\n# not a heading\n```\n## Next\n");
        assert_eq!(
            found,
            vec![
                Block::Heading("Title".to_string()),
                Block::Fence {
                    info: "text".to_string(),
                    body: "# not a heading".to_string()
                },
                Block::Heading("Next".to_string()),
            ]
        );
    }

    #[test]
    fn first_structured_block_skips_other_languages() {
        let content = "```bash\nls\n```\n\n```JSON\n[1]\n```\n";
        assert_eq!(first_structured_block(content), Some("[1]".to_string()));
    }

    #[test]
    fn closing_hashes_are_trimmed_from_headings() {
        assert_eq!(blocks("## ACL ##\n"), vec![Block::Heading("ACL".to_string())]);
    }
}
