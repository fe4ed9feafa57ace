//! Markdown chunking for the retrieval indexes.
//!
//! A source document splits on `##` headings first, then each section
//! soft-wraps at roughly 500 characters on line boundaries. Chunk ids are
//! `"<source>:<index>"` and the split is deterministic.

/// Soft character limit per chunk.
pub const CHUNK_SOFT_LIMIT: usize = 500;

/// A piece of indexed memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryChunk {
    /// `"<source>:<index>"`.
    pub id: String,
    pub source: String,
    pub text: String,
}

/// Split markdown by `##` headings, keeping the heading with its section.
fn split_by_headings(text: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.starts_with("## ") && !current.trim().is_empty() {
            sections.push(current.trim().to_string());
            current = String::new();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }
    sections
}

/// Soft-wrap a section to the character limit at line boundaries.
///
/// A single line longer than the limit becomes its own chunk rather than
/// being split mid-line.
fn soft_wrap(section: &str, limit: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in section.lines() {
        if !current.is_empty() && current.len() + 1 + line.len() > limit {
            chunks.push(current.trim().to_string());
            current = String::new();
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

/// Chunk a markdown document into retrieval units.
pub fn split_into_chunks(source: &str, markdown: &str) -> Vec<MemoryChunk> {
    let mut chunks: Vec<MemoryChunk> = Vec::new();
    for section in split_by_headings(markdown) {
        for piece in soft_wrap(&section, CHUNK_SOFT_LIMIT) {
            let index = chunks.len();
            chunks.push(MemoryChunk {
                id: format!("{}:{}", source, index),
                source: source.to_string(),
                text: piece,
            });
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document() {
        assert!(split_into_chunks("src", "").is_empty());
        assert!(split_into_chunks("src", "   \n  ").is_empty());
    }

    #[test]
    fn test_single_section() {
        let chunks = split_into_chunks("notes", "just a short note");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "notes:0");
        assert_eq!(chunks[0].source, "notes");
        assert_eq!(chunks[0].text, "just a short note");
    }

    #[test]
    fn test_split_on_headings() {
        let md = "intro text\n## Preferences\nlikes tea\n## Schedule\nmornings busy";
        let chunks = split_into_chunks("mem", md);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].text.starts_with("intro text"));
        assert!(chunks[1].text.starts_with("## Preferences"));
        assert!(chunks[2].text.starts_with("## Schedule"));
        assert_eq!(chunks[2].id, "mem:2");
    }

    #[test]
    fn test_soft_limit_splits_long_sections() {
        let long_line = "x".repeat(120);
        let section: String = (0..10)
            .map(|_| long_line.clone())
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_into_chunks("big", &section);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // Four 120-char lines + separators stay near the soft limit.
            assert!(chunk.text.len() <= CHUNK_SOFT_LIMIT, "len={}", chunk.text.len());
        }
    }

    #[test]
    fn test_oversized_single_line_kept_whole() {
        let line = "y".repeat(800);
        let chunks = split_into_chunks("one", &line);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text.len(), 800);
    }

    #[test]
    fn test_deterministic() {
        let md = "## A\nalpha\n## B\nbeta";
        let first = split_into_chunks("s", md);
        let second = split_into_chunks("s", md);
        assert_eq!(first, second);
    }

    #[test]
    fn test_resplit_of_concatenation_yields_same_set() {
        let md = "## A\nalpha line\n## B\nbeta line";
        let chunks = split_into_chunks("s", md);
        let rejoined: String = chunks
            .iter()
            .map(|c| c.text.clone())
            .collect::<Vec<_>>()
            .join("\n");
        let again = split_into_chunks("s", &rejoined);
        let texts: Vec<&str> = again.iter().map(|c| c.text.as_str()).collect();
        let original: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, original);
    }
}
