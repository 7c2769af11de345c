//! Data model shared by the four generation stages.
//!
//! The information table couples dialogues to passages through URL strings,
//! never object references, so the whole structure serializes flat and
//! cycle-free.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::retrieval::types::Passage;

/// An editor perspective used to diversify the questions asked during
/// knowledge curation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub description: String,
}

impl Persona {
    /// The fixed generic persona that always leads the list.
    pub fn basic_fact_writer() -> Self {
        Self {
            name: "Basic fact writer".to_string(),
            description: "Basic fact writer focusing on broadly covering the basic facts about the topic."
                .to_string(),
        }
    }

    pub fn display(&self) -> String {
        if self.description.is_empty() {
            self.name.clone()
        } else {
            format!("{}: {}", self.name, self.description)
        }
    }
}

/// One writer↔expert exchange. Immutable once appended to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub question: String,
    pub queries: Vec<String>,
    pub retrieved_passages: Vec<Passage>,
    pub answer: String,
}

/// A persona's full dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub persona: Persona,
    pub turns: Vec<DialogueTurn>,
}

/// Accumulated research: all dialogues plus a URL-keyed passage map with a
/// stable 1-based citation numbering assigned in first-sighting order.
///
/// Built once after the curation stage completes, read-only afterward.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InformationTable {
    pub conversations: Vec<Conversation>,
    pub url_to_info: HashMap<String, Passage>,
    pub url_to_unified_index: HashMap<String, usize>,
}

impl InformationTable {
    /// Merge all retrieved passages from `conversations` in deterministic
    /// order: personas in original order, turns in dialogue order, passages
    /// in retrieval order. First sighting of a URL fixes its title,
    /// description and citation index; later sightings only contribute
    /// snippets that are not already present.
    pub fn from_conversations(conversations: Vec<Conversation>) -> Self {
        let mut url_to_info: HashMap<String, Passage> = HashMap::new();
        let mut url_to_unified_index: HashMap<String, usize> = HashMap::new();

        for conversation in &conversations {
            for turn in &conversation.turns {
                for passage in &turn.retrieved_passages {
                    match url_to_info.get_mut(&passage.url) {
                        Some(existing) => {
                            for snippet in &passage.snippets {
                                if !existing.snippets.contains(snippet) {
                                    existing.snippets.push(snippet.clone());
                                }
                            }
                        }
                        None => {
                            let index = url_to_unified_index.len() + 1;
                            url_to_unified_index.insert(passage.url.clone(), index);
                            url_to_info.insert(passage.url.clone(), passage.clone());
                        }
                    }
                }
            }
        }

        Self {
            conversations,
            url_to_info,
            url_to_unified_index,
        }
    }

    /// Passages in citation-index order (1..=n).
    pub fn passages_in_index_order(&self) -> Vec<&Passage> {
        let mut entries: Vec<(&String, &usize)> = self.url_to_unified_index.iter().collect();
        entries.sort_by_key(|(_, index)| **index);
        entries
            .into_iter()
            .filter_map(|(url, _)| self.url_to_info.get(url))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.url_to_info.is_empty()
    }
}

/// A heading node in the article outline. Levels 1..=4 map to `#`..`####`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub heading: String,
    pub level: u8,
    pub children: Vec<OutlineNode>,
}

/// The article outline, a forest of heading nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    pub children: Vec<OutlineNode>,
}

impl Outline {
    /// Parse a Markdown outline by leading-`#` counting. Lines that are not
    /// headings (or deeper than `####`) are discarded.
    pub fn parse(markdown: &str) -> Self {
        let mut root = Outline::default();
        // Stack of (level, path index) into the partially built tree.
        let mut stack: Vec<(u8, usize)> = Vec::new();

        for line in markdown.lines() {
            let trimmed = line.trim();
            let hashes = trimmed.chars().take_while(|c| *c == '#').count();
            if hashes == 0 || hashes > 4 {
                continue;
            }
            let heading = trimmed[hashes..].trim().trim_end_matches('#').trim();
            if heading.is_empty() {
                continue;
            }

            let level = hashes as u8;
            let node = OutlineNode {
                heading: heading.to_string(),
                level,
                children: Vec::new(),
            };

            while stack.last().is_some_and(|(l, _)| *l >= level) {
                stack.pop();
            }

            // Walk the stack to the insertion point.
            let siblings = {
                let mut current = &mut root.children;
                for (_, idx) in &stack {
                    current = &mut current[*idx].children;
                }
                current
            };
            siblings.push(node);
            let idx = siblings.len() - 1;
            stack.push((level, idx));
        }

        root
    }

    pub fn to_markdown(&self) -> String {
        fn render(node: &OutlineNode, out: &mut String) {
            out.push_str(&"#".repeat(node.level as usize));
            out.push(' ');
            out.push_str(&node.heading);
            out.push('\n');
            for child in &node.children {
                render(child, out);
            }
        }

        let mut out = String::new();
        for node in &self.children {
            render(node, &mut out);
        }
        out
    }

    pub fn top_level_sections(&self) -> &[OutlineNode] {
        &self.children
    }

    /// All heading texts, depth-first.
    pub fn headings(&self) -> Vec<String> {
        fn collect(node: &OutlineNode, out: &mut Vec<String>) {
            out.push(node.heading.clone());
            for child in &node.children {
                collect(child, out);
            }
        }

        let mut out = Vec::new();
        for node in &self.children {
            collect(node, &mut out);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// One drafted section: its outline heading plus Markdown body with
/// inline `[k]` citation markers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSection {
    pub heading: String,
    pub level: u8,
    pub markdown: String,
}

/// The drafted/polished article: sections in outline order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Article {
    pub sections: Vec<ArticleSection>,
}

impl Article {
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&"#".repeat(section.level.max(1) as usize));
            out.push(' ');
            out.push_str(&section.heading);
            out.push('\n');
            if !section.markdown.is_empty() {
                out.push('\n');
                out.push_str(section.markdown.trim_end());
                out.push('\n');
            }
        }
        out
    }

    /// Split Markdown back into sections at top-level (`#`) headings.
    /// Content before the first heading is dropped.
    pub fn from_markdown(markdown: &str) -> Self {
        let mut sections: Vec<ArticleSection> = Vec::new();
        let mut current: Option<(String, Vec<String>)> = None;

        for line in markdown.lines() {
            let trimmed = line.trim_start();
            let is_top = trimmed.starts_with("# ") && !trimmed.starts_with("## ");
            if is_top {
                if let Some((heading, body)) = current.take() {
                    sections.push(ArticleSection {
                        heading,
                        level: 1,
                        markdown: body.join("\n").trim().to_string(),
                    });
                }
                current = Some((trimmed[2..].trim().to_string(), Vec::new()));
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line.to_string());
            }
        }
        if let Some((heading, body)) = current.take() {
            sections.push(ArticleSection {
                heading,
                level: 1,
                markdown: body.join("\n").trim().to_string(),
            });
        }

        Self { sections }
    }

    /// Top-level heading texts in order.
    pub fn headings(&self) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|s| s.level == 1)
            .map(|s| s.heading.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() || self.sections.iter().all(|s| s.markdown.trim().is_empty())
    }
}

/// Truncate to at most `max_words` whitespace-delimited words, keeping the
/// tail (the most recent content) when `keep_tail` is set.
pub fn truncate_words(text: &str, max_words: usize, keep_tail: bool) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    let slice = if keep_tail {
        &words[words.len() - max_words..]
    } else {
        &words[..max_words]
    };
    slice.join(" ")
}
