//! Stage 4a: section drafting.
//!
//! Each top-level outline section is drafted independently (and in
//! parallel) from evidence selected out of the already-curated information
//! table, via a local similarity search over its snippets rather than a
//! fresh retriever call. The LM cites evidence by its local number; those
//! markers are rewritten to the table's unified citation index, which is
//! the sole mechanism for citation stability.

use std::sync::Arc;

use regex::Regex;

use crate::config::PipelineConfig;
use crate::embedding::{cosine_similarity, Embedder};
use crate::llm::roles::RoleLm;
use crate::retrieval::types::Passage;
use crate::workers::{map_bounded, SafeMode};

use super::prompts;
use super::types::{truncate_words, Article, ArticleSection, InformationTable, Outline, OutlineNode};

/// Word cap on the evidence block fed to the section prompt.
const EVIDENCE_MAX_WORDS: usize = 1500;

/// Lead-like headings are skipped; the polish stage writes the lead.
const SKIPPED_SECTIONS: &[&str] = &["introduction", "conclusion", "summary"];

/// Snippet embeddings for every passage in the table, in citation order.
pub struct SnippetIndex {
    entries: Vec<(Passage, Vec<f32>)>,
}

impl SnippetIndex {
    pub fn build(table: &InformationTable, embedder: &dyn Embedder) -> Self {
        let passages: Vec<Passage> = table
            .passages_in_index_order()
            .into_iter()
            .cloned()
            .collect();

        let texts: Vec<String> = passages
            .iter()
            .map(|p| format!("{}\n{}", p.title, p.snippets.join("\n")))
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let entries = match embedder.embed_batch(&refs) {
            Ok(embeddings) => passages.into_iter().zip(embeddings).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "snippet embedding failed, sections will draft without evidence");
                Vec::new()
            }
        };

        Self { entries }
    }

    pub fn top_k(&self, query_embedding: &[f32], k: usize) -> Vec<&Passage> {
        let mut scored: Vec<(f32, &Passage)> = self
            .entries
            .iter()
            .map(|(passage, embedding)| (cosine_similarity(query_embedding, embedding), passage))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(_, p)| p).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct ArticleGenerator {
    lm: Arc<RoleLm>,
    embedder: Arc<dyn Embedder>,
    config: PipelineConfig,
    safe_mode: SafeMode,
}

impl ArticleGenerator {
    pub fn new(
        lm: Arc<RoleLm>,
        embedder: Arc<dyn Embedder>,
        config: PipelineConfig,
        safe_mode: SafeMode,
    ) -> Self {
        Self {
            lm,
            embedder,
            config,
            safe_mode,
        }
    }

    pub fn generate(&self, topic: &str, table: &InformationTable, outline: &Outline) -> Article {
        let index = SnippetIndex::build(table, self.embedder.as_ref());

        let sections: Vec<&OutlineNode> = outline
            .top_level_sections()
            .iter()
            .filter(|node| !is_skipped_heading(&node.heading))
            .collect();

        let drafted = map_bounded(
            self.config.max_thread_num,
            &self.safe_mode,
            sections,
            |_, node| self.draft_section(topic, table, &index, node),
        );

        Article { sections: drafted }
    }

    fn draft_section(
        &self,
        topic: &str,
        table: &InformationTable,
        index: &SnippetIndex,
        node: &OutlineNode,
    ) -> ArticleSection {
        let query = section_query(node);

        let evidence: Vec<&Passage> = match self.embedder.embed(&query) {
            Ok(embedding) => index.top_k(&embedding, self.config.retrieve_top_k),
            Err(e) => {
                tracing::warn!(section = %node.heading, error = %e, "section query embedding failed");
                Vec::new()
            }
        };

        let evidence_block = if evidence.is_empty() {
            "(no information collected)".to_string()
        } else {
            let numbered = evidence
                .iter()
                .enumerate()
                .map(|(i, p)| format!("[{}] {}", i + 1, p.snippets.join("\n")))
                .collect::<Vec<_>>()
                .join("\n\n");
            truncate_words(&numbered, EVIDENCE_MAX_WORDS, false)
        };

        let raw = self
            .lm
            .complete(&prompts::section(topic, &node.heading, &evidence_block))
            .unwrap_or_default();

        if raw.trim().is_empty() {
            tracing::warn!(section = %node.heading, "empty section draft, keeping heading only");
            return ArticleSection {
                heading: node.heading.clone(),
                level: 1,
                markdown: String::new(),
            };
        }

        let body = strip_repeated_heading(&raw, &node.heading);
        let markdown = remap_citations(&body, &evidence, table);

        ArticleSection {
            heading: node.heading.clone(),
            level: 1,
            markdown,
        }
    }
}

fn is_skipped_heading(heading: &str) -> bool {
    let normalized = heading.trim().to_lowercase();
    SKIPPED_SECTIONS.contains(&normalized.as_str())
}

/// The retrieval query for a section: its heading plus all subheadings.
fn section_query(node: &OutlineNode) -> String {
    fn collect(node: &OutlineNode, out: &mut Vec<String>) {
        out.push(node.heading.clone());
        for child in &node.children {
            collect(child, out);
        }
    }

    let mut parts = Vec::new();
    collect(node, &mut parts);
    parts.join(" ")
}

/// The LM is told to open with the section heading; drop that line so the
/// heading is stored exactly once.
fn strip_repeated_heading(raw: &str, heading: &str) -> String {
    let trimmed = raw.trim();
    if let Some(first_line) = trimmed.lines().next() {
        let line = first_line.trim().trim_start_matches('#').trim();
        if line == heading {
            return trimmed
                .lines()
                .skip(1)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();
        }
    }
    trimmed.to_string()
}

/// Rewrite the LM's local `[i]` markers to the table's unified index.
/// Markers outside the local evidence range (or whose URL somehow has no
/// unified index) are stripped rather than left dangling.
fn remap_citations(text: &str, evidence: &[&Passage], table: &InformationTable) -> String {
    let marker = Regex::new(r"\[(\d+)\]").expect("citation regex");

    marker
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let local: usize = match caps[1].parse() {
                Ok(n) => n,
                Err(_) => return String::new(),
            };
            evidence
                .get(local.wrapping_sub(1))
                .and_then(|p| table.url_to_unified_index.get(&p.url))
                .map(|global| format!("[{global}]"))
                .unwrap_or_default()
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::llm::client::MockLm;
    use crate::llm::roles::LmConfigs;
    use crate::pipeline::types::{Conversation, DialogueTurn, Persona};
    use crate::retrieval::types::Passage;

    fn passage(url: &str, content: &str) -> Passage {
        Passage {
            url: url.to_string(),
            title: url.to_string(),
            snippets: vec![content.to_string()],
            description: String::new(),
            score: 0.9,
            source_tag: String::new(),
            provenance: None,
        }
    }

    fn table_with(passages: Vec<Passage>) -> InformationTable {
        InformationTable::from_conversations(vec![Conversation {
            persona: Persona::basic_fact_writer(),
            turns: vec![DialogueTurn {
                question: "q".into(),
                queries: vec![],
                retrieved_passages: passages,
                answer: "a".into(),
            }],
        }])
    }

    fn generator(responses: Vec<&str>) -> ArticleGenerator {
        ArticleGenerator::new(
            LmConfigs::shared(Arc::new(MockLm::new(responses))).article_gen_lm,
            Arc::new(MockEmbedder::new(8)),
            PipelineConfig::default(),
            SafeMode::new(),
        )
    }

    #[test]
    fn sections_follow_outline_order_and_skip_lead_headings() {
        let outline = Outline::parse("# Introduction\n# 사업 현황\n# 재무 분석\n# Conclusion\n");
        let table = table_with(vec![passage("u1", "본문")]);
        let gen = generator(vec!["섹션 본문 [1]"]);

        let article = gen.generate("토픽", &table, &outline);
        assert_eq!(article.headings(), vec!["사업 현황", "재무 분석"]);
    }

    #[test]
    fn citations_remap_to_unified_index() {
        // Three passages: unified indices 1..3 in sighting order.
        let table = table_with(vec![
            passage("u1", "반도체 매출 데이터"),
            passage("u2", "고용 인원 데이터"),
            passage("u3", "배당 정책 데이터"),
        ]);
        let outline = Outline::parse("# 재무\n");

        // The mock embedder ranks evidence; whatever local order results,
        // [1] must come back as the global index of the first evidence item.
        let gen = generator(vec!["첫 근거 인용 [1] 그리고 범위 밖 [9]."]);
        let article = gen.generate("배당", &table, &outline);

        let body = &article.sections[0].markdown;
        assert!(!body.contains("[9]"), "out-of-range marker must be stripped");

        let cited: Vec<usize> = Regex::new(r"\[(\d+)\]")
            .unwrap()
            .captures_iter(body)
            .map(|c| c[1].parse().unwrap())
            .collect();
        assert_eq!(cited.len(), 1);
        assert!(
            (1..=3).contains(&cited[0]),
            "remapped citation must be a unified index, got {cited:?}"
        );
    }

    #[test]
    fn empty_draft_keeps_heading_only_section() {
        let table = table_with(vec![passage("u1", "본문")]);
        let outline = Outline::parse("# 지배구조\n");
        let gen = generator(vec![""]);

        let article = gen.generate("토픽", &table, &outline);
        assert_eq!(article.sections.len(), 1);
        assert_eq!(article.sections[0].heading, "지배구조");
        assert!(article.sections[0].markdown.is_empty());
    }

    #[test]
    fn empty_table_produces_citation_free_sections() {
        let table = InformationTable::default();
        let outline = Outline::parse("# 개요 분석\n");
        let gen = generator(vec!["근거 없는 서술 [1] 입니다."]);

        let article = gen.generate("토픽", &table, &outline);
        let body = &article.sections[0].markdown;
        assert!(!body.contains('['), "no unified index exists, markers stripped: {body}");
    }

    #[test]
    fn repeated_heading_line_is_stripped() {
        let stripped = strip_repeated_heading("# 재무\n\n본문 시작 [1]", "재무");
        assert_eq!(stripped, "본문 시작 [1]");

        let untouched = strip_repeated_heading("본문 바로 시작", "재무");
        assert_eq!(untouched, "본문 바로 시작");
    }

    #[test]
    fn section_query_includes_subheadings() {
        let outline = Outline::parse("# 사업\n## 반도체\n### DRAM\n");
        let query = section_query(&outline.children[0]);
        assert_eq!(query, "사업 반도체 DRAM");
    }

    #[test]
    fn snippet_index_ranks_similar_content_first() {
        let embedder = MockEmbedder::new(8);
        let table = table_with(vec![
            passage("rev", "semiconductor revenue growth figures"),
            passage("zoo", "zebra giraffe elephant"),
        ]);

        let index = SnippetIndex::build(&table, &embedder);
        let query = crate::embedding::Embedder::embed(&embedder, "semiconductor revenue").unwrap();
        let top = index.top_k(&query, 1);
        assert_eq!(top[0].url, "rev");
    }

    #[test]
    fn skipped_heading_matching_is_case_insensitive() {
        assert!(is_skipped_heading("Introduction"));
        assert!(is_skipped_heading("SUMMARY"));
        assert!(is_skipped_heading(" conclusion "));
        assert!(!is_skipped_heading("사업 개요"));
    }
}
