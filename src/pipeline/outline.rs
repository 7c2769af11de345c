//! Stage 3: two-pass outline induction.
//!
//! First a prior-knowledge draft from the topic alone, then a refinement
//! pass grounded in the flattened research dialogues. The refined outline
//! is canonical; an empty refinement degrades to the draft, and an empty
//! draft aborts the run.

use std::sync::Arc;

use crate::llm::roles::RoleLm;

use super::prompts;
use super::types::{truncate_words, InformationTable, Outline};
use super::PipelineError;

/// Word budget for the flattened dialogue history fed to refinement.
const DIALOGUE_MAX_WORDS: usize = 5000;

pub struct OutlineGenerator {
    lm: Arc<RoleLm>,
}

/// Both outline versions; `refined` is what the article stage consumes.
#[derive(Debug)]
pub struct OutlinePair {
    pub draft: Outline,
    pub refined: Outline,
    pub draft_markdown: String,
    pub refined_markdown: String,
}

impl OutlineGenerator {
    pub fn new(lm: Arc<RoleLm>) -> Self {
        Self { lm }
    }

    pub fn generate(
        &self,
        topic: &str,
        table: &InformationTable,
    ) -> Result<OutlinePair, PipelineError> {
        let draft_markdown = self.lm.complete(&prompts::outline_draft(topic))?;
        let draft = Outline::parse(&draft_markdown);
        if draft.is_empty() {
            return Err(PipelineError::EmptyStageOutput {
                stage: "outline generation",
                reason: "draft outline contained no headings".into(),
            });
        }

        let dialogue_history = flatten_dialogues(table);
        if dialogue_history.is_empty() {
            // Nothing was curated; refinement has no signal to add.
            tracing::info!(topic, "no dialogue history, keeping draft outline");
            let rendered = draft.to_markdown();
            return Ok(OutlinePair {
                refined: draft.clone(),
                draft,
                draft_markdown: rendered.clone(),
                refined_markdown: rendered,
            });
        }

        let refined_markdown = self
            .lm
            .complete(&prompts::outline_refine(topic, &draft.to_markdown(), &dialogue_history))?;
        let refined = Outline::parse(&refined_markdown);

        if refined.is_empty() {
            tracing::warn!(topic, "refined outline unparseable, falling back to draft");
            let rendered = draft.to_markdown();
            return Ok(OutlinePair {
                refined: draft.clone(),
                draft,
                draft_markdown: rendered.clone(),
                refined_markdown: rendered,
            });
        }

        Ok(OutlinePair {
            draft_markdown: draft.to_markdown(),
            refined_markdown: refined.to_markdown(),
            draft,
            refined,
        })
    }
}

/// All dialogue turns across personas, interleaved writer/expert lines,
/// word-capped from the front (earliest conversations are the ones cut).
fn flatten_dialogues(table: &InformationTable) -> String {
    let mut lines: Vec<String> = Vec::new();
    for conversation in &table.conversations {
        for turn in &conversation.turns {
            lines.push(format!("Writer: {}", turn.question));
            lines.push(format!("Expert: {}", turn.answer));
        }
    }
    truncate_words(&lines.join("\n"), DIALOGUE_MAX_WORDS, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::MockLm;
    use crate::llm::roles::LmConfigs;
    use crate::pipeline::types::{Conversation, DialogueTurn, Persona};

    fn table_with_dialogue() -> InformationTable {
        InformationTable::from_conversations(vec![Conversation {
            persona: Persona::basic_fact_writer(),
            turns: vec![DialogueTurn {
                question: "주력 사업은?".into(),
                queries: vec![],
                retrieved_passages: vec![],
                answer: "메모리 반도체가 주력입니다 [1]".into(),
            }],
        }])
    }

    fn generator(responses: Vec<&str>) -> OutlineGenerator {
        OutlineGenerator::new(LmConfigs::shared(Arc::new(MockLm::new(responses))).outline_gen_lm)
    }

    #[test]
    fn two_passes_produce_draft_and_refined() {
        let gen = generator(vec![
            "# 개요\n# 사업\n",
            "# 개요\n## 연혁\n# 사업\n## 메모리 반도체\n# 재무\n",
        ]);

        let pair = gen.generate("SK하이닉스", &table_with_dialogue()).unwrap();
        assert_eq!(pair.draft.headings(), vec!["개요", "사업"]);
        assert_eq!(
            pair.refined.headings(),
            vec!["개요", "연혁", "사업", "메모리 반도체", "재무"]
        );
    }

    #[test]
    fn empty_draft_aborts_stage() {
        let gen = generator(vec!["no headings at all"]);
        let err = gen.generate("토픽", &table_with_dialogue()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyStageOutput { .. }));
    }

    #[test]
    fn empty_dialogue_history_degrades_to_draft() {
        let gen = generator(vec!["# 개요\n# 사업\n", "unused refinement"]);
        let empty_table = InformationTable::default();

        let pair = gen.generate("토픽", &empty_table).unwrap();
        assert_eq!(pair.refined, pair.draft);
        // Only the draft call was made.
        assert_eq!(pair.refined.headings(), vec!["개요", "사업"]);
    }

    #[test]
    fn unparseable_refinement_falls_back_to_draft() {
        let gen = generator(vec!["# 개요\n", "prose with no heading lines"]);
        let pair = gen.generate("토픽", &table_with_dialogue()).unwrap();
        assert_eq!(pair.refined, pair.draft);
    }

    #[test]
    fn refined_markdown_reparses_to_same_tree() {
        let gen = generator(vec![
            "# 개요\n",
            "# 개요\n## 연혁\n### 창립\n# 사업\n",
        ]);
        let pair = gen.generate("토픽", &table_with_dialogue()).unwrap();
        assert_eq!(Outline::parse(&pair.refined_markdown), pair.refined);
    }

    #[test]
    fn flatten_interleaves_writer_and_expert() {
        let text = flatten_dialogues(&table_with_dialogue());
        assert!(text.contains("Writer: 주력 사업은?"));
        assert!(text.contains("Expert: 메모리 반도체"));
    }
}
