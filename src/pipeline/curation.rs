//! Stage 2: multi-perspective knowledge curation.
//!
//! One simulated writer↔expert dialogue per persona, run concurrently on
//! the bounded worker pool. Each turn: the writer asks, the question is
//! expanded into search queries, the retriever gathers evidence, and the
//! expert answers from that evidence alone. After all dialogues complete,
//! a single-threaded merge builds the information table so the citation
//! numbering is deterministic.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::llm::roles::RoleLm;
use crate::retrieval::types::{Passage, Retriever};
use crate::workers::{map_bounded, SafeMode};

use super::prompts;
use super::types::{truncate_words, Conversation, DialogueTurn, InformationTable, Persona};

/// Turns beyond this many are collapsed to a placeholder in the history.
const HISTORY_FULL_TURNS: usize = 4;
/// Word budget for the rendered history.
const HISTORY_MAX_WORDS: usize = 2500;

pub struct KnowledgeCurator {
    question_lm: Arc<RoleLm>,
    simulator_lm: Arc<RoleLm>,
    retriever: Arc<dyn Retriever>,
    config: PipelineConfig,
    safe_mode: SafeMode,
}

impl KnowledgeCurator {
    pub fn new(
        question_lm: Arc<RoleLm>,
        simulator_lm: Arc<RoleLm>,
        retriever: Arc<dyn Retriever>,
        config: PipelineConfig,
        safe_mode: SafeMode,
    ) -> Self {
        Self {
            question_lm,
            simulator_lm,
            retriever,
            config,
            safe_mode,
        }
    }

    /// Run all dialogues and assemble the information table.
    pub fn research(&self, topic: &str, personas: &[Persona]) -> InformationTable {
        let workers = self.config.max_thread_num.min(personas.len().max(1));

        let conversations = map_bounded(
            workers,
            &self.safe_mode,
            personas.to_vec(),
            |_, persona| {
                let turns = self.run_dialogue(topic, &persona);
                tracing::info!(
                    persona = %persona.name,
                    turns = turns.len(),
                    "dialogue complete"
                );
                Conversation { persona, turns }
            },
        );

        InformationTable::from_conversations(conversations)
    }

    /// One persona's dialogue: ask → expand → retrieve → answer, at most
    /// `max_conv_turn` times.
    fn run_dialogue(&self, topic: &str, persona: &Persona) -> Vec<DialogueTurn> {
        let mut turns: Vec<DialogueTurn> = Vec::new();
        let mut seen_urls: HashSet<String> = HashSet::new();

        for _ in 0..self.config.max_conv_turn {
            let Some(question) = self.ask_question(topic, persona, &turns) else {
                break;
            };

            let queries = self.expand_queries(topic, &question);
            let passages =
                self.retriever
                    .retrieve(&queries, &seen_urls, self.config.search_top_k);
            for passage in &passages {
                seen_urls.insert(passage.url.clone());
            }

            let answer = self.answer_question(topic, &question, &passages);

            turns.push(DialogueTurn {
                question,
                queries,
                retrieved_passages: passages,
                answer,
            });
        }

        turns
    }

    /// Writer turn. Returns `None` when the dialogue should end: the writer
    /// thanked the expert, produced nothing, or kept repeating itself.
    fn ask_question(&self, topic: &str, persona: &Persona, turns: &[DialogueTurn]) -> Option<String> {
        let history = render_history(turns);
        let persona_arg = if persona.name.starts_with("Basic fact writer") {
            None
        } else {
            Some(persona)
        };

        let question = self
            .question_lm
            .complete(&prompts::question(topic, persona_arg, &history, false))
            .unwrap_or_default();
        let question = question.trim().to_string();

        if question.is_empty() || question.contains(prompts::END_OF_CONVERSATION) {
            return None;
        }

        if turns.iter().any(|t| t.question == question) {
            let retry = self
                .question_lm
                .complete(&prompts::question(topic, persona_arg, &history, true))
                .unwrap_or_default();
            let retry = retry.trim().to_string();
            // A second identical question means the writer is out of
            // material; stop rather than loop.
            if retry.is_empty()
                || retry.contains(prompts::END_OF_CONVERSATION)
                || turns.iter().any(|t| t.question == retry)
            {
                return None;
            }
            return Some(retry);
        }

        Some(question)
    }

    /// Expert pre-step: turn the question into at most
    /// `max_search_queries_per_turn` search queries.
    fn expand_queries(&self, topic: &str, question: &str) -> Vec<String> {
        let response = self
            .simulator_lm
            .complete(&prompts::query_expansion(
                topic,
                question,
                self.config.max_search_queries_per_turn,
            ))
            .unwrap_or_default();

        let mut queries: Vec<String> = response
            .lines()
            .map(|line| {
                line.trim()
                    .trim_start_matches(['-', '*', '•'])
                    .trim()
                    .trim_matches('"')
                    .to_string()
            })
            .filter(|q| !q.is_empty())
            .collect();

        if queries.is_empty() {
            queries.push(question.to_string());
        }
        queries.truncate(self.config.max_search_queries_per_turn.max(1));
        queries
    }

    /// Expert turn. Empty evidence short-circuits to the canonical
    /// no-answer line; a blocked LM response stays an empty string.
    fn answer_question(&self, topic: &str, question: &str, passages: &[Passage]) -> String {
        if passages.is_empty() {
            return prompts::NO_ANSWER.to_string();
        }

        let evidence = render_evidence(passages);
        self.simulator_lm
            .complete(&prompts::answer(topic, question, &evidence))
            .map(|a| a.trim().to_string())
            .unwrap_or_default()
    }
}

/// Render the dialogue history the writer sees: the last few turns in
/// full, older answers collapsed, the whole thing word-capped keeping the
/// most recent content.
fn render_history(turns: &[DialogueTurn]) -> String {
    if turns.is_empty() {
        return String::new();
    }

    let omit_before = turns.len().saturating_sub(HISTORY_FULL_TURNS);
    let mut lines: Vec<String> = Vec::with_capacity(turns.len() * 2);
    for (i, turn) in turns.iter().enumerate() {
        lines.push(format!("Writer: {}", turn.question));
        if i < omit_before {
            lines.push(prompts::OMITTED_ANSWER.to_string());
        } else {
            lines.push(format!("Expert: {}", turn.answer));
        }
    }

    truncate_words(&lines.join("\n"), HISTORY_MAX_WORDS, true)
}

/// Number the passages for the answer prompt. Content is already
/// source-tagged by the retriever.
fn render_evidence(passages: &[Passage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, passage)| format!("[{}] {}", i + 1, passage.snippets.join("\n")))
        .collect::<Vec<_>>()
        .join("\n\n")
}
