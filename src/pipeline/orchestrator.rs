//! Stage driver.
//!
//! Runs personas → curation → outline → article → polish in order,
//! publishing progress after each stage and honoring cancellation at stage
//! boundaries (in-flight LM and retriever calls are short; they finish,
//! then the pipeline halts). On success all artifacts are written to the
//! sink; on failure nothing is persisted and the status channel carries a
//! short English message only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use crate::config::PipelineConfig;
use crate::embedding::Embedder;
use crate::llm::roles::LmConfigs;
use crate::report::{artifacts, JobStatus, JobUpdate, ReportSink};
use crate::retrieval::types::Retriever;

use super::article::ArticleGenerator;
use super::curation::KnowledgeCurator;
use super::outline::{OutlineGenerator, OutlinePair};
use super::persona::{PageFetcher, PersonaGenerator};
use super::polish::ArticlePolisher;
use super::types::{Article, InformationTable};
use super::PipelineError;

/// Cooperative cancellation flag, checked at stage boundaries.
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct ReportOrchestrator {
    lms: LmConfigs,
    retriever: Arc<dyn Retriever>,
    embedder: Arc<dyn Embedder>,
    config: PipelineConfig,
    sink: Arc<dyn ReportSink>,
    status: Arc<dyn JobStatus>,
    cancel: CancelHandle,
    page_fetcher: Option<Arc<dyn PageFetcher>>,
}

impl ReportOrchestrator {
    pub fn new(
        lms: LmConfigs,
        retriever: Arc<dyn Retriever>,
        embedder: Arc<dyn Embedder>,
        config: PipelineConfig,
        sink: Arc<dyn ReportSink>,
        status: Arc<dyn JobStatus>,
    ) -> Self {
        Self {
            lms,
            retriever,
            embedder,
            config,
            sink,
            status,
            cancel: CancelHandle::new(),
            page_fetcher: None,
        }
    }

    /// Override the related-page fetcher (tests, offline runs).
    pub fn with_page_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.page_fetcher = Some(fetcher);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Execute the full pipeline for one topic. Publishes terminal status
    /// itself; the returned error is for the embedding caller.
    pub fn run(&self, job_id: &str, topic: &str) -> Result<(), PipelineError> {
        match self.run_inner(job_id, topic) {
            Ok(()) => {
                self.status.publish(job_id, JobUpdate::completed());
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id, topic, error = %e, "report generation failed");
                self.status.publish(job_id, JobUpdate::failed(&e.user_message()));
                Err(e)
            }
        }
    }

    fn run_inner(&self, job_id: &str, topic: &str) -> Result<(), PipelineError> {
        self.config.validate()?;
        let mut stage_seconds: Vec<(String, f64)> = Vec::new();

        // Stage 1: personas.
        self.checkpoint(job_id, 5, "persona synthesis")?;
        let started = Instant::now();
        let persona_generator = match self.page_fetcher.as_ref() {
            Some(fetcher) => PersonaGenerator::with_fetcher(
                self.lms.question_asker_lm.clone(),
                fetcher.clone(),
            ),
            None => PersonaGenerator::new(self.lms.question_asker_lm.clone()),
        };
        let personas = persona_generator.generate(topic, self.config.max_perspective)?;
        stage_seconds.push(("persona_synthesis".into(), started.elapsed().as_secs_f64()));

        // Stage 2: knowledge curation.
        self.checkpoint(job_id, 20, "knowledge curation")?;
        let started = Instant::now();
        let curator = KnowledgeCurator::new(
            self.lms.question_asker_lm.clone(),
            self.lms.conv_simulator_lm.clone(),
            self.retriever.clone(),
            self.config.clone(),
            self.lms.safe_mode(),
        );
        let table = curator.research(topic, &personas);
        stage_seconds.push(("knowledge_curation".into(), started.elapsed().as_secs_f64()));

        // Stage 3: outline.
        self.checkpoint(job_id, 55, "outline generation")?;
        let started = Instant::now();
        let outline_generator = OutlineGenerator::new(self.lms.outline_gen_lm.clone());
        let outlines = outline_generator.generate(topic, &table)?;
        stage_seconds.push(("outline_generation".into(), started.elapsed().as_secs_f64()));

        // Stage 4a: article.
        self.checkpoint(job_id, 70, "article generation")?;
        let started = Instant::now();
        let article_generator = ArticleGenerator::new(
            self.lms.article_gen_lm.clone(),
            self.embedder.clone(),
            self.config.clone(),
            self.lms.safe_mode(),
        );
        let draft_article = article_generator.generate(topic, &table, &outlines.refined);
        stage_seconds.push(("article_generation".into(), started.elapsed().as_secs_f64()));

        // Stage 4b: polish.
        self.checkpoint(job_id, 85, "article polishing")?;
        let started = Instant::now();
        let polisher = ArticlePolisher::new(self.lms.article_polish_lm.clone());
        let polished_article = polisher.polish(topic, &draft_article);
        stage_seconds.push(("article_polishing".into(), started.elapsed().as_secs_f64()));

        self.checkpoint(job_id, 95, "writing artifacts")?;
        self.write_artifacts(
            job_id,
            topic,
            &table,
            &outlines,
            &draft_article,
            &polished_article,
            &stage_seconds,
        )?;

        Ok(())
    }

    fn checkpoint(&self, job_id: &str, progress: u8, stage: &str) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.status
            .publish(job_id, JobUpdate::processing(progress, stage));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_artifacts(
        &self,
        job_id: &str,
        topic: &str,
        table: &InformationTable,
        outlines: &OutlinePair,
        draft_article: &Article,
        polished_article: &Article,
        stage_seconds: &[(String, f64)],
    ) -> Result<(), PipelineError> {
        self.sink
            .write(artifacts::POLISHED_ARTICLE, &polished_article.to_markdown())?;
        self.sink
            .write(artifacts::DRAFT_ARTICLE, &draft_article.to_markdown())?;
        self.sink.write(artifacts::OUTLINE, &outlines.refined_markdown)?;
        self.sink
            .write(artifacts::DRAFT_OUTLINE, &outlines.draft_markdown)?;

        self.sink.write(
            artifacts::CONVERSATION_LOG,
            &serde_json::to_string_pretty(&conversation_log(table)).unwrap_or_default(),
        )?;
        self.sink.write(
            artifacts::URL_TO_INFO,
            &serde_json::to_string_pretty(&url_to_info_artifact(table)).unwrap_or_default(),
        )?;

        let history = self.lms.collect_and_reset_history();
        let jsonl: String = history
            .iter()
            .filter_map(|record| serde_json::to_string(record).ok())
            .collect::<Vec<_>>()
            .join("\n");
        self.sink.write(artifacts::LLM_CALL_HISTORY, &jsonl)?;

        let usage: serde_json::Map<String, serde_json::Value> = self
            .lms
            .collect_and_reset_usage()
            .into_iter()
            .map(|(role, usage)| (role, serde_json::to_value(usage).unwrap_or_default()))
            .collect();

        let run_config = json!({
            "job_id": job_id,
            "topic": topic,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "config": self.config.clone(),
            "models": {
                "conv_simulator": self.lms.conv_simulator_lm.model_name(),
                "question_asker": self.lms.question_asker_lm.model_name(),
                "outline_gen": self.lms.outline_gen_lm.model_name(),
                "article_gen": self.lms.article_gen_lm.model_name(),
                "article_polish": self.lms.article_polish_lm.model_name(),
            },
            "stage_seconds": stage_seconds
                .iter()
                .map(|(name, secs)| json!({"stage": name, "seconds": secs}))
                .collect::<Vec<_>>(),
            "lm_usage": usage,
            "retriever_queries": self.retriever.query_count_and_reset(),
            "resilience": {
                "total_retries": self.lms.retry_policy().total_retries(),
                "total_rate_limits": self.lms.retry_policy().total_rate_limits(),
                "safe_mode": self.lms.safe_mode().is_engaged(),
            },
        });
        self.sink.write(
            artifacts::RUN_CONFIG,
            &serde_json::to_string_pretty(&run_config).unwrap_or_default(),
        )?;

        Ok(())
    }
}

fn conversation_log(table: &InformationTable) -> serde_json::Value {
    json!(table
        .conversations
        .iter()
        .map(|conversation| {
            json!({
                "perspective": conversation.persona.display(),
                "dlg_turns": conversation
                    .turns
                    .iter()
                    .map(|turn| {
                        json!({
                            "user_utterance": turn.question,
                            "agent_utterance": turn.answer,
                            "queries": turn.queries,
                            "search_results": turn.retrieved_passages,
                        })
                    })
                    .collect::<Vec<_>>(),
            })
        })
        .collect::<Vec<_>>())
}

fn url_to_info_artifact(table: &InformationTable) -> serde_json::Value {
    let info: serde_json::Map<String, serde_json::Value> = table
        .url_to_info
        .iter()
        .map(|(url, passage)| {
            (
                url.clone(),
                json!({
                    "title": passage.title,
                    "snippets": passage.snippets,
                    "description": passage.description,
                }),
            )
        })
        .collect();

    json!({
        "url_to_info": info,
        "url_to_unified_index": table.url_to_unified_index,
    })
}
