//! stormgen: grounded corporate-analysis report generation.
//!
//! Given a topic and a target company, the pipeline plans an outline by
//! simulating multi-perspective research dialogues against a hybrid
//! retriever (pgvector-backed filing corpus + web search) and composes a
//! cited Wikipedia-style article in Markdown.
//!
//! Stages:
//! 1. Persona synthesis ([`pipeline::persona`])
//! 2. Knowledge curation via simulated dialogues ([`pipeline::curation`])
//! 3. Two-pass outline induction ([`pipeline::outline`])
//! 4. Section drafting + polishing ([`pipeline::article`], [`pipeline::polish`])
//!
//! The [`pipeline::orchestrator::ReportOrchestrator`] drives all four and
//! writes the final artifacts through a [`report::ReportSink`].

pub mod config;
pub mod embedding;
pub mod llm;
pub mod pipeline;
pub mod report;
pub mod retrieval;
pub mod workers;

pub use config::PipelineConfig;
pub use pipeline::orchestrator::ReportOrchestrator;
