//! End-to-end runner: generate one report for a topic given environment
//! configuration.
//!
//! Usage: run_report "<topic>" [output_dir]
//!
//! Required environment:
//!   PG_HOST, PG_USER, PG_PASSWORD, PG_DATABASE  (PG_PORT optional)
//!   LLM_API_KEY, LLM_BASE_URL
//!   EMBED_API_KEY, EMBED_BASE_URL, EMBED_MODEL, EMBED_DIM
//! Optional:
//!   LLM_FAST_MODEL, LLM_STRONG_MODEL, SERPER_API_KEY

use std::sync::Arc;

use stormgen::config::StoreConfig;
use stormgen::embedding::HttpEmbedder;
use stormgen::llm::client::HttpLm;
use stormgen::llm::roles::LmConfigs;
use stormgen::llm::types::LanguageModel;
use stormgen::report::{FsReportSink, JobStatus, JobUpdate};
use stormgen::retrieval::hybrid::HybridRetriever;
use stormgen::retrieval::internal::InternalRetriever;
use stormgen::retrieval::rerank::AliasRegistry;
use stormgen::retrieval::store::PostgresKnowledgeStore;
use stormgen::retrieval::types::WebSearch;
use stormgen::retrieval::web::SerperWebRetriever;
use stormgen::{PipelineConfig, ReportOrchestrator};

struct StdoutStatus;

impl JobStatus for StdoutStatus {
    fn publish(&self, job_id: &str, update: JobUpdate) {
        match serde_json::to_string(&update) {
            Ok(line) => println!("[{job_id}] {line}"),
            Err(_) => println!("[{job_id}] {:?}", update.status),
        }
    }
}

fn required_env(key: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => {
            eprintln!("missing required environment variable: {key}");
            std::process::exit(2);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(topic) = args.next() else {
        eprintln!("usage: run_report \"<topic>\" [output_dir]");
        std::process::exit(2);
    };
    let output_dir = args.next().unwrap_or_else(|| "./report_output".to_string());

    // Fail fast on configuration before any pipeline work.
    let store_config = match StoreConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let llm_key = required_env("LLM_API_KEY");
    let llm_base = required_env("LLM_BASE_URL");
    let fast_model =
        std::env::var("LLM_FAST_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let strong_model = std::env::var("LLM_STRONG_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

    let embed_key = required_env("EMBED_API_KEY");
    let embed_base = required_env("EMBED_BASE_URL");
    let embed_model = required_env("EMBED_MODEL");
    let embed_dim: usize = required_env("EMBED_DIM").parse().unwrap_or_else(|_| {
        eprintln!("EMBED_DIM must be an integer");
        std::process::exit(2);
    });

    let fast: Arc<dyn LanguageModel> = match HttpLm::with_default_timeout(&llm_base, &llm_key, &fast_model) {
        Ok(lm) => Arc::new(lm),
        Err(e) => {
            eprintln!("failed to build LM client: {e}");
            std::process::exit(2);
        }
    };
    let strong: Arc<dyn LanguageModel> =
        match HttpLm::with_default_timeout(&llm_base, &llm_key, &strong_model) {
            Ok(lm) => Arc::new(lm),
            Err(e) => {
                eprintln!("failed to build LM client: {e}");
                std::process::exit(2);
            }
        };

    let lms = LmConfigs::new(
        fast.clone(),
        fast.clone(),
        strong.clone(),
        fast,
        strong,
    );

    let embedder = match HttpEmbedder::new(&embed_base, &embed_key, &embed_model, embed_dim) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            eprintln!("failed to build embedder: {e}");
            std::process::exit(2);
        }
    };

    let store = match PostgresKnowledgeStore::connect(&store_config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("failed to connect to corpus store: {e}");
            std::process::exit(2);
        }
    };

    let config = PipelineConfig::default();

    // Dimension mismatch aborts here, before any LM spend.
    let internal = match InternalRetriever::new(
        store,
        embedder.clone(),
        AliasRegistry::with_common_synonyms(),
        config.clone(),
    ) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("retriever startup failed: {e}");
            std::process::exit(2);
        }
    };

    let web: Option<Arc<dyn WebSearch>> = match std::env::var("SERPER_API_KEY") {
        Ok(key) if !key.is_empty() => match SerperWebRetriever::new(&key) {
            Ok(w) => Some(Arc::new(w)),
            Err(e) => {
                eprintln!("web retriever unavailable, continuing internal-only: {e}");
                None
            }
        },
        _ => None,
    };

    let retriever = Arc::new(HybridRetriever::new(internal, web, config.clone()));

    let orchestrator = ReportOrchestrator::new(
        lms,
        retriever,
        embedder,
        config,
        Arc::new(FsReportSink::new(&output_dir)),
        Arc::new(StdoutStatus),
    );

    let job_id = uuid::Uuid::new_v4().to_string();
    match orchestrator.run(&job_id, &topic) {
        Ok(()) => println!("report written to {output_dir}"),
        Err(_) => std::process::exit(1),
    }
}
