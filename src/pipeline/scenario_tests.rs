//! End-to-end scenarios over the full stack: in-memory corpus → internal
//! retriever → curation → outline → article → polish → sink.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::embedding::{Embedder, MockEmbedder};
use crate::llm::client::MockLm;
use crate::llm::roles::LmConfigs;
use crate::pipeline::orchestrator::ReportOrchestrator;
use crate::report::{artifacts, InMemorySink, RecordingJobStatus};
use crate::retrieval::internal::InternalRetriever;
use crate::retrieval::rerank::AliasRegistry;
use crate::retrieval::store::InMemoryKnowledgeStore;
use crate::retrieval::types::ChunkType;

/// Corpus with SK하이닉스 and 삼성전자 reports. The Samsung overview chunk
/// mentions SK하이닉스 by name (cross-reference noise), and each company
/// carries one financial table.
fn two_company_store() -> InMemoryKnowledgeStore {
    let e = MockEmbedder::new(8);
    let mut store = InMemoryKnowledgeStore::new(8);

    let chunks: &[(i64, i64, i32, ChunkType, &str, &str, &str, serde_json::Value)] = &[
        (
            100, 2, 0, ChunkType::Text, "1. 회사의 개요",
            "SK하이닉스는 1949년에 설립된 메모리 반도체 전문 기업입니다.",
            "SK하이닉스", serde_json::json!({}),
        ),
        (
            101, 2, 1, ChunkType::Table, "재무제표",
            "|매출액|30조|\n|영업이익|5조|",
            "SK하이닉스", serde_json::json!({"has_merged_meta": true}),
        ),
        (
            102, 2, 2, ChunkType::Text, "재무제표 주석",
            "표의 단위는 조원이며 기준일은 반기말입니다.",
            "SK하이닉스", serde_json::json!({}),
        ),
        (
            50, 1, 0, ChunkType::Text, "1. 회사의 개요",
            "삼성전자는 1969년에 설립되었으며 SK하이닉스와 메모리 시장에서 경쟁합니다.",
            "삼성전자", serde_json::json!({}),
        ),
        (
            51, 1, 1, ChunkType::Table, "재무제표",
            "|매출액|300조|\n|영업이익|40조|",
            "삼성전자", serde_json::json!({}),
        ),
        (
            70, 3, 0, ChunkType::Table, "재무제표",
            "|매출액|80조| LG전자 연결 기준",
            "LG전자", serde_json::json!({}),
        ),
    ];

    for (id, report, seq, ct, path, content, company, meta) in chunks {
        store.add_chunk(
            *id, *report, *seq, *ct, path, content, company,
            meta.clone(), e.embed(content).unwrap(),
        );
    }
    store
}

fn retriever() -> Arc<InternalRetriever> {
    Arc::new(
        InternalRetriever::new(
            Arc::new(two_company_store()),
            Arc::new(MockEmbedder::new(8)),
            AliasRegistry::with_common_synonyms(),
            PipelineConfig {
                min_relevance_score: 0.0,
                search_top_k: 5,
                ..Default::default()
            },
        )
        .unwrap(),
    )
}

/// One-question curation run whose expert queries are scripted.
fn lms_with_queries(queries_response: &str) -> LmConfigs {
    LmConfigs::new(
        Arc::new(MockLm::new(vec![queries_response, "정리한 답변 [1]"])),
        Arc::new(MockLm::new(vec![
            "핵심 정보를 알려주세요",
            "Thank you so much for your help!",
        ])),
        Arc::new(MockLm::new(vec![
            "# 기업 정보\n# 재무 현황\n",
            "# 기업 정보\n# 재무 현황\n## 수익성\n",
        ])),
        Arc::new(MockLm::single("본문 서술 [1] 입니다.")),
        Arc::new(MockLm::new(vec!["리드 요약 [1]", ""])),
    )
}

fn run_to_sink(topic: &str, queries_response: &str) -> Arc<InMemorySink> {
    let sink = Arc::new(InMemorySink::new());
    let orch = ReportOrchestrator::new(
        lms_with_queries(queries_response),
        retriever(),
        Arc::new(MockEmbedder::new(8)),
        PipelineConfig {
            max_perspective: 0,
            max_conv_turn: 1,
            search_top_k: 5,
            min_relevance_score: 0.0,
            ..Default::default()
        },
        sink.clone(),
        Arc::new(RecordingJobStatus::new()),
    );
    orch.run("scenario-job", topic).unwrap();
    sink
}

fn url_to_info_of(sink: &InMemorySink) -> serde_json::Value {
    serde_json::from_str(&sink.get(artifacts::URL_TO_INFO).unwrap()).unwrap()
}

#[test]
fn factoid_run_is_entity_restricted() {
    // Factoid query targeting SK하이닉스: every internal passage in the
    // final table must come from SK하이닉스, none from 삼성전자, even
    // though the Samsung chunk mentions the target by name.
    let sink = run_to_sink("SK하이닉스 기업 개요", "- SK하이닉스 설립 개요");

    let info = url_to_info_of(&sink);
    let urls: Vec<&str> = info["url_to_info"]
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();

    assert!(!urls.is_empty(), "factoid run must retrieve something");
    for url in &urls {
        assert!(
            !url.starts_with("dart_report_1_"),
            "삼성전자 passage {url} leaked into a factoid run"
        );
        assert!(
            !url.starts_with("dart_report_3_"),
            "LG전자 passage {url} leaked into a factoid run"
        );
    }

    // Source tags in the conversation log agree.
    let log: serde_json::Value =
        serde_json::from_str(&sink.get(artifacts::CONVERSATION_LOG).unwrap()).unwrap();
    for result in log[0]["dlg_turns"][0]["search_results"].as_array().unwrap() {
        assert_eq!(result["source_tag"], "SK하이닉스");
    }
}

#[test]
fn analytical_run_keeps_both_companies_drops_foreign_tables() {
    let sink = run_to_sink(
        "삼성전자와 SK하이닉스 비교 분석",
        "- 삼성전자 SK하이닉스 점유율 비교 분석",
    );

    let info = url_to_info_of(&sink);
    let urls: Vec<&str> = info["url_to_info"]
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();

    assert!(
        urls.iter().any(|u| u.starts_with("dart_report_2_")),
        "SK하이닉스 passages expected, got {urls:?}"
    );
    assert!(
        urls.iter().any(|u| u.starts_with("dart_report_1_")),
        "삼성전자 passages expected in a comparative run, got {urls:?}"
    );
    // The LG전자 table matches neither target and is table-typed: dropped.
    assert!(
        !urls.iter().any(|u| u.starts_with("dart_report_3_")),
        "unmatched foreign table must be dropped, got {urls:?}"
    );
}

#[test]
fn unit_carrying_table_passage_is_fully_composed() {
    let sink = run_to_sink("SK하이닉스 재무 분석", "- SK하이닉스 매출액 영업이익 재무제표 분석");

    let info = url_to_info_of(&sink);
    let table_entry = info["url_to_info"]
        .as_object()
        .unwrap()
        .get("dart_report_2_chunk_101")
        .expect("merged-meta table chunk retrieved");

    let snippet = table_entry["snippets"][0].as_str().unwrap();
    let source_at = snippet.find("[[Source: SK하이닉스").expect("source header");
    let note_at = snippet.find("[Note: merged meta info").expect("merged-meta note");
    let prev_at = snippet.find("[Previous context]").expect("previous context");
    let table_at = snippet.find("[Table]").expect("table body");
    let next_at = snippet.find("[Next context]").expect("next context");

    assert!(source_at < note_at && note_at < prev_at && prev_at < table_at && table_at < next_at);
    assert!(snippet.contains("단위는 조원"));
}

#[test]
fn citation_numbering_is_stable_across_identical_runs() {
    let first = run_to_sink("SK하이닉스 기업 개요", "- SK하이닉스 설립 개요");
    let second = run_to_sink("SK하이닉스 기업 개요", "- SK하이닉스 설립 개요");

    let index_a = url_to_info_of(&first)["url_to_unified_index"].clone();
    let index_b = url_to_info_of(&second)["url_to_unified_index"].clone();
    assert_eq!(index_a, index_b, "same corpus and seeds must number identically");
}

#[test]
fn polished_headings_are_superset_of_refined_outline() {
    let sink = run_to_sink("SK하이닉스 기업 개요", "- SK하이닉스 설립 개요");

    let outline = sink.get(artifacts::OUTLINE).unwrap();
    let outline_top: Vec<String> = outline
        .lines()
        .filter(|l| l.starts_with("# "))
        .map(|l| l[2..].trim().to_string())
        .collect();

    let polished = sink.get(artifacts::POLISHED_ARTICLE).unwrap();
    let polished_top: Vec<String> = polished
        .lines()
        .filter(|l| l.starts_with("# "))
        .map(|l| l[2..].trim().to_string())
        .collect();

    for heading in &outline_top {
        assert!(
            polished_top.contains(heading),
            "outline heading '{heading}' missing from polished article"
        );
    }
    // The polish stage added the lead on top.
    assert!(polished_top.len() > outline_top.len());
}

#[test]
fn every_polished_citation_resolves_to_the_unified_index() {
    let sink = run_to_sink("SK하이닉스 기업 개요", "- SK하이닉스 설립 개요");

    let info = url_to_info_of(&sink);
    let valid: std::collections::HashSet<u64> = info["url_to_unified_index"]
        .as_object()
        .unwrap()
        .values()
        .map(|v| v.as_u64().unwrap())
        .collect();

    let polished = sink.get(artifacts::POLISHED_ARTICLE).unwrap();
    let marker = regex::Regex::new(r"\[(\d+)\]").unwrap();
    for cap in marker.captures_iter(&polished) {
        let k: u64 = cap[1].parse().unwrap();
        assert!(valid.contains(&k), "dangling citation [{k}] in polished article");
    }
}
