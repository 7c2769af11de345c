//! Source tagging.
//!
//! The LM must *read* provenance as text, not infer it: score adjustments
//! alone still permit hallucinated attribution. Every internal passage gets
//! a visible header naming the company and report it came from, using the
//! company name resolved through the report JOIN.

use super::types::Passage;

/// Header prepended to an internal passage's content.
pub fn source_header(company_name: &str, report_id: i64) -> String {
    format!("[[Source: {company_name} business report (Report ID: {report_id})]]\n\n")
}

/// Prepend the provenance header to each internal passage and record the
/// resolved company as its source tag. Passages without provenance (web
/// results) pass through unchanged.
pub fn apply_source_tags(passages: &mut [Passage]) {
    for passage in passages.iter_mut() {
        let Some(provenance) = passage.provenance.as_ref() else {
            continue;
        };

        let header = source_header(&provenance.company_name, provenance.report_id);
        passage.source_tag = provenance.company_name.clone();

        match passage.snippets.first_mut() {
            Some(first) if !first.starts_with("[[Source:") => {
                *first = format!("{header}{first}");
            }
            Some(_) => {} // already tagged on a previous sighting
            None => passage.snippets.push(header),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::types::{ChunkType, Provenance};

    fn internal_passage(content: &str) -> Passage {
        Passage {
            url: "dart_report_2_chunk_200".into(),
            title: "사업의 내용".into(),
            snippets: vec![content.to_string()],
            description: String::new(),
            score: 0.95,
            source_tag: String::new(),
            provenance: Some(Provenance {
                chunk_id: 200,
                report_id: 2,
                company_name: "SK하이닉스".into(),
                chunk_type: ChunkType::Text,
                sequence_order: 5,
                has_merged_meta: false,
            }),
        }
    }

    #[test]
    fn header_names_company_and_report() {
        let header = source_header("SK하이닉스", 2);
        assert_eq!(header, "[[Source: SK하이닉스 business report (Report ID: 2)]]\n\n");
    }

    #[test]
    fn tagging_prepends_header_and_sets_source_tag() {
        let mut passages = vec![internal_passage("당사는 메모리 반도체를 생산합니다.")];
        apply_source_tags(&mut passages);

        assert!(passages[0].snippets[0].starts_with("[[Source: SK하이닉스"));
        assert!(passages[0].snippets[0].contains("당사는 메모리 반도체를"));
        assert_eq!(passages[0].source_tag, "SK하이닉스");
    }

    #[test]
    fn tagging_is_idempotent() {
        let mut passages = vec![internal_passage("본문")];
        apply_source_tags(&mut passages);
        let once = passages[0].snippets[0].clone();
        apply_source_tags(&mut passages);
        assert_eq!(passages[0].snippets[0], once);
    }

    #[test]
    fn web_passages_pass_through() {
        let mut passages = vec![Passage {
            url: "https://example.com/article".into(),
            title: "뉴스".into(),
            snippets: vec!["웹 본문".into()],
            description: String::new(),
            score: 0.4,
            source_tag: "web".into(),
            provenance: None,
        }];
        apply_source_tags(&mut passages);
        assert_eq!(passages[0].snippets[0], "웹 본문");
        assert_eq!(passages[0].source_tag, "web");
    }
}
