//! Stage 1: persona synthesis.
//!
//! Discovers encyclopedia pages on related subjects, lifts their tables of
//! contents as structural inspiration, and asks the LM for a set of editor
//! personas. The fixed "Basic fact writer" persona always leads the list,
//! so the stage can never come back empty.

use std::sync::Arc;

use regex::Regex;

use crate::llm::roles::RoleLm;

use super::prompts;
use super::types::Persona;
use super::PipelineError;

/// Fetches a page body for ToC extraction. Seam for tests.
pub trait PageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, String>;
}

pub struct HttpPageFetcher {
    client: reqwest::blocking::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("stormgen/0.4")
            .build()
            .expect("failed to build page fetcher client");
        Self { client }
    }
}

impl Default for HttpPageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PageFetcher for HttpPageFetcher {
    fn fetch(&self, url: &str) -> Result<String, String> {
        let response = self.client.get(url).send().map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status().as_u16()));
        }
        response.text().map_err(|e| e.to_string())
    }
}

pub struct PersonaGenerator {
    lm: Arc<RoleLm>,
    fetcher: Arc<dyn PageFetcher>,
}

impl PersonaGenerator {
    pub fn new(lm: Arc<RoleLm>) -> Self {
        Self {
            lm,
            fetcher: Arc::new(HttpPageFetcher::new()),
        }
    }

    pub fn with_fetcher(lm: Arc<RoleLm>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { lm, fetcher }
    }

    /// Emit `1..=max_perspective + 1` personas, fact writer first.
    pub fn generate(&self, topic: &str, max_perspective: usize) -> Result<Vec<Persona>, PipelineError> {
        let mut personas = vec![Persona::basic_fact_writer()];
        if max_perspective == 0 {
            return Ok(personas);
        }

        let toc_context = self.gather_related_tocs(topic)?;

        let response = self.lm.complete(&prompts::personas(topic, &toc_context))?;
        let mut generated = parse_personas(&response);
        generated.truncate(max_perspective);

        tracing::info!(topic, count = generated.len(), "personas synthesized");
        personas.extend(generated);
        Ok(personas)
    }

    /// Collect tables of contents from related pages. Fetch failures are
    /// logged and skipped; this is inspiration, not evidence.
    fn gather_related_tocs(&self, topic: &str) -> Result<String, PipelineError> {
        let response = self.lm.complete(&prompts::related_topics(topic))?;
        let urls = extract_urls(&response);

        let mut sections = Vec::new();
        for url in urls.iter().take(5) {
            match self.fetcher.fetch(url) {
                Ok(body) => {
                    let toc = extract_toc(&body);
                    if !toc.is_empty() {
                        sections.push(toc);
                    }
                }
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "related page fetch failed, skipping");
                }
            }
        }
        Ok(sections.join("\n---\n"))
    }
}

fn extract_urls(text: &str) -> Vec<String> {
    let pattern = Regex::new(r"https?://[^\s<>\)\]]+").expect("url regex");
    pattern
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',']).to_string())
        .collect()
}

/// Headings at levels 2–6 from an HTML or Markdown page, newline-joined.
fn extract_toc(body: &str) -> String {
    let html_heading = Regex::new(r"(?is)<h([2-6])[^>]*>(.*?)</h[2-6]>").expect("heading regex");
    let tag_strip = Regex::new(r"(?s)<[^>]+>").expect("tag regex");

    let mut headings: Vec<String> = html_heading
        .captures_iter(body)
        .map(|cap| tag_strip.replace_all(&cap[2], "").trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();

    if headings.is_empty() {
        // Markdown fallback for raw-text pages.
        headings = body
            .lines()
            .filter_map(|line| {
                let trimmed = line.trim();
                let hashes = trimmed.chars().take_while(|c| *c == '#').count();
                if (2..=6).contains(&hashes) {
                    Some(trimmed[hashes..].trim().to_string())
                } else {
                    None
                }
            })
            .filter(|h| !h.is_empty())
            .collect();
    }

    headings.join("\n")
}

/// Parse "1. summary: description" numbered lines.
fn parse_personas(response: &str) -> Vec<Persona> {
    let numbered = Regex::new(r"^\s*\d+[.)]\s*(.+)$").expect("numbered-line regex");

    response
        .lines()
        .filter_map(|line| numbered.captures(line))
        .filter_map(|cap| {
            let body = cap[1].trim();
            let (name, description) = match body.split_once(':') {
                Some((name, description)) => (name.trim(), description.trim()),
                None => (body, ""),
            };
            if name.is_empty() {
                None
            } else {
                Some(Persona {
                    name: name.to_string(),
                    description: description.to_string(),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::MockLm;
    use crate::llm::roles::LmConfigs;

    struct MockFetcher {
        pages: Vec<(&'static str, &'static str)>,
    }

    impl PageFetcher for MockFetcher {
        fn fetch(&self, url: &str) -> Result<String, String> {
            self.pages
                .iter()
                .find(|(u, _)| *u == url)
                .map(|(_, body)| body.to_string())
                .ok_or_else(|| "404".to_string())
        }
    }

    fn role_lm(responses: Vec<&str>) -> Arc<RoleLm> {
        LmConfigs::shared(Arc::new(MockLm::new(responses))).question_asker_lm
    }

    #[test]
    fn zero_perspective_yields_only_fact_writer() {
        let generator = PersonaGenerator::with_fetcher(
            role_lm(vec!["unused"]),
            Arc::new(MockFetcher { pages: vec![] }),
        );
        let personas = generator.generate("SK하이닉스 기업 분석", 0).unwrap();
        assert_eq!(personas.len(), 1);
        assert!(personas[0].name.starts_with("Basic fact writer"));
    }

    #[test]
    fn personas_capped_and_fact_writer_first() {
        let lm = role_lm(vec![
            "https://en.wikipedia.org/wiki/Samsung_Electronics",
            "1. Financial analyst: focuses on statements\n\
             2. Industry historian: tracks the company's past\n\
             3. Competitor watcher: compares market share\n\
             4. Labor reporter: covers workforce topics",
        ]);
        let generator = PersonaGenerator::with_fetcher(
            lm,
            Arc::new(MockFetcher {
                pages: vec![(
                    "https://en.wikipedia.org/wiki/Samsung_Electronics",
                    "<h2>History</h2><h3>Founding</h3>",
                )],
            }),
        );

        let personas = generator.generate("SK하이닉스", 2).unwrap();
        assert_eq!(personas.len(), 3); // fact writer + 2
        assert!(personas[0].name.starts_with("Basic fact writer"));
        assert_eq!(personas[1].name, "Financial analyst");
        assert_eq!(personas[2].description, "tracks the company's past");
    }

    #[test]
    fn fetch_failures_are_silent() {
        let lm = role_lm(vec![
            "https://dead.example.com/page",
            "1. Analyst: something",
        ]);
        let generator =
            PersonaGenerator::with_fetcher(lm, Arc::new(MockFetcher { pages: vec![] }));

        let personas = generator.generate("토픽", 3).unwrap();
        assert_eq!(personas.len(), 2);
    }

    #[test]
    fn unparseable_persona_response_degrades_to_fact_writer_only() {
        let lm = role_lm(vec!["no urls here", "free-form prose with no numbering"]);
        let generator =
            PersonaGenerator::with_fetcher(lm, Arc::new(MockFetcher { pages: vec![] }));

        let personas = generator.generate("토픽", 3).unwrap();
        assert_eq!(personas.len(), 1);
    }

    #[test]
    fn extract_urls_trims_punctuation() {
        let urls = extract_urls("See https://ko.wikipedia.org/wiki/삼성전자, and others.");
        assert_eq!(urls, vec!["https://ko.wikipedia.org/wiki/삼성전자"]);
    }

    #[test]
    fn toc_extraction_from_html() {
        let toc = extract_toc("<h1>Title</h1><h2>History</h2><h3 class=\"x\">Early <b>years</b></h3>");
        // h1 is excluded, inner tags stripped.
        assert_eq!(toc, "History\nEarly years");
    }

    #[test]
    fn toc_extraction_markdown_fallback() {
        let toc = extract_toc("# Title\n## 연혁\n### 창립\ntext\n");
        assert_eq!(toc, "연혁\n창립");
    }

    #[test]
    fn parse_personas_handles_paren_numbering() {
        let personas = parse_personas("1) Alpha: first\n2) Beta\n");
        assert_eq!(personas.len(), 2);
        assert_eq!(personas[0].name, "Alpha");
        assert_eq!(personas[1].name, "Beta");
        assert!(personas[1].description.is_empty());
    }
}
