//! Prompt templates for the five LM roles.
//!
//! Each template is a plain builder over strings; parsing of the LM's reply
//! lives next to the stage that issues the call.

use crate::pipeline::types::Persona;

/// Literal a writer emits to end its dialogue.
pub const END_OF_CONVERSATION: &str = "Thank you so much for your help!";

/// Literal the expert emits when the evidence cannot support an answer.
pub const NO_ANSWER: &str = "I cannot answer this question based on the available information.";

/// Placeholder injected into the history for turns outside the window.
pub const OMITTED_ANSWER: &str = "Expert: Omit the answer here due to space limit.";

pub fn related_topics(topic: &str) -> String {
    format!(
        "I'm writing a Wikipedia-style analysis page for the topic below. Suggest URLs of \
         Wikipedia or similar encyclopedia pages on subjects closely related to it, so I can \
         study how comparable pages are structured.\n\
         Topic: {topic}\n\
         List one URL per line. Output nothing but URLs."
    )
}

pub fn personas(topic: &str, toc_context: &str) -> String {
    format!(
        "You need to select a group of Wikipedia editors who will work together to create a \
         comprehensive analysis article on the topic. Each of them represents a different \
         perspective, role, or affinity related to this topic.\n\
         Tables of contents of pages on related subjects, for inspiration:\n{toc_context}\n\
         Topic of interest: {topic}\n\
         Give your answer as a numbered list, one editor per line, in the format \
         \"1. short summary of editor: description\"."
    )
}

pub fn question(topic: &str, persona: Option<&Persona>, history: &str, anti_duplicate: bool) -> String {
    let mut prompt = format!(
        "You are an experienced Wikipedia writer and want to edit a specific page about a \
         company. Besides your identity as a Wikipedia writer, you have a specific focus when \
         researching the topic.\n\
         Now, you are chatting with an expert to get information. Ask good questions to get \
         more useful information. When you have no more questions, say \
         \"{END_OF_CONVERSATION}\" to end the conversation.\n\
         Ask one question at a time and don't repeat a question you already asked.\n\
         Topic you want to write: {topic}\n"
    );

    if let Some(persona) = persona {
        prompt.push_str(&format!("Your persona: {}\n", persona.display()));
    }
    if !history.is_empty() {
        prompt.push_str(&format!("Conversation so far:\n{history}\n"));
    }
    if anti_duplicate {
        prompt.push_str(
            "Your previous question was already asked in this conversation. \
             Ask a different question covering new ground.\n",
        );
    }
    prompt.push_str("Your next question:");
    prompt
}

pub fn query_expansion(topic: &str, question: &str, max_queries: usize) -> String {
    format!(
        "You want to answer the question using a search engine over corporate filings and the \
         web. What do you type into the search box?\n\
         Write at most {max_queries} queries, one per line, each starting with \"- \".\n\
         Topic context: {topic}\n\
         Question: {question}"
    )
}

pub fn answer(topic: &str, question: &str, evidence: &str) -> String {
    format!(
        "You are an expert who can use information effectively. You are chatting with a \
         Wikipedia writer who wants to write an analysis page on the topic you know. Use the \
         gathered information below to form an informative answer.\n\
         Rules:\n\
         1. Every factual claim must cite its source as [k] using the numbers below.\n\
         2. The gathered passages begin with [[Source: ...]] provenance headers. Attribute \
         facts to the company named in the header, never to another company.\n\
         3. When a passage contains a table, state the units and base dates explicitly.\n\
         4. If the information cannot answer the question, reply exactly: \
         \"{NO_ANSWER}\"\n\
         Topic: {topic}\n\
         Gathered information:\n{evidence}\n\
         Question: {question}\n\
         Answer:"
    )
}

pub fn outline_draft(topic: &str) -> String {
    format!(
        "Write an outline for a Wikipedia-style corporate analysis page.\n\
         Topic: {topic}\n\
         Formatting:\n\
         - Use \"#\" for section titles, \"##\" for subsections, \"###\" for subsubsections, \
         and so on.\n\
         - Do not include the topic title itself as a line.\n\
         - Do not include any other information or commentary."
    )
}

pub fn outline_refine(topic: &str, draft: &str, dialogue_history: &str) -> String {
    format!(
        "Improve an outline for a Wikipedia-style corporate analysis page. You already have a \
         draft outline covering the general information. Now you want to improve it based on \
         the research conversations below to make it more informative.\n\
         Topic: {topic}\n\
         Draft outline:\n{draft}\n\
         Research conversations:\n{dialogue_history}\n\
         Formatting:\n\
         - Use \"#\" for section titles, \"##\" for subsections, \"###\" for subsubsections, \
         and so on.\n\
         - Do not include the topic title itself as a line.\n\
         - Do not include any other information or commentary."
    )
}

pub fn section(topic: &str, section_heading: &str, evidence: &str) -> String {
    format!(
        "Write a Wikipedia-style section based on the collected information.\n\
         Topic: {topic}\n\
         Section to write: {section_heading}\n\
         Collected information (numbered):\n{evidence}\n\
         Rules:\n\
         1. Start the section with \"# {section_heading}\" and use \"##\", \"###\" for \
         subsections as needed.\n\
         2. Every claim needs an inline citation [k] pointing at the numbered information \
         above. Cite inline, e.g. \"Revenue grew 12% [3].\"\n\
         3. When citing numerical data, state the unit and the base date.\n\
         4. Do not write a references or sources section.\n"
    )
}

pub fn lead_section(topic: &str, article: &str) -> String {
    format!(
        "Write a lead section for the given Wikipedia-style page with the following \
         guidelines:\n\
         1. The lead should stand on its own as a concise overview of the article's topic, at \
         most four paragraphs.\n\
         2. It should identify the topic, establish context, and summarize the most important \
         points.\n\
         3. Keep the inline [k] citations of any claim you restate.\n\
         Topic: {topic}\n\
         Draft page:\n{article}\n\
         Write the lead section text only, without a heading."
    )
}

pub fn deduplicate(article: &str) -> String {
    format!(
        "You are a careful copy editor. The page below repeats some information in several \
         sections. Remove the literal repetitions while obeying these rules:\n\
         1. Keep every \"#\"-style heading line exactly as it is.\n\
         2. Keep every inline [k] citation marker attached to its surviving sentence.\n\
         3. Do not delete content that is not repeated elsewhere.\n\
         4. Keep paragraph boundaries.\n\
         Page:\n{article}\n\
         Output the full revised page."
    )
}
