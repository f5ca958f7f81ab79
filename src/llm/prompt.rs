//! Prompt templates and output parsers for the text-generation model.
//!
//! The rerank and verbalize prompts ask for numbered lines
//! (`Reranked Triple1: a --> r --> b`, `Path-based Evidence 1: ...`) that the
//! parsers below read back. Parsers are lenient about whitespace and numbering
//! but never invent content.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::LlmError;
use crate::graph::{Graph, Triple};

static RERANKED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*reranked\s*triple\s*\d*\s*:\s*(.+?)\s*-->\s*(.+?)\s*-->\s*(.+?)\s*$")
        .expect("static regex")
});

static EVIDENCE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*\**\s*path-based\s+evidence\s*\d+\s*\**\s*:\s*\**\s*").expect("static regex")
});

pub fn summarize(items: &[String]) -> String {
    format!(
        "Given a collection of entities, find one or two words to describe them.\n\
         Reply with the words only.\n\n\
         Entities: {}\n\n\
         Description:",
        serde_json::Value::from(items.to_vec())
    )
}

/// First non-empty line, stripped of quotes and trailing punctuation.
pub fn parse_summary(output: &str) -> Result<String, LlmError> {
    let label = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.trim_start_matches("Description:").trim())
        .map(|l| l.trim_matches(|c| matches!(c, '"' | '\'' | '*' | '.')).trim())
        .unwrap_or_default();
    if label.is_empty() {
        return Err(LlmError::ContractViolation {
            operation: "summarize".into(),
            message: "empty label".into(),
        });
    }
    Ok(label.to_string())
}

pub fn rerank(question: &str, k: usize, candidates: &[Triple]) -> String {
    let graph: Vec<String> = candidates
        .iter()
        .map(|t| format!("{}->{}->{}", t.subject, t.relation, t.object))
        .collect();
    let format: Vec<String> = (1..=k)
        .map(|i| format!("Reranked Triple{i}: xxx --> xxx --> xxx"))
        .collect();
    format!(
        "There is a question and some knowledge graph. The knowledge graphs follow \
         entity->relationship->entity list format.\n\
         Graph:\n{}\n\n\
         Question:\n{question}\n\n\
         Please rerank the knowledge graph and output at most {k} important and relevant \
         triples for solving the given question. Output the reranked knowledge in the \
         following format:\n{}\n\n\
         Answer:",
        graph.join("\n"),
        format.join("\n"),
    )
}

/// Read `Reranked TripleN: a --> r --> b` lines; other lines are ignored.
pub fn parse_rerank(output: &str) -> Vec<Triple> {
    output
        .lines()
        .filter_map(|line| RERANKED_LINE.captures(line))
        .map(|c| Triple::new(&c[1], &c[2], &c[3]))
        .collect()
}

pub fn verbalize(triples: &[Triple]) -> String {
    let lines: Vec<String> = triples
        .iter()
        .enumerate()
        .map(|(i, t)| format!("Reranked Triple{}: {t}", i + 1))
        .collect();
    format!(
        "There are some knowledge graph paths. They follow entity->relationship->entity \
         format.\n\n{}\n\n\
         Use the knowledge graph information. Try to convert them to natural language, \
         respectively.\n\
         Use single quotation marks for entity name and relation name.\n\
         And name them as Path-based Evidence 1, Path-based Evidence 2,...\n\n\
         Output:",
        lines.join("\n"),
    )
}

/// Collect the text after each `Path-based Evidence N:` header.
///
/// A statement runs until the next header; continuation lines are joined
/// with a space. Text before the first header is dropped.
pub fn parse_verbalize(output: &str) -> Vec<String> {
    let mut statements: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    for line in output.lines() {
        if let Some(m) = EVIDENCE_HEADER.find(line) {
            if let Some(done) = current.take() {
                statements.push(done);
            }
            current = Some(line[m.end()..].trim().to_string());
        } else if let Some(text) = current.as_mut() {
            let extra = line.trim();
            if !extra.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(extra);
            }
        }
    }
    statements.extend(current);
    statements
}

pub fn answer(question: &str, evidence: &[String]) -> String {
    let lines: Vec<String> = evidence
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Path-based Evidence {}: {s}", i + 1))
        .collect();
    format!(
        "Question: {question}\n\n\
         You have some knowledge information in the following:\n\
         ###{}\n\n\
         Answer: Let's think step by step:",
        lines.join("\n"),
    )
}

pub fn extract_graph(text: &str) -> String {
    format!(
        "Extract a knowledge graph from the text below.\n\
         Return a single JSON object with two fields:\n\
         \"entities\": a list of entity names,\n\
         \"relations\": a list of [subject, relation, object] triples whose subject and \
         object are both in \"entities\".\n\
         Only return the JSON object, no other text.\n\n\
         Text:\n{text}"
    )
}

pub fn extract_entities(text: &str) -> String {
    format!(
        "List the named entities mentioned in the text below, in the order they appear.\n\
         Return a JSON array of strings. Only return the JSON array, no other text.\n\n\
         Text:\n{text}"
    )
}

/// Slice from the first `open` to the last `close`, if any.
fn json_span(output: &str, open: char, close: char) -> Option<&str> {
    let start = output.find(open)?;
    let end = output.rfind(close)?;
    (end > start).then(|| &output[start..=end])
}

fn violation(operation: &str, message: impl Into<String>) -> LlmError {
    LlmError::ContractViolation {
        operation: operation.into(),
        message: message.into(),
    }
}

/// Parse the object requested by [`extract_graph`].
///
/// Relations with an empty component are dropped.
pub fn parse_graph(output: &str) -> Result<Graph, LlmError> {
    #[derive(serde::Deserialize)]
    struct Extracted {
        #[serde(default)]
        entities: Vec<String>,
        #[serde(default)]
        relations: Vec<(String, String, String)>,
    }

    let span = json_span(output, '{', '}')
        .ok_or_else(|| violation("extract_graph", "no JSON object found in response"))?;
    let parsed: Extracted = serde_json::from_str(span)
        .map_err(|e| violation("extract_graph", format!("JSON parse error: {e}")))?;

    let mut graph = Graph::new();
    for entity in parsed.entities {
        let entity = entity.trim();
        if !entity.is_empty() {
            graph.insert_entity(entity);
        }
    }
    for (s, r, o) in parsed.relations {
        let (s, r, o) = (s.trim(), r.trim(), o.trim());
        if !s.is_empty() && !r.is_empty() && !o.is_empty() {
            graph.insert_relation(Triple::new(s, r, o));
        }
    }
    Ok(graph)
}

/// Parse the array requested by [`extract_entities`], keeping first-seen order.
pub fn parse_entities(output: &str) -> Result<Vec<String>, LlmError> {
    let span = json_span(output, '[', ']')
        .ok_or_else(|| violation("extract_entities", "no JSON array found in response"))?;
    let parsed: Vec<String> = serde_json::from_str(span)
        .map_err(|e| violation("extract_entities", format!("JSON parse error: {e}")))?;
    let mut out: Vec<String> = Vec::new();
    for e in parsed {
        let e = e.trim().to_string();
        if !e.is_empty() && !out.contains(&e) {
            out.push(e);
        }
    }
    Ok(out)
}
