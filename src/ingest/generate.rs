//! Prompts for topic/test synthesis and tolerant parsing of the model output

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{LitukError, Result};
use crate::llm::{ChatMessage, extract_json_object};
use crate::storage::content::validate_question;

const SYSTEM_PROMPT: &str = "You are an expert tutor preparing candidates for the Life in the UK Test. \
Only use facts present in the provided source material. Respond with a single JSON object and nothing else.";

const TOPICS_PROMPT: &str = r#"
Read the source material below and organise it into study topics.

Return JSON:
{
  "topics": [
    {
      "title": "Short topic title",
      "description": "One or two sentence summary",
      "content": "Study notes covering the key facts, dates and names",
      "category": "history|government|traditions|society|everyday-life|general",
      "difficulty": "easy|medium|hard"
    }
  ]
}

SOURCE MATERIAL:
---
{chunks}
---
"#;

const TESTS_PROMPT: &str = r#"
Write practice tests from the source material below. Each question must have
exactly one correct option that is supported by the material.

Topics already identified: {topics}

Return JSON:
{
  "tests": [
    {
      "title": "Test title",
      "description": "What the test covers",
      "questions": [
        {
          "question": "Question text",
          "options": ["A", "B", "C", "D"],
          "correct_answer": 0,
          "explanation": "Why the answer is correct"
        }
      ]
    }
  ]
}

SOURCE MATERIAL:
---
{chunks}
---
"#;

static NON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid non-word regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedTopic {
    pub title: String,
    pub description: String,
    pub content: String,
    pub category: String,
    pub difficulty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedQuestion {
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedTest {
    pub title: String,
    pub description: String,
    pub questions: Vec<GeneratedQuestion>,
}

#[derive(Deserialize)]
struct RawTopic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    difficulty: Option<String>,
}

#[derive(Deserialize)]
struct RawTest {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    questions: Vec<Value>,
}

#[derive(Deserialize)]
struct RawQuestion {
    #[serde(default, alias = "text")]
    question: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default, alias = "correctAnswer", alias = "answer")]
    correct_answer: Value,
    #[serde(default)]
    explanation: String,
}

fn source_block(chunks: &[String]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}", i + 1, c.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Messages asking the model to synthesize topics from chunk texts
pub fn topics_prompt(chunks: &[String]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(TOPICS_PROMPT.replace("{chunks}", &source_block(chunks))),
    ]
}

/// Messages asking the model for tests, with already generated topic titles as context
pub fn tests_prompt(chunks: &[String], topic_titles: &[String]) -> Vec<ChatMessage> {
    let topics = if topic_titles.is_empty() {
        "none".to_string()
    } else {
        topic_titles.join("; ")
    };
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(
            TESTS_PROMPT
                .replace("{topics}", &topics)
                .replace("{chunks}", &source_block(chunks)),
        ),
    ]
}

/// Parse the root object of a model reply and pull out the named array
fn entries(llm_text: &str, key: &str) -> Result<Vec<Value>> {
    let json = extract_json_object(llm_text).ok_or_else(|| LitukError::Llm {
        message: format!("model reply for '{key}' contained no JSON object"),
    })?;
    let mut root: Value = serde_json::from_str(json).map_err(|e| LitukError::Llm {
        message: format!("model reply for '{key}' was not valid JSON: {e}"),
    })?;
    match root.get_mut(key).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(LitukError::Llm {
            message: format!("model reply has no '{key}' array"),
        }),
    }
}

fn normalize_difficulty(raw: Option<String>) -> String {
    let d = raw.unwrap_or_default().trim().to_lowercase();
    match d.as_str() {
        "easy" | "medium" | "hard" => d,
        _ => "medium".to_string(),
    }
}

pub fn parse_topics(llm_text: &str) -> Result<Vec<GeneratedTopic>> {
    let mut topics = Vec::new();
    for (i, value) in entries(llm_text, "topics")?.into_iter().enumerate() {
        let raw: RawTopic = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Dropping topic #{}: {}", i, e);
                continue;
            }
        };
        let title = raw.title.trim().to_string();
        if title.is_empty() {
            warn!("Dropping topic #{}: empty title", i);
            continue;
        }
        let category = raw
            .category
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "general".to_string());
        topics.push(GeneratedTopic {
            title,
            description: raw.description.trim().to_string(),
            content: raw.content.trim().to_string(),
            category,
            difficulty: normalize_difficulty(raw.difficulty),
        });
    }
    Ok(topics)
}

pub fn parse_tests(llm_text: &str) -> Result<Vec<GeneratedTest>> {
    let mut tests = Vec::new();
    for (i, value) in entries(llm_text, "tests")?.into_iter().enumerate() {
        let raw: RawTest = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Dropping test #{}: {}", i, e);
                continue;
            }
        };
        let questions: Vec<GeneratedQuestion> = raw
            .questions
            .into_iter()
            .enumerate()
            .filter_map(|(j, q)| match parse_question(q) {
                Ok(q) => Some(q),
                Err(e) => {
                    warn!("Dropping question #{} of test #{}: {}", j, i, e);
                    None
                }
            })
            .collect();
        if questions.is_empty() {
            warn!("Dropping test #{}: no valid questions", i);
            continue;
        }
        let title = match raw.title.trim() {
            "" => format!("Practice test {}", i + 1),
            t => t.to_string(),
        };
        tests.push(GeneratedTest {
            title,
            description: raw.description.trim().to_string(),
            questions,
        });
    }
    Ok(tests)
}

fn parse_question(value: Value) -> Result<GeneratedQuestion> {
    let raw: RawQuestion = serde_json::from_value(value)?;
    let options: Vec<String> = raw.options.iter().map(|o| o.trim().to_string()).collect();
    let correct_index = resolve_answer(&raw.correct_answer, &options).ok_or_else(|| {
        LitukError::validation(format!(
            "correct answer {} does not match any option",
            raw.correct_answer
        ))
    })?;
    let text = raw.question.trim().to_string();
    validate_question(&text, &options, correct_index)?;
    Ok(GeneratedQuestion {
        text,
        options,
        correct_index,
        explanation: raw.explanation.trim().to_string(),
    })
}

/// Resolve an answer given as an index, an option letter or the option text
pub fn resolve_answer(answer: &Value, options: &[String]) -> Option<usize> {
    let index = match answer {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => {
            let s = s.trim();
            options
                .iter()
                .position(|o| o.eq_ignore_ascii_case(s))
                .or_else(|| letter_index(s))
                .or_else(|| s.parse::<usize>().ok())
        }
        _ => None,
    }?;
    (index < options.len()).then_some(index)
}

fn letter_index(s: &str) -> Option<usize> {
    let mut chars = s.chars();
    let c = chars.next()?;
    let rest = chars.as_str();
    if !(rest.is_empty() || rest == ")" || rest == ".") {
        return None;
    }
    match c.to_ascii_uppercase() {
        l @ 'A'..='F' => Some(l as usize - 'A' as usize),
        _ => None,
    }
}

fn comparable(text: &str) -> String {
    NON_WORD_RE
        .replace_all(&text.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Drop questions whose text is near-identical to an earlier one
pub fn dedupe_questions(questions: Vec<GeneratedQuestion>, threshold: f64) -> Vec<GeneratedQuestion> {
    let mut seen: Vec<String> = Vec::new();
    let mut kept = Vec::with_capacity(questions.len());
    for q in questions {
        let key = comparable(&q.text);
        if seen
            .iter()
            .any(|s| strsim::normalized_levenshtein(s, &key) >= threshold)
        {
            warn!("Dropping duplicate question: {}", q.text);
            continue;
        }
        seen.push(key);
        kept.push(q);
    }
    kept
}
