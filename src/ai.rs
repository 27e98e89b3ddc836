//! Narrative client for the hosted generative-text endpoint.
//!
//! The analysis flow works without it: any failure here degrades to the
//! deterministic fallback narrative in `grades::assemble`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::grades::{round_off_2_decimals, RosterRow};

const GENERATIVE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const MODEL_ENV: &str = "GRADEBOOKD_AI_MODEL";

#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("malformed model response: {0}")]
    Malformed(String),
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

/// Blocking client for `models/{model}:generateContent`. Constructed once at
/// process start; absent configuration means no client and fallback-only
/// analysis. The client never retries.
pub struct NarrativeClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl NarrativeClient {
    pub fn new(api_key: String, model: String) -> Result<Self, NarrativeError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| NarrativeError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: GENERATIVE_BASE_URL.to_string(),
            api_key,
            model,
        })
    }

    /// Read configuration from the environment. No key, no client.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(API_KEY_ENV).ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let model = std::env::var(MODEL_ENV).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        match Self::new(api_key, model) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "failed to build narrative client");
                None
            }
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One-shot narrative request: send the prompt, pull the first candidate's
    /// text, then extract the `response` field from the strict-JSON body the
    /// prompt asks for.
    pub fn generate_narrative(&self, prompt: &str) -> Result<String, NarrativeError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig { temperature: 0.2 },
        };

        tracing::debug!(model = %self.model, "requesting grade narrative");

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| NarrativeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().unwrap_or_default();
            return Err(NarrativeError::Api(status.as_u16(), error_text));
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| NarrativeError::Malformed(e.to_string()))?;
        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| NarrativeError::Malformed("no candidate text".to_string()))?;

        narrative_from_response(text)
            .ok_or_else(|| NarrativeError::Malformed("no response field in model JSON".to_string()))
    }
}

/// The prompt mirrors the grade sheet: one line per student with period
/// scores and average, plus a strict-JSON instruction so the summary can be
/// pulled out of the reply.
pub fn build_analysis_prompt(subject_name: &str, roster: &[RosterRow]) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(roster.len());
    for (i, row) in roster.iter().enumerate() {
        let average = row
            .record
            .composite()
            .map(|c| format!("{:.2}", round_off_2_decimals(c)))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{}. {} - Prelim: {}, Midterm: {}, Semifinal: {}, Final: {}, Average: {}",
            i + 1,
            row.display_name,
            fmt_score(row.record.prelim),
            fmt_score(row.record.midterm),
            fmt_score(row.record.semifinal),
            fmt_score(row.record.finals),
            average,
        ));
    }

    format!(
        "You are a student performance analyzer for the subject \"{}\".\n\
         Grades use a 1.00-5.00 scale where lower is better; an average of 3.00 or below passes.\n\
         \n\
         Student data:\n{}\n\
         \n\
         Respond in strict JSON only:\n\
         {{\n\
          \"response\": \"summary of class performance (1-2 sentences)\",\n\
          \"studentsPassed\": [{{ \"name\": \"string\", \"average\": number }}],\n\
          \"studentsFailed\": [{{ \"name\": \"string\", \"average\": number }}]\n\
         }}",
        subject_name,
        lines.join("\n")
    )
}

fn fmt_score(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{:.2}", v),
        None => "-".to_string(),
    }
}

/// Models wrap JSON in prose or code fences more often than not. Take the
/// outermost brace pair and parse what is inside.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Pull the narrative out of a strict-JSON model reply. None means the reply
/// was unusable and the caller should fall back.
pub fn narrative_from_response(text: &str) -> Option<String> {
    let raw = extract_json_object(text)?;
    let value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
    let narrative = value.get("response")?.as_str()?.trim();
    if narrative.is_empty() {
        None
    } else {
        Some(narrative.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::GradeRecord;

    fn roster_row(name: &str, prelim: Option<f64>) -> RosterRow {
        RosterRow {
            student_id: "s1".to_string(),
            display_name: name.to_string(),
            record: GradeRecord {
                id: None,
                student_id: "s1".to_string(),
                subject_id: "sub1".to_string(),
                prelim,
                midterm: None,
                semifinal: None,
                finals: None,
            },
        }
    }

    #[test]
    fn prompt_lists_students_with_scores_and_average() {
        let roster = vec![roster_row("Cruz, Ana", Some(2.5))];
        let prompt = build_analysis_prompt("Data Structures", &roster);
        assert!(prompt.contains("Data Structures"));
        assert!(prompt.contains("1. Cruz, Ana - Prelim: 2.50"));
        assert!(prompt.contains("Average: 2.50"));
        assert!(prompt.contains("strict JSON"));
    }

    #[test]
    fn prompt_renders_ungraded_periods_as_blanks() {
        let roster = vec![roster_row("Reyes, Ben", None)];
        let prompt = build_analysis_prompt("Algebra", &roster);
        assert!(prompt.contains("Prelim: -, Midterm: -"));
        assert!(prompt.contains("Average: -"));
    }

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let text = "Here you go:\n```json\n{\"response\": \"All good.\"}\n```\nthanks";
        assert_eq!(
            extract_json_object(text),
            Some("{\"response\": \"All good.\"}")
        );
    }

    #[test]
    fn narrative_parses_from_wrapped_reply() {
        let text = "Sure! {\"response\": \"Most of the class passed.\", \"studentsPassed\": []}";
        assert_eq!(
            narrative_from_response(text).as_deref(),
            Some("Most of the class passed.")
        );
    }

    #[test]
    fn malformed_reply_yields_none() {
        assert_eq!(narrative_from_response("no json here"), None);
        assert_eq!(narrative_from_response("{not valid json"), None);
        assert_eq!(narrative_from_response("{\"other\": 1}"), None);
        assert_eq!(narrative_from_response("{\"response\": \"\"}"), None);
    }
}
