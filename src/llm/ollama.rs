//! Ollama REST client.

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::graph::{Graph, Triple};
use crate::http::{self, HttpFailure};

use super::{GraphExtractor, LanguageModel, prompt};

fn default_base_url() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "llama3.2".into()
}
fn default_timeout() -> u64 {
    120
}

/// Configuration for the Ollama client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name to use.
    #[serde(default = "default_model")]
    pub model: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Client for the Ollama REST API.
pub struct OllamaClient {
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        Self { config }
    }

    /// Whether the server answers and has the configured model pulled.
    pub fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(5))
            .build();

        let Ok(resp) = agent.get(&url).call() else {
            return false;
        };
        let Ok(body) = resp.into_string() else {
            return false;
        };
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) else {
            return false;
        };
        let target = &self.config.model;
        json["models"].as_array().is_some_and(|models| {
            models
                .iter()
                .filter_map(|m| m["name"].as_str())
                .any(|m| m == target || m.split(':').next() == Some(target.as_str()))
        })
    }

    /// Generate a completion from a prompt.
    pub fn generate(&self, operation: &str, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.config.base_url);
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": 0 },
        });

        tracing::debug!(operation, model = %self.config.model, "model request");
        let json = http::post_json(&url, &body, self.config.timeout_secs, None).map_err(
            |failure| match failure {
                HttpFailure::Timeout => LlmError::Timeout {
                    operation: operation.into(),
                    timeout_secs: self.config.timeout_secs,
                },
                HttpFailure::Unreachable(_) => LlmError::Unavailable {
                    url: self.config.base_url.clone(),
                },
                other => LlmError::RequestFailed {
                    operation: operation.into(),
                    message: other.to_string(),
                },
            },
        )?;

        json["response"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::RequestFailed {
                operation: operation.into(),
                message: "missing 'response' field".into(),
            })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

impl LanguageModel for OllamaClient {
    fn summarize(&self, items: &[String]) -> Result<String, LlmError> {
        let out = self.generate("summarize", &prompt::summarize(items))?;
        prompt::parse_summary(&out)
    }

    fn rerank(
        &self,
        question: &str,
        k: usize,
        candidates: &[Triple],
    ) -> Result<Vec<Triple>, LlmError> {
        if candidates.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        let out = self.generate("rerank", &prompt::rerank(question, k, candidates))?;
        let triples = prompt::parse_rerank(&out);
        if triples.is_empty() {
            return Err(LlmError::ContractViolation {
                operation: "rerank".into(),
                message: "no `Reranked Triple` lines in output".into(),
            });
        }
        Ok(triples)
    }

    fn verbalize(&self, triples: &[Triple]) -> Result<Vec<String>, LlmError> {
        if triples.is_empty() {
            return Ok(vec![]);
        }
        let out = self.generate("verbalize", &prompt::verbalize(triples))?;
        Ok(prompt::parse_verbalize(&out))
    }

    fn answer(&self, question: &str, evidence: &[String]) -> Result<String, LlmError> {
        let out = self.generate("answer", &prompt::answer(question, evidence))?;
        Ok(out.trim().to_string())
    }
}

impl GraphExtractor for OllamaClient {
    fn extract_graph(&self, text: &str) -> Result<Graph, LlmError> {
        let out = self.generate("extract_graph", &prompt::extract_graph(text))?;
        prompt::parse_graph(&out)
    }

    fn extract_entities(&self, text: &str) -> Result<Vec<String>, LlmError> {
        let out = self.generate("extract_entities", &prompt::extract_entities(text))?;
        prompt::parse_entities(&out)
    }
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}
