// Tab grouping suggestions.
//
// Sits beside sync, not inside it: nothing in `sync` depends on this module.
// A model-backed categorizer is used when a local model answers the startup
// availability check; otherwise, and whenever the model fails, the keyword heuristic
// answers instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::timeout::{with_timeout, Elapsed};

/// Upper bound on a single model completion.
pub const MODEL_TIMEOUT: Duration = Duration::from_secs(15);
/// Upper bound on the startup availability check.
pub const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(2);

const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";

/// Colors handed to model-proposed groups, in order.
const PALETTE: [&str; 8] = ["blue", "red", "green", "yellow", "orange", "pink", "purple", "cyan"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabSummary {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabGroupPlan {
    pub name: String,
    pub color: String,
    /// Positions in the summary list that was categorized.
    pub tabs: Vec<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum CategorizeError {
    #[error("model request failed: {0}")]
    Model(String),
    #[error(transparent)]
    Timeout(#[from] Elapsed),
    #[error("model answer is not a group list: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait Categorizer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn categorize(&self, tabs: &[TabSummary]) -> Vec<TabGroupPlan>;
}

/// Text-in, text-out capability of a language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn available(&self) -> bool;

    async fn complete(&self, prompt: &str) -> Result<String, CategorizeError>;
}

// ── Heuristic ──────────────────────────────────────────────────────

struct Bucket {
    name: &'static str,
    color: &'static str,
    url_keywords: &'static [&'static str],
    title_keywords: &'static [&'static str],
}

const BUCKETS: &[Bucket] = &[
    Bucket {
        name: "Work",
        color: "blue",
        url_keywords: &["gmail", "slack", "linkedin", "teams", "zoom", "calendar"],
        title_keywords: &[],
    },
    Bucket {
        name: "Social",
        color: "green",
        url_keywords: &["twitter", "facebook", "instagram", "youtube", "tiktok", "reddit"],
        title_keywords: &[],
    },
    Bucket {
        name: "News",
        color: "red",
        url_keywords: &["news", "cnn", "bbc", "reuters", "nytimes"],
        title_keywords: &[],
    },
    Bucket {
        name: "Development",
        color: "purple",
        url_keywords: &["github", "stackoverflow", "dev", "codepen", "jsfiddle"],
        title_keywords: &["code"],
    },
];

const OTHER: (&str, &str) = ("Other", "grey");

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicCategorizer;

impl HeuristicCategorizer {
    fn bucket_of(tab: &TabSummary) -> usize {
        let url = tab.url.to_lowercase();
        let title = tab.title.to_lowercase();
        BUCKETS
            .iter()
            .position(|bucket| {
                bucket.url_keywords.iter().any(|k| url.contains(k))
                    || bucket.title_keywords.iter().any(|k| title.contains(k))
            })
            .unwrap_or(BUCKETS.len())
    }

    pub fn group(&self, tabs: &[TabSummary]) -> Vec<TabGroupPlan> {
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); BUCKETS.len() + 1];
        for (index, tab) in tabs.iter().enumerate() {
            members[Self::bucket_of(tab)].push(index);
        }

        let labels = BUCKETS.iter().map(|bucket| (bucket.name, bucket.color)).chain([OTHER]);
        labels
            .zip(members)
            .filter(|(_, tabs)| !tabs.is_empty())
            .map(|((name, color), tabs)| TabGroupPlan { name: name.into(), color: color.into(), tabs })
            .collect()
    }
}

#[async_trait]
impl Categorizer for HeuristicCategorizer {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn categorize(&self, tabs: &[TabSummary]) -> Vec<TabGroupPlan> {
        self.group(tabs)
    }
}

// ── Model-backed ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ProposedGroup {
    name: String,
    #[serde(default)]
    tabs: Vec<usize>,
}

pub struct ModelBackedCategorizer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    fallback: HeuristicCategorizer,
}

impl ModelBackedCategorizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self::with_timeout(model, MODEL_TIMEOUT)
    }

    pub fn with_timeout(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout, fallback: HeuristicCategorizer }
    }

    async fn ask_model(&self, tabs: &[TabSummary]) -> Result<Vec<TabGroupPlan>, CategorizeError> {
        let prompt = build_prompt(tabs)?;
        let answer = with_timeout(self.timeout, self.model.complete(&prompt)).await??;
        parse_groups(&answer, tabs.len())
    }
}

#[async_trait]
impl Categorizer for ModelBackedCategorizer {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn categorize(&self, tabs: &[TabSummary]) -> Vec<TabGroupPlan> {
        match self.ask_model(tabs).await {
            Ok(groups) => groups,
            Err(error) => {
                warn!(%error, "model categorization failed, using keyword groups");
                self.fallback.group(tabs)
            }
        }
    }
}

fn build_prompt(tabs: &[TabSummary]) -> Result<String, CategorizeError> {
    let listing = serde_json::to_string(tabs)?;
    Ok(format!(
        "Categorize these browser tabs into logical groups. Return only a JSON array of objects \
         with \"name\" and \"tabs\" (array of indices). Be concise and practical.\n\n\
         Tabs: {listing}\n\n\
         Example: [{{\"name\": \"Work\", \"tabs\": [0,1,2]}}, {{\"name\": \"Social\", \"tabs\": [3,4]}}]"
    ))
}

/// Remove a surrounding markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse a model answer. Colors follow the answer's group order; groups
/// left empty after dropping out-of-range indices are omitted.
fn parse_groups(answer: &str, tab_count: usize) -> Result<Vec<TabGroupPlan>, CategorizeError> {
    let proposed: Vec<ProposedGroup> = serde_json::from_str(strip_code_fence(answer))?;
    let groups = proposed
        .into_iter()
        .enumerate()
        .filter_map(|(position, group)| {
            let tabs: Vec<usize> = group.tabs.into_iter().filter(|index| *index < tab_count).collect();
            (!tabs.is_empty()).then(|| TabGroupPlan {
                name: group.name,
                color: PALETTE[position % PALETTE.len()].to_string(),
                tabs,
            })
        })
        .collect();
    Ok(groups)
}

/// Pick the categorizer for this process. The model variant is used only
/// when `model` reports itself available within `AVAILABILITY_TIMEOUT`.
pub async fn select_categorizer(model: Option<Arc<dyn LanguageModel>>) -> Arc<dyn Categorizer> {
    let Some(model) = model else {
        return Arc::new(HeuristicCategorizer);
    };
    match with_timeout(AVAILABILITY_TIMEOUT, model.available()).await {
        Ok(true) => {
            info!("language model available, using model categorizer");
            Arc::new(ModelBackedCategorizer::new(model))
        }
        Ok(false) => {
            debug!("language model unavailable, using keyword categorizer");
            Arc::new(HeuristicCategorizer)
        }
        Err(elapsed) => {
            debug!(%elapsed, "language model availability check timed out, using keyword categorizer");
            Arc::new(HeuristicCategorizer)
        }
    }
}

// ── Ollama ─────────────────────────────────────────────────────────

/// Local model server speaking the Ollama chat API.
pub struct OllamaModel {
    client: reqwest::Client,
    api_base: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaModel {
    pub fn new(api_base: Option<&str>, model: &str) -> Self {
        let api_base = api_base.unwrap_or(DEFAULT_OLLAMA_BASE).trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .connect_timeout(AVAILABILITY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, api_base, model: model.strip_prefix("ollama/").unwrap_or(model).to_string() }
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn available(&self) -> bool {
        let url = format!("{}/api/tags", self.api_base);
        matches!(self.client.get(&url).send().await, Ok(response) if response.status().is_success())
    }

    async fn complete(&self, prompt: &str) -> Result<String, CategorizeError> {
        let url = format!("{}/api/chat", self.api_base);
        let request = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
        });

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CategorizeError::Model(format!("ollama request failed: {e}")))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(CategorizeError::Model(format!("ollama returned {status}: {body}")));
        }

        let parsed: OllamaChatResponse = serde_json::from_str(&body)?;
        Ok(parsed.message.content)
    }
}
