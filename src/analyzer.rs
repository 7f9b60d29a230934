use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";

/// Instruction used when the caller supplies none.
pub const DEFAULT_ANALYSIS_PROMPT: &str = r#"Analyze this video transcript about technology/AI. Provide:

1. **Content assessment** — is the material valuable, or mostly hype? Quality of the arguments.
2. **Key insights** — what new or interesting ideas does it bring? Main theses.
3. **Practical applications** — concrete use cases, tools, techniques.
4. **Real capabilities vs. promises** — what actually works, and what is overstated?
5. **Required skills** — which human competencies are needed to benefit from this?
6. **Conclusions** — is it worth pursuing? Who is this material for?

Be concrete and critical. Do not repeat the content — analyze and judge it."#;

/// Chat completion request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

/// Chat completion response types
#[derive(Deserialize)]
struct ChatResponse {
    choices: Option<Vec<Choice>>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Callback surface for analysis diagnostics.
pub trait AnalyzeHooks: Send + Sync {
    fn on_log(&self, line: &str);
}

/// Produces a written analysis of a text via a remote model.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(
        &self,
        text: &str,
        instruction: &str,
        api_key: &str,
        hooks: &dyn AnalyzeHooks,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

/// Analysis engine talking to OpenRouter's chat completions endpoint.
pub struct OpenRouterEngine {
    client: reqwest::Client,
    model: String,
}

impl OpenRouterEngine {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
        }
    }
}

impl Default for OpenRouterEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

#[async_trait]
impl AnalysisEngine for OpenRouterEngine {
    async fn analyze(
        &self,
        text: &str,
        instruction: &str,
        api_key: &str,
        hooks: &dyn AnalyzeHooks,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        if api_key.is_empty() {
            hooks.on_log("Missing API key.");
            return Err("missing API key".into());
        }
        if text.is_empty() {
            hooks.on_log("Nothing to analyze.");
            return Err("empty input text".into());
        }

        let model_tail = self.model.rsplit('/').next().unwrap_or(&self.model);
        hooks.on_log(&format!("Sending to {model_tail}..."));

        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: instruction.to_string(),
                },
                Message {
                    role: "user",
                    content: text.to_string(),
                },
            ],
        };

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            hooks.on_log(&format!("API error: {status}"));
            return Err(format!("OpenRouter error {status}: {detail}").into());
        }

        let parsed: ChatResponse = resp.json().await?;
        hooks.on_log("Response received.");
        extract_content(parsed).ok_or_else(|| "response contained no choices".into())
    }
}

fn extract_content(resp: ChatResponse) -> Option<String> {
    resp.choices?
        .into_iter()
        .next()
        .map(|c| c.message.content.trim().to_string())
}
