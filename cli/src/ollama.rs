use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use healthsync_core::chat::ChatProvider;

/// Client for a locally hosted Ollama chat endpoint.
pub struct OllamaClient {
    client: reqwest::Client,
    host: String,
    model: String,
    rt: tokio::runtime::Handle,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(host: &str, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "healthsync-cli/{} (health data sync)",
                env!("CARGO_PKG_VERSION")
            ))
            // Local inference can be slow; give completions a wide margin.
            .timeout(std::time::Duration::from_secs(60))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            rt: tokio::runtime::Handle::current(),
        }
    }

    pub async fn chat_async(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
            stream: false,
        };

        let resp = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    anyhow!("Could not connect to Ollama at {}. Is it running?", self.host)
                } else {
                    anyhow!(e).context("Failed to reach Ollama")
                }
            })?;

        if !resp.status().is_success() {
            bail!("Ollama API returned status {}", resp.status());
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama chat response")?;
        Ok(parsed.message.content)
    }
}

impl ChatProvider for OllamaClient {
    fn chat(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        self.rt.block_on(self.chat_async(system_prompt, user_message))
    }
}
