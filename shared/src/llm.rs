//! Chat-completion client used by the assessment pipeline. Dispatches a
//! single-turn conversation to the selected provider over `awc` and returns
//! the assistant's answer as plain text.

use actix_web::http::header;
use awc::Client;
use openai::chat::{ChatCompletion, ChatCompletionMessage, ChatCompletionMessageRole};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, warn};

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http error: {0}")]
    Http(u16),
    #[error("parse error: {0}")]
    Parse(serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    Xai,
}

impl ProviderKind {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "google" => Some(Self::Google),
            "xai" => Some(Self::Xai),
            _ => None,
        }
    }
}

/// Response size cap for Anthropic, which requires an explicit value.
const ANTHROPIC_MAX_TOKENS: u32 = 8192;

pub fn http_client(timeout_ms: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .add_default_header((header::ACCEPT_ENCODING, "br, gzip, deflate"))
        .finish()
}

fn msg(role: ChatCompletionMessageRole, txt: &str) -> ChatCompletionMessage {
    ChatCompletionMessage {
        role,
        content: Some(txt.to_string()),
        ..Default::default()
    }
}

fn openai_base() -> String {
    std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com".into())
}

fn anthropic_base() -> String {
    std::env::var("ANTHROPIC_API_BASE").unwrap_or_else(|_| "https://api.anthropic.com".into())
}

fn google_base() -> String {
    std::env::var("GOOGLE_API_BASE")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into())
}

fn xai_base() -> String {
    std::env::var("XAI_API_BASE").unwrap_or_else(|_| "https://api.x.ai".into())
}

/// Send a single-turn chat to the given provider and return the answer text.
pub async fn chat(
    client: &Client,
    provider: ProviderKind,
    model: &str,
    api_key: &str,
    system: Option<&str>,
    user: &str,
) -> Result<String, LlmError> {
    match provider {
        ProviderKind::OpenAi => {
            openai_compat_chat(client, &openai_base(), model, api_key, system, user).await
        }
        ProviderKind::Xai => {
            openai_compat_chat(client, &xai_base(), model, api_key, system, user).await
        }
        ProviderKind::Anthropic => anthropic_chat(client, model, api_key, system, user).await,
        ProviderKind::Google => google_chat(client, model, api_key, system, user).await,
    }
}

/// Retry wrapper with the exponential backoff used across the services.
pub async fn chat_with_retries(
    client: &Client,
    provider: ProviderKind,
    model: &str,
    api_key: &str,
    system: Option<&str>,
    user: &str,
    retries: usize,
) -> Result<String, LlmError> {
    let mut last = LlmError::Network("no attempt made".into());
    for i in 0..=retries {
        match chat(client, provider, model, api_key, system, user).await {
            Ok(answer) => return Ok(answer),
            Err(e) => {
                warn!(attempt = i, %e, "chat attempt failed");
                last = e;
            }
        }
        let wait = 100 * (1u64 << i).min(8);
        time::sleep(Duration::from_millis(wait)).await;
    }
    Err(last)
}

/* ---------------- OpenAI-compatible (OpenAI, xAI) ---------------- */

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatCompletionMessage],
}

async fn openai_compat_chat(
    client: &Client,
    base: &str,
    model: &str,
    api_key: &str,
    system: Option<&str>,
    user: &str,
) -> Result<String, LlmError> {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(msg(ChatCompletionMessageRole::System, system));
    }
    messages.push(msg(ChatCompletionMessageRole::User, user));

    let req = ChatRequest {
        model,
        messages: &messages,
    };
    let url = format!("{}/v1/chat/completions", base);
    debug!(model, %url, "\u{2192} chat request");
    let mut res = client
        .post(url)
        .insert_header((header::AUTHORIZATION, format!("Bearer {}", api_key)))
        .send_json(&req)
        .await
        .map_err(|e| {
            error!("network error to provider: {e}");
            LlmError::Network(e.to_string())
        })?;

    let bytes = res
        .body()
        .await
        .map_err(|e| LlmError::Network(e.to_string()))?;
    debug!(
        status = %res.status(),
        "\u{2190} body = {}",
        String::from_utf8_lossy(&bytes[..bytes.len().min(1024)])
    );
    if !res.status().is_success() {
        return Err(LlmError::Http(res.status().as_u16()));
    }

    let chat: ChatCompletion = serde_json::from_slice(&bytes).map_err(LlmError::Parse)?;
    let answer = chat
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default();
    Ok(answer)
}

/* ---------------- Anthropic ---------------- */

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContent>,
}

async fn anthropic_chat(
    client: &Client,
    model: &str,
    api_key: &str,
    system: Option<&str>,
    user: &str,
) -> Result<String, LlmError> {
    let req = AnthropicRequest {
        model,
        max_tokens: ANTHROPIC_MAX_TOKENS,
        system,
        messages: vec![AnthropicMessage {
            role: "user",
            content: user,
        }],
    };
    let url = format!("{}/v1/messages", anthropic_base());
    debug!(model, %url, "\u{2192} chat request");
    let mut res = client
        .post(url)
        .insert_header(("x-api-key", api_key))
        .insert_header(("anthropic-version", "2023-06-01"))
        .send_json(&req)
        .await
        .map_err(|e| {
            error!("network error to provider: {e}");
            LlmError::Network(e.to_string())
        })?;

    let bytes = res
        .body()
        .await
        .map_err(|e| LlmError::Network(e.to_string()))?;
    if !res.status().is_success() {
        debug!(
            status = %res.status(),
            "\u{2190} body = {}",
            String::from_utf8_lossy(&bytes[..bytes.len().min(1024)])
        );
        return Err(LlmError::Http(res.status().as_u16()));
    }

    let parsed: AnthropicResponse = serde_json::from_slice(&bytes).map_err(LlmError::Parse)?;
    Ok(parsed
        .content
        .into_iter()
        .map(|c| c.text)
        .collect::<Vec<_>>()
        .join(""))
}

/* ---------------- Google ---------------- */

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
}

#[derive(Deserialize)]
struct GeminiAnswerPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GeminiAnswerContent {
    #[serde(default)]
    parts: Vec<GeminiAnswerPart>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiAnswerContent,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

async fn google_chat(
    client: &Client,
    model: &str,
    api_key: &str,
    system: Option<&str>,
    user: &str,
) -> Result<String, LlmError> {
    let req = GeminiRequest {
        contents: vec![GeminiContent {
            parts: vec![GeminiPart { text: user }],
        }],
        system_instruction: system.map(|s| GeminiContent {
            parts: vec![GeminiPart { text: s }],
        }),
    };
    let url = format!(
        "{}/v1beta/models/{}:generateContent?key={}",
        google_base(),
        model,
        api_key
    );
    debug!(model, "\u{2192} chat request (generateContent)");
    let mut res = client.post(url).send_json(&req).await.map_err(|e| {
        error!("network error to provider: {e}");
        LlmError::Network(e.to_string())
    })?;

    let bytes = res
        .body()
        .await
        .map_err(|e| LlmError::Network(e.to_string()))?;
    if !res.status().is_success() {
        debug!(
            status = %res.status(),
            "\u{2190} body = {}",
            String::from_utf8_lossy(&bytes[..bytes.len().min(1024)])
        );
        return Err(LlmError::Http(res.status().as_u16()));
    }

    let parsed: GeminiResponse = serde_json::from_slice(&bytes).map_err(LlmError::Parse)?;
    Ok(parsed
        .candidates
        .first()
        .map(|c| {
            c.content
                .parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default())
}
