use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::utils::text::mask_api_key;

pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0}")]
    BuildFailed(String),
    #[error("Unexpected response from the AI provider: {0}")]
    InvalidResponse(String),
    #[error("The AI provider blocked the request: {0}")]
    Blocked(String),
}

/// 模型名前缀决定的供应商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// `googleai/<model>`
    Gemini,
    /// `openai/<model>`
    OpenAI,
    /// `ollama/<model>`，走 Ollama 的 OpenAI 兼容端点
    Ollama,
}

impl ProviderKind {
    /// 拆分 `provider/model`；无前缀时按模型名猜测
    pub fn resolve(model_name: &str) -> (ProviderKind, String) {
        let trimmed = model_name.trim();
        if let Some((prefix, model)) = trimmed.split_once('/') {
            let kind = match prefix.to_ascii_lowercase().as_str() {
                "googleai" | "google" | "gemini" | "vertexai" => Some(ProviderKind::Gemini),
                "openai" => Some(ProviderKind::OpenAI),
                "ollama" => Some(ProviderKind::Ollama),
                _ => None,
            };
            if let Some(kind) = kind {
                return (kind, model.to_string());
            }
        }
        if trimmed.to_ascii_lowercase().starts_with("gemini") {
            (ProviderKind::Gemini, trimmed.to_string())
        } else {
            (ProviderKind::OpenAI, trimmed.to_string())
        }
    }

    pub fn requires_api_key(self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }

    pub fn adapter(self) -> Box<dyn ProviderAdapter> {
        match self {
            ProviderKind::Gemini => Box::new(GeminiAdapter),
            ProviderKind::OpenAI | ProviderKind::Ollama => Box::new(OpenAIAdapter),
        }
    }
}

/// 供应商适配层：请求体统一使用 OpenAI chat 形态，由适配器转换为各家格式
pub trait ProviderAdapter: Send + Sync {
    fn build_request(
        &self,
        base_url: &str,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> Result<ProviderRequest, ProviderError>;

    /// 从非流式响应中取出模型输出文本
    fn parse_response(&self, response: &Value) -> Result<String, ProviderError>;
}

pub struct OpenAIAdapter;

impl ProviderAdapter for OpenAIAdapter {
    fn build_request(
        &self,
        base_url: &str,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> Result<ProviderRequest, ProviderError> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let trimmed_key = api_key.trim();

        log::debug!(
            "[OpenAIAdapter] build_request: url={}, api_key={}",
            url,
            mask_api_key(trimmed_key)
        );

        let mut payload = body.clone();
        match payload.as_object_mut() {
            Some(obj) => {
                obj.insert("model".to_string(), json!(model));
                obj.insert("stream".to_string(), json!(false));
            }
            None => {
                return Err(ProviderError::BuildFailed(
                    "request body must be a JSON object".to_string(),
                ))
            }
        }

        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        // Ollama 无需鉴权
        if !trimmed_key.is_empty() {
            headers.push((
                "Authorization".to_string(),
                format!("Bearer {}", trimmed_key),
            ));
        }

        Ok(ProviderRequest {
            url,
            headers,
            body: payload,
        })
    }

    fn parse_response(&self, response: &Value) -> Result<String, ProviderError> {
        let choice = response["choices"]
            .get(0)
            .ok_or_else(|| ProviderError::InvalidResponse("missing choices".to_string()))?;

        if choice["finish_reason"].as_str() == Some("content_filter") {
            return Err(ProviderError::Blocked("content_filter".to_string()));
        }

        choice["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("missing message content".to_string()))
    }
}

// Google Gemini 适配：对外保持 OpenAI 兼容，内部完成 OpenAI -> Gemini 转换
pub struct GeminiAdapter;

impl GeminiAdapter {
    fn convert_to_gemini_body(body: &Value) -> Value {
        let mut system_parts: Vec<Value> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        if let Some(messages) = body["messages"].as_array() {
            for message in messages {
                let text = message["content"].as_str().unwrap_or_default();
                match message["role"].as_str() {
                    Some("system") => system_parts.push(json!({ "text": text })),
                    Some("assistant") => contents.push(json!({
                        "role": "model",
                        "parts": [{ "text": text }]
                    })),
                    _ => contents.push(json!({
                        "role": "user",
                        "parts": [{ "text": text }]
                    })),
                }
            }
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(t) = body.get("temperature").filter(|v| v.is_number()) {
            generation_config.insert("temperature".to_string(), t.clone());
        }
        if let Some(m) = body.get("max_tokens").filter(|v| v.is_number()) {
            generation_config.insert("maxOutputTokens".to_string(), m.clone());
        }
        if body["response_format"]["type"].as_str() == Some("json_object") {
            generation_config.insert("responseMimeType".to_string(), json!("application/json"));
        }

        let mut payload = json!({ "contents": contents });
        if !system_parts.is_empty() {
            payload["systemInstruction"] = json!({ "parts": system_parts });
        }
        if !generation_config.is_empty() {
            payload["generationConfig"] = Value::Object(generation_config);
        }
        payload
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn build_request(
        &self,
        base_url: &str,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> Result<ProviderRequest, ProviderError> {
        if model.trim().is_empty() {
            return Err(ProviderError::BuildFailed(
                "Gemini 请求构建失败: 模型名为空".to_string(),
            ));
        }
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            model.trim()
        );

        log::debug!(
            "[GeminiAdapter] build_request: url={}, api_key={}",
            url,
            mask_api_key(api_key)
        );

        Ok(ProviderRequest {
            url,
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("x-goog-api-key".to_string(), api_key.trim().to_string()),
            ],
            body: Self::convert_to_gemini_body(body),
        })
    }

    fn parse_response(&self, response: &Value) -> Result<String, ProviderError> {
        if let Some(reason) = response["promptFeedback"]["blockReason"].as_str() {
            return Err(ProviderError::Blocked(reason.to_string()));
        }

        let candidate = response["candidates"]
            .get(0)
            .ok_or_else(|| ProviderError::InvalidResponse("missing candidates".to_string()))?;

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter(|p| !p["thought"].as_bool().unwrap_or(false))
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            if let Some(reason) = candidate["finishReason"].as_str() {
                if reason == "SAFETY" || reason == "PROHIBITED_CONTENT" || reason == "BLOCKLIST" {
                    return Err(ProviderError::Blocked(reason.to_string()));
                }
            }
            return Err(ProviderError::InvalidResponse(
                "candidate has no text parts".to_string(),
            ));
        }

        Ok(text)
    }
}
