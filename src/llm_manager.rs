use crate::config::{LlmConfig, DEFAULT_OLLAMA_ADDRESS};
use crate::models::AppError;
use crate::providers::{
    ProviderError, ProviderKind, GEMINI_DEFAULT_BASE_URL, OPENAI_DEFAULT_BASE_URL,
};
use crate::utils::text::{mask_api_key, safe_truncate};
use backon::{ExponentialBuilder, Retryable};
use reqwest::{header::HeaderMap, Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub mod parser;

type Result<T> = std::result::Result<T, AppError>;

/// 错误响应体写入日志/错误信息时的最大字符数
const MAX_ERROR_BODY_CHARS: usize = 500;

/// 解析后的模型调用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub model_adapter: ProviderKind,
    pub base_url: String,
    /// 去掉供应商前缀后的模型名
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl ApiConfig {
    pub fn from_llm_config(cfg: &LlmConfig) -> Self {
        let (model_adapter, model) = ProviderKind::resolve(cfg.model_name());

        let base_url = match (&cfg.base_url, model_adapter) {
            (Some(url), _) if !url.trim().is_empty() => url.trim().to_string(),
            (_, ProviderKind::Gemini) => GEMINI_DEFAULT_BASE_URL.to_string(),
            (_, ProviderKind::OpenAI) => OPENAI_DEFAULT_BASE_URL.to_string(),
            (_, ProviderKind::Ollama) => {
                let address = cfg
                    .ollama_address
                    .as_deref()
                    .unwrap_or(DEFAULT_OLLAMA_ADDRESS)
                    .trim_end_matches('/');
                format!("{}/v1", address)
            }
        };

        let api_key = match model_adapter {
            ProviderKind::Gemini => cfg.google_api_key.clone(),
            ProviderKind::OpenAI => cfg.openai_api_key.clone(),
            ProviderKind::Ollama => None,
        }
        .filter(|k| !k.trim().is_empty());

        Self {
            model_adapter,
            base_url,
            model,
            api_key,
            max_output_tokens: cfg.max_output_tokens,
            temperature: cfg.temperature,
        }
    }
}

/// 单次尝试的失败分类，决定 backon 是否重试
#[derive(Debug)]
enum CallError {
    Retryable(AppError),
    Fatal(AppError),
}

impl CallError {
    fn is_retryable(&self) -> bool {
        matches!(self, CallError::Retryable(_))
    }

    fn into_app_error(self) -> AppError {
        match self {
            CallError::Retryable(e) | CallError::Fatal(e) => e,
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        AppError::llm(err.to_string())
    }
}

pub struct LLMManager {
    client: Client,
    config: ApiConfig,
    max_attempts: usize,
    retry_initial_delay: Duration,
}

impl LLMManager {
    pub fn new(cfg: &LlmConfig) -> Self {
        let client = Self::create_http_client_with_fallback(cfg.request_timeout_secs);
        let config = ApiConfig::from_llm_config(cfg);

        log::info!(
            "[LLMManager] provider={:?}, model={}, base_url={}, api_key={}",
            config.model_adapter,
            config.model,
            config.base_url,
            config
                .api_key
                .as_deref()
                .map(mask_api_key)
                .unwrap_or_else(|| "NONE".to_string())
        );

        Self {
            client,
            config,
            max_attempts: cfg.max_attempts.max(1),
            retry_initial_delay: Duration::from_millis(cfg.retry_initial_delay_ms),
        }
    }

    pub fn api_config(&self) -> &ApiConfig {
        &self.config
    }

    /// 创建HTTP客户端，使用渐进式回退策略确保始终有合理的配置
    fn create_http_client_with_fallback(timeout_secs: u64) -> Client {
        // 显式禁用压缩，防止后端收到 gzip/deflate 数据导致乱码
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            reqwest::header::HeaderValue::from_static("identity"),
        );
        let timeout = Duration::from_secs(timeout_secs.max(1));

        // 尝试1: 完整配置的客户端
        if let Ok(client) = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .use_rustls_tls()
            .default_headers(headers.clone())
            .build()
        {
            log::debug!("[LLMManager] HTTP客户端创建成功: 完整配置");
            return client;
        }

        // 尝试2: 仅超时配置的客户端
        if let Ok(client) = ClientBuilder::new()
            .timeout(timeout)
            .default_headers(headers)
            .build()
        {
            log::warn!("[LLMManager] HTTP客户端创建成功: 仅超时配置");
            return client;
        }

        log::warn!("[LLMManager] 所有配置均失败，使用默认HTTP客户端（无超时配置）");
        Client::new()
    }

    /// 结构化调用：要求模型以 JSON 对象作答，并解析为 `Value`
    ///
    /// 输出中无法找到 JSON 对象时返回 `None`，由调用方决定错误信息
    pub async fn call_structured(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Option<Value>> {
        let content = self.call_chat(system_prompt, user_prompt, true).await?;
        Ok(parser::parse_json_object(&content))
    }

    /// 单轮对话调用，返回模型输出文本
    pub async fn call_chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        json_mode: bool,
    ) -> Result<String> {
        let api_key = match (&self.config.api_key, self.config.model_adapter.requires_api_key()) {
            (Some(key), _) => key.clone(),
            (None, false) => String::new(),
            (None, true) => {
                return Err(AppError::configuration(format!(
                    "No API key configured for the {:?} provider. Set GOOGLE_API_KEY / OPENAI_API_KEY or GRADEWISE__LLM__*_API_KEY.",
                    self.config.model_adapter
                )))
            }
        };

        let mut body = json!({
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_output_tokens,
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let adapter = self.config.model_adapter.adapter();
        let request =
            adapter.build_request(&self.config.base_url, &api_key, &self.config.model, &body)?;

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry_initial_delay)
            .with_max_delay(Duration::from_secs(10))
            .with_max_times(self.max_attempts.saturating_sub(1));

        let started = std::time::Instant::now();
        let response_json = (|| async { self.send_once(&request).await })
            .retry(&backoff)
            .when(|e: &CallError| e.is_retryable())
            .notify(|e: &CallError, dur: Duration| {
                log::warn!(
                    "[LLMManager] 请求失败，{:?} 后重试: {}",
                    dur,
                    match e {
                        CallError::Retryable(err) | CallError::Fatal(err) => &err.message,
                    }
                );
            })
            .await
            .map_err(CallError::into_app_error)?;

        log::info!(
            "[LLMManager] {} 响应完成，耗时 {}ms",
            self.config.model,
            started.elapsed().as_millis()
        );

        Ok(adapter.parse_response(&response_json)?)
    }

    async fn send_once(
        &self,
        request: &crate::providers::ProviderRequest,
    ) -> std::result::Result<Value, CallError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            CallError::Retryable(AppError::network(format!(
                "Failed to reach the AI provider: {}",
                e
            )))
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!(
                "AI provider returned HTTP {}: {}",
                status.as_u16(),
                safe_truncate(text.trim(), MAX_ERROR_BODY_CHARS)
            );
            return if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(CallError::Retryable(AppError::llm(message)))
            } else {
                Err(CallError::Fatal(AppError::llm(message)))
            };
        }

        response.json::<Value>().await.map_err(|e| {
            CallError::Fatal(AppError::llm(format!(
                "AI provider returned an invalid JSON body: {}",
                e
            )))
        })
    }
}
