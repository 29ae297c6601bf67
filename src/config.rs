//! 服务配置
//!
//! 加载顺序：内置默认值 → `config/gradewise.toml`（可选）→ `GRADEWISE__SECTION__KEY` 环境变量，
//! 最后再做少量直读环境变量的兜底（模型名、各供应商 API key、Ollama 地址）。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "config/gradewise.toml";
pub const DEFAULT_MODEL: &str = "googleai/gemini-2.0-flash";
pub const DEFAULT_OLLAMA_ADDRESS: &str = "http://127.0.0.1:11434";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// 请求体上限（字节）
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9002".to_string(),
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/gradewise.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// 带供应商前缀的模型名，如 `googleai/gemini-2.0-flash`、`ollama/llama3`
    pub model: Option<String>,
    /// 覆盖供应商默认地址
    pub base_url: Option<String>,
    pub google_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub ollama_address: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
    /// 总尝试次数（含首次）
    pub max_attempts: usize,
    pub retry_initial_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: None,
            base_url: None,
            google_api_key: None,
            openai_api_key: None,
            ollama_address: None,
            temperature: 0.2,
            max_output_tokens: 4096,
            request_timeout_secs: 300,
            max_attempts: 3,
            retry_initial_delay_ms: 500,
        }
    }
}

impl LlmConfig {
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }
}

/// 提交校验与列表相关的数值边界
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_file_bytes: usize,
    pub rubric_min_chars: usize,
    pub rubric_max_chars: usize,
    pub max_score_min: f64,
    pub max_score_max: f64,
    pub default_max_score: f64,
    pub recent_count: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 5 * 1024 * 1024,
            rubric_min_chars: 20,
            rubric_max_chars: 5000,
            max_score_min: 1.0,
            max_score_max: 100.0,
            default_max_score: 10.0,
            recent_count: 3,
        }
    }
}

impl AppConfig {
    /// 读取 `.env`、默认配置文件与环境变量
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let file = std::env::var("GRADEWISE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load(&file)
    }

    /// 以指定的 TOML 文件作为文件层（不存在则跳过）
    pub fn load(file: &Path) -> anyhow::Result<Self> {
        Self::load_with(file, env_non_empty)
    }

    /// 同 `load`，直读环境变量的兜底改由 `lookup` 提供
    pub fn load_with(
        file: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut builder = ::config::Config::builder();
        if file.exists() {
            builder = builder.add_source(::config::File::new(
                &file.to_string_lossy(),
                ::config::FileFormat::Toml,
            ));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("GRADEWISE").separator("__"),
        );
        let loaded = builder
            .build()
            .map_err(|e| anyhow::anyhow!("加载配置失败: {}", e))?;
        let mut cfg: AppConfig = loaded
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("解析配置失败: {}", e))?;
        cfg.apply_env_fallbacks(&lookup);
        Ok(cfg)
    }

    // 模型名：GRADEWISE__LLM__MODEL > GENKIT_MODEL_NAME > GRADEWISE_MODEL > 文件 > 默认
    fn apply_env_fallbacks(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if lookup("GRADEWISE__LLM__MODEL").is_none() {
            if let Some(model) = lookup("GENKIT_MODEL_NAME").or_else(|| lookup("GRADEWISE_MODEL")) {
                self.llm.model = Some(model);
            }
        }
        if self.llm.google_api_key.is_none() {
            self.llm.google_api_key =
                lookup("GOOGLE_API_KEY").or_else(|| lookup("GEMINI_API_KEY"));
        }
        if self.llm.openai_api_key.is_none() {
            self.llm.openai_api_key = lookup("OPENAI_API_KEY");
        }
        if self.llm.ollama_address.is_none() {
            self.llm.ollama_address = lookup("OLLAMA_SERVER_ADDRESS");
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.addr, "127.0.0.1:9002");
        assert_eq!(cfg.database.path, PathBuf::from("data/gradewise.db"));
        assert_eq!(cfg.limits.max_file_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.limits.recent_count, 3);
        assert_eq!(cfg.llm.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradewise.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[server]\naddr = \"0.0.0.0:8080\"\n\n[llm]\nmodel = \"ollama/llama3\"\nmax_attempts = 5\n\n[limits]\nrecent_count = 5"
        )
        .unwrap();

        let cfg = AppConfig::load_with(&path, |_| None).unwrap();
        assert_eq!(cfg.server.addr, "0.0.0.0:8080");
        assert_eq!(cfg.llm.model_name(), "ollama/llama3");
        assert_eq!(cfg.llm.max_attempts, 5);
        assert_eq!(cfg.limits.recent_count, 5);
        // 未出现在文件中的字段保持默认
        assert_eq!(cfg.limits.rubric_min_chars, 20);
    }

    #[test]
    fn genkit_model_env_overrides_the_file_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradewise.toml");
        std::fs::write(&path, "[llm]\nmodel = \"googleai/gemini-2.0-flash\"\n").unwrap();

        let env = std::collections::HashMap::from([("GENKIT_MODEL_NAME", "ollama/llama3")]);
        let cfg = AppConfig::load_with(&path, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.llm.model_name(), "ollama/llama3");

        // 带前缀的 GRADEWISE__LLM__MODEL 优先
        let env = std::collections::HashMap::from([
            ("GENKIT_MODEL_NAME", "ollama/llama3"),
            ("GRADEWISE__LLM__MODEL", "openai/gpt-4o-mini"),
        ]);
        let cfg = AppConfig::load_with(&path, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_ne!(cfg.llm.model_name(), "ollama/llama3");

        let cfg = AppConfig::load_with(&path, |_| None).unwrap();
        assert_eq!(cfg.llm.model_name(), "googleai/gemini-2.0-flash");
    }

    #[test]
    fn blank_model_falls_back_to_default() {
        let llm = LlmConfig {
            model: Some("   ".into()),
            ..LlmConfig::default()
        };
        assert_eq!(llm.model_name(), DEFAULT_MODEL);
    }
}
