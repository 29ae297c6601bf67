use serde::{Deserialize, Serialize};
use std::fmt;

// 结构化错误处理
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AppErrorType {
    Validation,
    /// 上传文件的文本提取失败
    Extraction,
    Database,
    LLM,
    FileSystem,
    NotFound,
    Configuration,
    Network,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    pub error_type: AppErrorType,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(error_type: AppErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error_type: AppErrorType,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Validation, message)
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Extraction, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Database, message)
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::LLM, message)
    }

    pub fn file_system(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::FileSystem, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::NotFound, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Configuration, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Network, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Unknown, message)
    }

    /// 错误类型对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self.error_type {
            AppErrorType::Validation | AppErrorType::Extraction => 422,
            AppErrorType::NotFound => 404,
            AppErrorType::LLM | AppErrorType::Network => 502,
            AppErrorType::Configuration => 503,
            AppErrorType::Database | AppErrorType::FileSystem | AppErrorType::Unknown => 500,
        }
    }
}

// 为AppError实现From trait以支持自动转换
impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::validation(message)
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::validation(message.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::unknown(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::validation(format!("JSON序列化错误: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::file_system(format!("文件系统错误: {}", err))
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::database(format!("数据库错误: {}", err))
    }
}

impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        AppError::database(format!("获取数据库连接失败: {}", err))
    }
}

/// 服务端动作的统一返回信封：`{ success, data?, error? }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 校验失败时的逐字段明细
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// 仅服务端使用，用于选择 HTTP 状态码
    #[serde(skip)]
    pub error_type: Option<AppErrorType>,
}

impl<T> ActionResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            details: None,
            error_type: None,
        }
    }

    pub fn err(error: &AppError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.message.clone()),
            details: error.details.clone(),
            error_type: Some(error.error_type.clone()),
        }
    }

    pub fn status_code(&self) -> u16 {
        match &self.error_type {
            Some(error_type) => AppError::new(error_type.clone(), "").status_code(),
            None if self.success => 200,
            None => 500,
        }
    }
}

/// 已定稿的批改记录（按教师隔离存储）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredGradedTest {
    pub id: String,
    pub instructor_id: String,
    pub question_file_name: String,
    pub student_response_file_name: String,
    /// 评分标准前 100 个字符（截断时追加 `...`）
    pub rubric_summary: String,
    pub max_score: f64,
    pub ai_score: f64,
    pub ai_feedback: String,
    pub ai_justification: String,
    pub final_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructor_comments: Option<String>,
    /// RFC 3339
    pub grading_date: String,
}
