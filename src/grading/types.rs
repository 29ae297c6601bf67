//! 批改相关的请求/响应类型

use serde::{Deserialize, Serialize};

/// 浏览器上传的单个文件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub file_name: String,
    /// `data:<mime>;base64,<payload>`
    pub data_uri: String,
}

/// 批改提交表单
///
/// 必填项也声明为 `Option`，以便缺失时给出逐字段的校验信息而不是反序列化错误
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSubmissionRequest {
    pub question_file: Option<UploadedFile>,
    pub student_response_file: Option<UploadedFile>,
    pub expected_answer_file: Option<UploadedFile>,
    pub rubric: Option<String>,
    pub max_score: Option<f64>,
}

/// 单次模型调用的输入（文本已提取）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeStudentResponseInput {
    pub question_text: String,
    pub student_response_text: String,
    pub rubric: String,
    pub expected_answer_text: Option<String>,
    pub max_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeStudentResponseOutput {
    pub score: f64,
    pub feedback: String,
    pub justification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainGradingRationaleInput {
    pub student_response: String,
    pub expected_answer: String,
    pub assigned_grade: f64,
    pub grading_rubric: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainGradingRationaleOutput {
    pub rationale: String,
}

/// 教师确认（可覆盖分数）后保存记录的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeGradeRequest {
    pub question_file_name: String,
    pub student_response_file_name: String,
    pub rubric: String,
    #[serde(default)]
    pub max_score: Option<f64>,
    pub ai_result: GradeStudentResponseOutput,
    /// 为空时沿用 AI 分数
    #[serde(default)]
    pub final_score: Option<f64>,
    #[serde(default)]
    pub instructor_comments: Option<String>,
}

/// 仪表盘的最近记录视图
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentGradedTests {
    pub tests: Vec<crate::models::StoredGradedTest>,
    pub total: usize,
}
