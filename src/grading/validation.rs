//! 批改提交的表单校验
//!
//! 所有字段的错误会被一次性收集，放入 `AppError.details`（字段名 → 错误列表）。

use serde_json::{Map, Value};

use crate::config::LimitsConfig;
use crate::document_parser::{DataUri, MIME_DOCX, MIME_PDF, MIME_TEXT_PLAIN};
use crate::models::{AppError, AppErrorType};

use super::types::{GradeSubmissionRequest, UploadedFile};

const QUESTION_TYPES: &[&str] = &[MIME_PDF, MIME_DOCX];
const RESPONSE_TYPES: &[&str] = &[MIME_PDF, MIME_DOCX, MIME_TEXT_PLAIN];

/// 通过校验的上传文件（载荷已解码）
#[derive(Debug, Clone)]
pub struct ValidatedFile {
    pub file_name: String,
    pub data: DataUri,
}

#[derive(Debug, Clone)]
pub struct ValidatedSubmission {
    pub question: ValidatedFile,
    pub student_response: ValidatedFile,
    pub expected_answer: Option<ValidatedFile>,
    pub rubric: String,
    pub max_score: f64,
}

#[derive(Default)]
struct Violations(Map<String, Value>);

impl Violations {
    fn add(&mut self, field: &str, message: impl Into<String>) {
        let entry = self
            .0
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = entry {
            items.push(Value::String(message.into()));
        }
    }

    fn messages(&self) -> Vec<String> {
        self.0
            .values()
            .filter_map(|v| v.as_array())
            .flatten()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect()
    }
}

pub fn validate_submission(
    request: &GradeSubmissionRequest,
    limits: &LimitsConfig,
) -> Result<ValidatedSubmission, AppError> {
    let mut violations = Violations::default();

    let question = match &request.question_file {
        Some(file) => validate_file(
            "questionFile",
            file,
            QUESTION_TYPES,
            "Only .pdf and .docx files are accepted for the question.",
            limits,
            &mut violations,
        ),
        None => {
            violations.add("questionFile", "Question file is required.");
            None
        }
    };

    let student_response = match &request.student_response_file {
        Some(file) => validate_file(
            "studentResponseFile",
            file,
            RESPONSE_TYPES,
            "Only .pdf, .docx, and .txt files are accepted for the student response.",
            limits,
            &mut violations,
        ),
        None => {
            violations.add("studentResponseFile", "Student response file is required.");
            None
        }
    };

    let expected_answer = request.expected_answer_file.as_ref().and_then(|file| {
        validate_file(
            "expectedAnswerFile",
            file,
            RESPONSE_TYPES,
            "Only .pdf, .docx, and .txt files are accepted for the expected answer.",
            limits,
            &mut violations,
        )
    });

    let rubric = request.rubric.clone().unwrap_or_default();
    let rubric_chars = rubric.chars().count();
    if rubric_chars < limits.rubric_min_chars {
        violations.add(
            "rubric",
            format!(
                "Rubric must be at least {} characters long.",
                limits.rubric_min_chars
            ),
        );
    } else if rubric_chars > limits.rubric_max_chars {
        violations.add(
            "rubric",
            format!(
                "Rubric must be at most {} characters long.",
                limits.rubric_max_chars
            ),
        );
    }

    let max_score = request.max_score.unwrap_or(limits.default_max_score);
    if !max_score.is_finite() {
        violations.add("maxScore", "Max score must be a number.");
    } else if max_score < limits.max_score_min {
        violations.add(
            "maxScore",
            format!("Max score must be at least {}.", limits.max_score_min),
        );
    } else if max_score > limits.max_score_max {
        violations.add(
            "maxScore",
            format!("Max score can be at most {}.", limits.max_score_max),
        );
    }

    match (question, student_response) {
        (Some(question), Some(student_response)) if violations.0.is_empty() => {
            Ok(ValidatedSubmission {
                question,
                student_response,
                expected_answer,
                rubric,
                max_score,
            })
        }
        _ => {
            let messages = violations.messages();
            log::info!("[Grading] 提交校验失败: {:?}", messages);
            Err(AppError::with_details(
                AppErrorType::Validation,
                format!("Invalid submission. {}", messages.join(" ")),
                Value::Object(violations.0),
            ))
        }
    }
}

fn validate_file(
    field: &str,
    file: &UploadedFile,
    accepted: &[&str],
    type_message: &str,
    limits: &LimitsConfig,
    violations: &mut Violations,
) -> Option<ValidatedFile> {
    let size_message = format!(
        "Max file size is {}MB.",
        limits.max_file_bytes / (1024 * 1024)
    );

    // 先按 base64 长度估算，避免为明显超限的文件分配内存
    let payload_len = file
        .data_uri
        .split_once(',')
        .map(|(_, p)| p.len())
        .unwrap_or(0);
    if payload_len / 4 * 3 > limits.max_file_bytes + 3 {
        violations.add(field, size_message);
        return None;
    }

    let data = match DataUri::parse(&file.data_uri) {
        Ok(d) => d,
        Err(e) => {
            violations.add(field, e.to_string());
            return None;
        }
    };

    let mut ok = true;
    if data.bytes.len() > limits.max_file_bytes {
        violations.add(field, size_message);
        ok = false;
    }
    if !accepted.contains(&data.mime_type.as_str()) {
        violations.add(field, type_message);
        ok = false;
    }

    ok.then(|| ValidatedFile {
        file_name: file.file_name.clone(),
        data,
    })
}
