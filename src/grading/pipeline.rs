//! 批改管线 - 核心业务逻辑
//!
//! 校验 → 提取文本（阻塞线程池）→ 单次结构化模型调用 → 分数归一化

use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};

use crate::config::LimitsConfig;
use crate::document_parser::DocumentParser;
use crate::llm_manager::LLMManager;
use crate::metrics;
use crate::models::AppError;

use super::types::{
    ExplainGradingRationaleInput, ExplainGradingRationaleOutput, GradeStudentResponseInput,
    GradeStudentResponseOutput, GradeSubmissionRequest,
};
use super::validation::{validate_submission, ValidatedFile};

/// 模型输出缺失或无法解析时的统一提示
pub const AI_NO_RESPONSE_MESSAGE: &str = "AI failed to generate a response.";

const GRADING_SYSTEM_PROMPT: &str = "You are an AI grading assistant that assesses student responses based on a given rubric. Always answer with a single JSON object.";

const RATIONALE_SYSTEM_PROMPT: &str =
    "You are an AI assistant that provides a rationale for a given grade. Always answer with a single JSON object.";

/// 分数字符串的数字前缀，如 "7.5/10"、"8 points"
static RE_LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?").expect("static regex")
});

/// 批改管线依赖
#[derive(Clone)]
pub struct GradingDeps {
    pub llm: Arc<LLMManager>,
    pub parser: DocumentParser,
    pub limits: LimitsConfig,
}

/// 运行批改管线
pub async fn run_grading(
    request: GradeSubmissionRequest,
    deps: &GradingDeps,
) -> Result<GradeStudentResponseOutput, AppError> {
    // 1. 表单校验（同时解码 Data URI）
    let submission = validate_submission(&request, &deps.limits)?;

    log::info!(
        "[Grading] 开始批改: question={}, response={}, expected={}, maxScore={}",
        submission.question.file_name,
        submission.student_response.file_name,
        submission
            .expected_answer
            .as_ref()
            .map(|f| f.file_name.as_str())
            .unwrap_or("-"),
        submission.max_score
    );

    // 2. 提取文本
    let question_text = extract_file_text(&deps.parser, submission.question).await?;
    let student_response_text =
        extract_file_text(&deps.parser, submission.student_response).await?;
    let expected_answer_text = match submission.expected_answer {
        Some(file) => Some(extract_file_text(&deps.parser, file).await?),
        None => None,
    };

    // 3. 模型调用
    let input = GradeStudentResponseInput {
        question_text,
        student_response_text,
        rubric: submission.rubric,
        expected_answer_text,
        max_score: submission.max_score,
    };
    grade_student_response(&input, &deps.llm).await
}

/// PDF/DOCX 解析是 CPU 密集的同步调用，放到阻塞线程池
async fn extract_file_text(
    parser: &DocumentParser,
    file: ValidatedFile,
) -> Result<String, AppError> {
    let parser = parser.clone();
    let file_name = file.file_name.clone();
    let result = tokio::task::spawn_blocking(move || parser.extract_text(&file.data))
        .await
        .map_err(|e| AppError::unknown(format!("文本提取任务异常终止: {}", e)))?;

    match result {
        Ok(text) => {
            log::debug!(
                "[Grading] 提取完成: {} ({} chars)",
                file_name,
                text.chars().count()
            );
            Ok(text)
        }
        Err(e) => {
            metrics::record_extraction_failure();
            Err(AppError::extraction(e.to_string()))
        }
    }
}

/// 单次结构化模型调用：返回分数、反馈与评分理由
pub async fn grade_student_response(
    input: &GradeStudentResponseInput,
    llm: &LLMManager,
) -> Result<GradeStudentResponseOutput, AppError> {
    ensure_positive_max_score(input.max_score)?;
    let user_prompt = build_grading_prompt(input);
    let output = llm
        .call_structured(GRADING_SYSTEM_PROMPT, &user_prompt)
        .await?;
    normalize_grade_output(output, input.max_score)
}

fn ensure_positive_max_score(max_score: f64) -> Result<(), AppError> {
    if max_score.is_finite() && max_score > 0.0 {
        Ok(())
    } else {
        Err(AppError::validation("Max score must be a positive number."))
    }
}

/// 取字符串开头的数字部分，忽略其后的单位或分母
fn parse_leading_number(s: &str) -> Option<f64> {
    RE_LEADING_NUMBER
        .find(s.trim_start())
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// 构造批改 Prompt；评分标准原样转发，参考答案仅在非空时附加
pub fn build_grading_prompt(input: &GradeStudentResponseInput) -> String {
    let max = format_score(input.max_score);
    let mut prompt = String::with_capacity(
        input.question_text.len() + input.student_response_text.len() + input.rubric.len() + 1024,
    );

    prompt.push_str("Question:\n");
    prompt.push_str(&input.question_text);
    prompt.push_str("\n\nStudent Response:\n");
    prompt.push_str(&input.student_response_text);
    prompt.push_str("\n\nRubric:\n");
    prompt.push_str(&input.rubric);

    let expected = input
        .expected_answer_text
        .as_deref()
        .filter(|t| !t.trim().is_empty());
    if let Some(expected) = expected {
        prompt.push_str("\n\nExpected Answer (for reference, provided by the lecturer):\n");
        prompt.push_str(expected);
    }

    prompt.push_str("\n\n");
    if expected.is_some() {
        prompt.push_str(
            "Evaluate the student response based on the rubric and the expected answer provided as reference",
        );
    } else {
        prompt.push_str("Evaluate the student response based on the rubric");
    }
    prompt.push_str(&format!(
        " and provide a score (out of {max}), detailed feedback, and a justification for the score.\n\
         The score must be an integer or a float with one decimal place (e.g., 7, 8.5) between 0 and {max}.\n\
         Ensure that the feedback is constructive and helps the student understand their strengths and weaknesses.\n\
         The justification should clearly explain how the rubric was applied to arrive at the score.\n\
         Format your response as a JSON object with the keys \"score\", \"feedback\" and \"justification\"."
    ));
    prompt
}

/// 归一化模型输出
///
/// - `score` 可以是数字或以数字开头的字符串（"7.5/10"），非有限值视为失败
/// - 分数截断到 `[0, max_score]` 并保留一位小数
/// - `feedback` / `justification` 必须是字符串
pub fn normalize_grade_output(
    output: Option<Value>,
    max_score: f64,
) -> Result<GradeStudentResponseOutput, AppError> {
    ensure_positive_max_score(max_score)?;
    let value = output.ok_or_else(|| AppError::llm(AI_NO_RESPONSE_MESSAGE))?;

    let raw_score = match &value["score"] {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_leading_number(s),
        _ => None,
    };
    let score = match raw_score {
        Some(s) if s.is_finite() => round_one_decimal(s.clamp(0.0, max_score)),
        Some(_) => return Err(AppError::llm("AI returned a non-numeric score.")),
        None => return Err(AppError::llm(AI_NO_RESPONSE_MESSAGE)),
    };

    let feedback = value["feedback"]
        .as_str()
        .ok_or_else(|| AppError::llm(AI_NO_RESPONSE_MESSAGE))?;
    let justification = value["justification"]
        .as_str()
        .ok_or_else(|| AppError::llm(AI_NO_RESPONSE_MESSAGE))?;

    Ok(GradeStudentResponseOutput {
        score,
        feedback: feedback.trim().to_string(),
        justification: justification.trim().to_string(),
    })
}

/// 让模型解释给定分数的理由
pub async fn explain_grading_rationale(
    input: &ExplainGradingRationaleInput,
    llm: &LLMManager,
) -> Result<ExplainGradingRationaleOutput, AppError> {
    if input.student_response.trim().is_empty() {
        return Err(AppError::validation("Student response is required."));
    }
    if input.grading_rubric.trim().is_empty() {
        return Err(AppError::validation("Grading rubric is required."));
    }
    if !input.assigned_grade.is_finite() {
        return Err(AppError::validation("Assigned grade must be a number."));
    }

    let user_prompt = build_rationale_prompt(input);
    let content = llm
        .call_chat(RATIONALE_SYSTEM_PROMPT, &user_prompt, true)
        .await?;

    let from_json = crate::llm_manager::parser::parse_json_object(&content).and_then(|v| {
        v["rationale"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    });
    // 模型未按 JSON 作答时直接使用正文
    let rationale = match from_json {
        Some(r) => r,
        None if !content.trim().is_empty() && !content.trim_start().starts_with('{') => {
            content.trim().to_string()
        }
        None => return Err(AppError::llm(AI_NO_RESPONSE_MESSAGE)),
    };

    Ok(ExplainGradingRationaleOutput { rationale })
}

pub fn build_rationale_prompt(input: &ExplainGradingRationaleInput) -> String {
    format!(
        "Given the student response, the expected answer, the assigned grade, and the grading rubric, \
         explain the reasoning behind the assigned grade. Highlight the key points in the student's response \
         that led to the assigned grade.\n\n\
         Student Response:\n{}\n\n\
         Expected Answer:\n{}\n\n\
         Assigned Grade: {}\n\n\
         Grading Rubric:\n{}\n\n\
         Provide a clear and concise rationale for the grade. \
         Format your response as a JSON object with the key \"rationale\".",
        input.student_response,
        input.expected_answer,
        format_score(input.assigned_grade),
        input.grading_rubric
    )
}

pub(crate) fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `10.0` → `10`，`8.5` → `8.5`
pub(crate) fn format_score(value: f64) -> String {
    format!("{}", round_one_decimal(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppErrorType;
    use serde_json::json;

    fn input(expected: Option<&str>) -> GradeStudentResponseInput {
        GradeStudentResponseInput {
            question_text: "What is photosynthesis?".into(),
            student_response_text: "Plants make food from light.".into(),
            rubric: "2 points for mentioning light, 3 points for chlorophyll.".into(),
            expected_answer_text: expected.map(|s| s.to_string()),
            max_score: 10.0,
        }
    }

    #[test]
    fn prompt_contains_sections_in_order() {
        let prompt = build_grading_prompt(&input(Some("Conversion of light energy.")));
        let q = prompt.find("What is photosynthesis?").unwrap();
        let r = prompt.find("Plants make food from light.").unwrap();
        let rubric = prompt.find("2 points for mentioning light").unwrap();
        let e = prompt
            .find("Expected Answer (for reference, provided by the lecturer)")
            .unwrap();
        assert!(q < r && r < rubric && rubric < e);
        assert!(prompt.contains("score (out of 10)"));
        assert!(prompt.contains("JSON object"));
    }

    #[test]
    fn prompt_omits_blank_expected_answer() {
        assert!(!build_grading_prompt(&input(None)).contains("Expected Answer"));
        assert!(!build_grading_prompt(&input(Some("   "))).contains("Expected Answer"));
    }

    #[test]
    fn prompt_uses_custom_max_score() {
        let mut i = input(None);
        i.max_score = 25.0;
        assert!(build_grading_prompt(&i).contains("score (out of 25)"));
    }

    #[test]
    fn normalizes_numeric_and_string_scores() {
        let out = normalize_grade_output(
            Some(json!({"score": "7.5", "feedback": " Good ", "justification": "Rubric met"})),
            10.0,
        )
        .unwrap();
        assert_eq!(out.score, 7.5);
        assert_eq!(out.feedback, "Good");

        let rounded = normalize_grade_output(
            Some(json!({"score": 8.26, "feedback": "", "justification": ""})),
            10.0,
        )
        .unwrap();
        assert_eq!(rounded.score, 8.3);
    }

    #[test]
    fn clamps_scores_into_range() {
        let high = normalize_grade_output(
            Some(json!({"score": 14, "feedback": "f", "justification": "j"})),
            10.0,
        )
        .unwrap();
        assert_eq!(high.score, 10.0);

        let low = normalize_grade_output(
            Some(json!({"score": -2, "feedback": "f", "justification": "j"})),
            10.0,
        )
        .unwrap();
        assert_eq!(low.score, 0.0);
    }

    #[test]
    fn missing_output_is_an_llm_error() {
        let err = normalize_grade_output(None, 10.0).unwrap_err();
        assert_eq!(err.error_type, AppErrorType::LLM);
        assert_eq!(err.message, AI_NO_RESPONSE_MESSAGE);

        let no_feedback =
            normalize_grade_output(Some(json!({"score": 5, "justification": "j"})), 10.0);
        assert!(no_feedback.is_err());

        let bad_score = normalize_grade_output(
            Some(json!({"score": "seven", "feedback": "f", "justification": "j"})),
            10.0,
        );
        assert_eq!(bad_score.unwrap_err().message, AI_NO_RESPONSE_MESSAGE);
    }

    #[test]
    fn string_scores_use_their_numeric_prefix() {
        let cases = [("7.5/10", 7.5), ("8 points", 8.0), ("  .5", 0.5), ("+6", 6.0)];
        for (raw, expected) in cases {
            let out = normalize_grade_output(
                Some(json!({"score": raw, "feedback": "f", "justification": "j"})),
                10.0,
            )
            .unwrap();
            assert_eq!(out.score, expected, "score {:?}", raw);
        }

        let no_digits = normalize_grade_output(
            Some(json!({"score": "out of 10", "feedback": "f", "justification": "j"})),
            10.0,
        );
        assert_eq!(no_digits.unwrap_err().message, AI_NO_RESPONSE_MESSAGE);
    }

    #[test]
    fn non_positive_max_score_is_rejected() {
        for bad in [f64::NAN, f64::INFINITY, -1.0, 0.0] {
            let err = normalize_grade_output(
                Some(json!({"score": 5, "feedback": "f", "justification": "j"})),
                bad,
            )
            .unwrap_err();
            assert_eq!(err.error_type, AppErrorType::Validation);
            assert_eq!(err.message, "Max score must be a positive number.");
        }
    }

    #[tokio::test]
    async fn grading_with_nan_max_score_never_calls_the_model() {
        // 未配置任何密钥；若走到模型调用会得到 Configuration 错误
        let llm = LLMManager::new(&crate::config::LlmConfig::default());
        let mut i = input(None);
        i.max_score = f64::NAN;
        let err = grade_student_response(&i, &llm).await.unwrap_err();
        assert_eq!(err.error_type, AppErrorType::Validation);
    }

    #[test]
    fn rationale_prompt_includes_grade() {
        let prompt = build_rationale_prompt(&ExplainGradingRationaleInput {
            student_response: "resp".into(),
            expected_answer: "exp".into(),
            assigned_grade: 8.5,
            grading_rubric: "rubric".into(),
        });
        assert!(prompt.contains("Assigned Grade: 8.5"));
        assert!(prompt.contains("Expected Answer:\nexp"));
    }

    #[test]
    fn format_score_drops_trailing_zero() {
        assert_eq!(format_score(10.0), "10");
        assert_eq!(format_score(8.5), "8.5");
    }
}
