//! 批改模块
//!
//! - `validation`: 提交表单校验
//! - `pipeline`: 文本提取 + 模型评分 + 评分理由
//! - 本文件：对外动作（返回 `ActionResult`）与教师定稿/存档

pub mod pipeline;
pub mod types;
pub mod validation;

pub use pipeline::{
    explain_grading_rationale, grade_student_response, run_grading, GradingDeps,
    AI_NO_RESPONSE_MESSAGE,
};
pub use types::*;

use chrono::{SecondsFormat, Utc};

use crate::config::LimitsConfig;
use crate::database::{Database, GradedTestRepo};
use crate::metrics;
use crate::models::{ActionResult, AppError, StoredGradedTest};
use crate::utils::text::safe_truncate;

use pipeline::format_score;

/// 存档时保留的评分标准摘要长度
const RUBRIC_SUMMARY_CHARS: usize = 100;

/// 批改动作：任何错误都折叠进 `ActionResult`
pub async fn handle_grade_submission(
    request: GradeSubmissionRequest,
    deps: &GradingDeps,
) -> ActionResult<GradeStudentResponseOutput> {
    metrics::record_grading_request();
    let started = std::time::Instant::now();

    match run_grading(request, deps).await {
        Ok(output) => {
            log::info!(
                "[Grading] 批改完成: score={}, 耗时 {}ms",
                output.score,
                started.elapsed().as_millis()
            );
            ActionResult::ok(output)
        }
        Err(e) => {
            metrics::record_grading_failure();
            log::error!("[Grading] 批改失败 ({:?}): {}", e.error_type, e.message);
            ActionResult::err(&e)
        }
    }
}

/// 评分理由动作
pub async fn handle_explain_rationale(
    input: ExplainGradingRationaleInput,
    deps: &GradingDeps,
) -> ActionResult<ExplainGradingRationaleOutput> {
    metrics::record_rationale_request();
    match explain_grading_rationale(&input, &deps.llm).await {
        Ok(output) => ActionResult::ok(output),
        Err(e) => {
            log::error!("[Grading] 评分理由生成失败: {}", e.message);
            ActionResult::err(&e)
        }
    }
}

/// 应用教师的覆盖分数与评语，生成待存档记录
pub fn finalize_grade(
    request: FinalizeGradeRequest,
    instructor_id: &str,
    limits: &LimitsConfig,
) -> Result<StoredGradedTest, AppError> {
    if instructor_id.trim().is_empty() {
        return Err(AppError::validation("Instructor id is required."));
    }
    if request.question_file_name.trim().is_empty() {
        return Err(AppError::validation("Question file name is required."));
    }
    if request.student_response_file_name.trim().is_empty() {
        return Err(AppError::validation(
            "Student response file name is required.",
        ));
    }

    let max_score = request.max_score.unwrap_or(limits.default_max_score);
    if !max_score.is_finite() || max_score < limits.max_score_min || max_score > limits.max_score_max
    {
        return Err(AppError::validation(format!(
            "Max score must be between {} and {}.",
            limits.max_score_min, limits.max_score_max
        )));
    }

    let ai_score = request.ai_result.score;
    if !ai_score.is_finite() {
        return Err(AppError::validation("AI score must be a number."));
    }

    let final_score = match request.final_score {
        None => ai_score,
        Some(score) if score.is_finite() && (0.0..=max_score).contains(&score) => score,
        Some(_) => {
            return Err(AppError::validation(format!(
                "Please enter a valid score between 0 and {}.",
                format_score(max_score)
            )))
        }
    };

    let instructor_comments = request
        .instructor_comments
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    Ok(StoredGradedTest {
        id: uuid::Uuid::new_v4().to_string(),
        instructor_id: instructor_id.trim().to_string(),
        question_file_name: request.question_file_name,
        student_response_file_name: request.student_response_file_name,
        rubric_summary: safe_truncate(&request.rubric, RUBRIC_SUMMARY_CHARS),
        max_score,
        ai_score,
        ai_feedback: request.ai_result.feedback,
        ai_justification: request.ai_result.justification,
        final_score,
        instructor_comments,
        grading_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// 定稿并保存
pub fn finalize_and_save(
    db: &Database,
    instructor_id: &str,
    request: FinalizeGradeRequest,
    limits: &LimitsConfig,
) -> Result<StoredGradedTest, AppError> {
    let record = finalize_grade(request, instructor_id, limits)?;
    GradedTestRepo::create(db, &record)?;
    metrics::record_graded_test_saved();
    Ok(record)
}

pub fn recent_graded_tests(
    db: &Database,
    instructor_id: &str,
    limit: usize,
) -> Result<RecentGradedTests, AppError> {
    let (tests, total) = GradedTestRepo::recent(db, instructor_id, limit)?;
    Ok(RecentGradedTests { tests, total })
}

pub fn get_graded_test(
    db: &Database,
    instructor_id: &str,
    id: &str,
) -> Result<StoredGradedTest, AppError> {
    GradedTestRepo::get(db, instructor_id, id)?
        .ok_or_else(|| AppError::not_found(format!("Graded test {} not found.", id)))
}

pub fn delete_graded_test(db: &Database, instructor_id: &str, id: &str) -> Result<(), AppError> {
    if GradedTestRepo::delete(db, instructor_id, id)? {
        metrics::record_graded_tests_deleted(1);
        Ok(())
    } else {
        Err(AppError::not_found(format!("Graded test {} not found.", id)))
    }
}

pub fn clear_graded_tests(db: &Database, instructor_id: &str) -> Result<usize, AppError> {
    let deleted = GradedTestRepo::clear(db, instructor_id)?;
    metrics::record_graded_tests_deleted(deleted as u64);
    Ok(deleted)
}
