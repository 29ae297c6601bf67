//! 已批改记录表 CRUD 操作
//!
//! ## 核心方法
//! - `create`: 保存定稿记录
//! - `list` / `recent`: 按批改时间倒序列出
//! - `delete` / `clear`: 删除单条或全部

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::models::{AppError, StoredGradedTest};

type Result<T> = std::result::Result<T, AppError>;

const SELECT_COLUMNS: &str = "id, instructor_id, question_file_name, student_response_file_name,
    rubric_summary, max_score, ai_score, ai_feedback, ai_justification,
    final_score, instructor_comments, grading_date";

fn log_and_skip_err<T>(result: std::result::Result<T, rusqlite::Error>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Row parse error (graded_tests_repo): {}", e);
            None
        }
    }
}

pub struct GradedTestRepo;

impl GradedTestRepo {
    // ========================================================================
    // 写入
    // ========================================================================

    pub fn create(db: &Database, record: &StoredGradedTest) -> Result<()> {
        let conn = db.get_conn()?;
        Self::create_with_conn(&conn, record)
    }

    pub fn create_with_conn(conn: &Connection, record: &StoredGradedTest) -> Result<()> {
        conn.execute(
            "INSERT INTO graded_tests (
                id, instructor_id, question_file_name, student_response_file_name,
                rubric_summary, max_score, ai_score, ai_feedback, ai_justification,
                final_score, instructor_comments, grading_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id,
                record.instructor_id,
                record.question_file_name,
                record.student_response_file_name,
                record.rubric_summary,
                record.max_score,
                record.ai_score,
                record.ai_feedback,
                record.ai_justification,
                record.final_score,
                record.instructor_comments,
                record.grading_date,
            ],
        )?;

        info!(
            "[GradedTestRepo] Saved graded test {} for {}",
            record.id, record.instructor_id
        );
        Ok(())
    }

    // ========================================================================
    // 查询
    // ========================================================================

    pub fn get(db: &Database, instructor_id: &str, id: &str) -> Result<Option<StoredGradedTest>> {
        let conn = db.get_conn()?;
        Self::get_with_conn(&conn, instructor_id, id)
    }

    pub fn get_with_conn(
        conn: &Connection,
        instructor_id: &str,
        id: &str,
    ) -> Result<Option<StoredGradedTest>> {
        let sql = format!(
            "SELECT {} FROM graded_tests WHERE id = ?1 AND instructor_id = ?2",
            SELECT_COLUMNS
        );
        let record = conn
            .query_row(&sql, params![id, instructor_id], Self::row_to_graded_test)
            .optional()?;
        Ok(record)
    }

    /// 列出某位教师的全部记录（最新在前）
    pub fn list(db: &Database, instructor_id: &str) -> Result<Vec<StoredGradedTest>> {
        let conn = db.get_conn()?;
        Self::list_with_conn(&conn, instructor_id, None)
    }

    /// `limit` 为 `None` 时不限条数
    pub fn list_with_conn(
        conn: &Connection,
        instructor_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredGradedTest>> {
        let sql = format!(
            "SELECT {} FROM graded_tests WHERE instructor_id = ?1
             ORDER BY grading_date DESC, rowid DESC LIMIT ?2",
            SELECT_COLUMNS
        );
        // SQLite 中 LIMIT -1 表示不限
        let limit = limit.map(|n| n as i64).unwrap_or(-1);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![instructor_id, limit], Self::row_to_graded_test)?;
        let tests: Vec<StoredGradedTest> = rows.filter_map(log_and_skip_err).collect();
        debug!(
            "[GradedTestRepo] Listed {} graded tests for {}",
            tests.len(),
            instructor_id
        );
        Ok(tests)
    }

    /// 仪表盘视图：最近 `limit` 条及总数
    pub fn recent(
        db: &Database,
        instructor_id: &str,
        limit: usize,
    ) -> Result<(Vec<StoredGradedTest>, usize)> {
        let conn = db.get_conn()?;
        let tests = Self::list_with_conn(&conn, instructor_id, Some(limit))?;
        let total = Self::count_with_conn(&conn, instructor_id)?;
        Ok((tests, total))
    }

    pub fn count_with_conn(conn: &Connection, instructor_id: &str) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM graded_tests WHERE instructor_id = ?1",
            params![instructor_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// 全部教师的记录总数（用于指标）
    pub fn count_all(db: &Database) -> Result<usize> {
        let conn = db.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM graded_tests", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    // ========================================================================
    // 删除
    // ========================================================================

    /// 记录不存在或属于其他教师时返回 `false`
    pub fn delete(db: &Database, instructor_id: &str, id: &str) -> Result<bool> {
        let conn = db.get_conn()?;
        Self::delete_with_conn(&conn, instructor_id, id)
    }

    pub fn delete_with_conn(conn: &Connection, instructor_id: &str, id: &str) -> Result<bool> {
        let affected = conn.execute(
            "DELETE FROM graded_tests WHERE id = ?1 AND instructor_id = ?2",
            params![id, instructor_id],
        )?;
        if affected > 0 {
            info!("[GradedTestRepo] Deleted graded test {}", id);
        }
        Ok(affected > 0)
    }

    pub fn clear(db: &Database, instructor_id: &str) -> Result<usize> {
        let conn = db.get_conn()?;
        Self::clear_with_conn(&conn, instructor_id)
    }

    pub fn clear_with_conn(conn: &Connection, instructor_id: &str) -> Result<usize> {
        let affected = conn.execute(
            "DELETE FROM graded_tests WHERE instructor_id = ?1",
            params![instructor_id],
        )?;
        info!(
            "[GradedTestRepo] Cleared {} graded tests for {}",
            affected, instructor_id
        );
        Ok(affected)
    }

    fn row_to_graded_test(row: &rusqlite::Row) -> rusqlite::Result<StoredGradedTest> {
        Ok(StoredGradedTest {
            id: row.get(0)?,
            instructor_id: row.get(1)?,
            question_file_name: row.get(2)?,
            student_response_file_name: row.get(3)?,
            rubric_summary: row.get(4)?,
            max_score: row.get(5)?,
            ai_score: row.get(6)?,
            ai_feedback: row.get(7)?,
            ai_justification: row.get(8)?,
            final_score: row.get(9)?,
            instructor_comments: row.get(10)?,
            grading_date: row.get(11)?,
        })
    }
}
