//! SQLite 存储：r2d2 连接池 + Schema 迁移
//!
//! 只有一张业务表 `graded_tests`，所有查询都按 `instructor_id` 隔离。

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::AppError;

pub mod graded_tests_repo;

pub use graded_tests_repo::GradedTestRepo;

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;
pub type SqlitePooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

pub const CURRENT_DB_VERSION: u32 = 1;

pub struct Database {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Database {
    /// 打开（必要时创建）数据库文件并执行迁移
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建数据库目录失败: {:?}", parent))?;
        }

        let pool = Self::build_pool(db_path)?;
        let db = Database {
            pool,
            db_path: db_path.to_path_buf(),
        };
        db.initialize_schema()?;

        log::info!("[Database] 数据库已就绪: {:?}", db_path);
        Ok(db)
    }

    /// 获取数据库连接
    pub fn get_conn(&self) -> std::result::Result<SqlitePooledConnection, AppError> {
        Ok(self.pool.get()?)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn build_pool(db_path: &Path) -> Result<SqlitePool> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|c| {
            c.pragma_update(None, "foreign_keys", &"ON")?;
            c.pragma_update(None, "journal_mode", &"WAL")?;
            c.pragma_update(None, "synchronous", &"NORMAL")?;
            // 写锁等待上限 3 秒
            c.pragma_update(None, "busy_timeout", &3000i64)?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(15)
            .min_idle(Some(2))
            .connection_timeout(Duration::from_secs(10))
            .build(manager)
            .with_context(|| format!("创建数据库连接池失败: {:?}", db_path))?;

        Ok(pool)
    }

    fn initialize_schema(&self) -> Result<()> {
        let mut conn = self.pool.get().with_context(|| "从连接池获取连接失败")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY NOT NULL
            );",
        )?;

        let current_version = get_schema_version(&conn)?;
        if current_version >= CURRENT_DB_VERSION {
            log::debug!("[Database] Schema 已是最新版本 v{}", current_version);
            return Ok(());
        }

        let tx = conn.transaction()?;
        if current_version < 1 {
            migrate_v0_to_v1(&tx)?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            params![CURRENT_DB_VERSION],
        )?;
        tx.commit()?;

        log::info!(
            "[Database] Schema 迁移完成: v{} -> v{}",
            current_version,
            CURRENT_DB_VERSION
        );
        Ok(())
    }
}

pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    Ok(conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

fn migrate_v0_to_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS graded_tests (
            id TEXT PRIMARY KEY NOT NULL,
            instructor_id TEXT NOT NULL,
            question_file_name TEXT NOT NULL,
            student_response_file_name TEXT NOT NULL,
            rubric_summary TEXT NOT NULL,
            max_score REAL NOT NULL,
            ai_score REAL NOT NULL,
            ai_feedback TEXT NOT NULL,
            ai_justification TEXT NOT NULL,
            final_score REAL NOT NULL,
            instructor_comments TEXT,
            grading_date TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_graded_tests_instructor_date
            ON graded_tests(instructor_id, grading_date);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_schema_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gradewise.db");

        let db = Database::new(&path).unwrap();
        assert!(path.exists());
        let conn = db.get_conn().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_DB_VERSION);
        drop(conn);
        drop(db);

        // 重复打开不会重复迁移
        let db = Database::new(&path).unwrap();
        let conn = db.get_conn().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
