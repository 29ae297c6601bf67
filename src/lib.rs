// GradeWise library entry
// 提供 run() 供 bin 目标调用，集成测试直接使用各子模块。

pub mod config;
pub mod database;
pub mod document_parser;
pub mod grading;
pub mod llm_manager;
pub mod metrics;
pub mod models;
pub mod pdfium_utils; // Pdfium 公共工具（库加载 + 文本提取）
pub mod providers;
pub mod server;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::database::Database;
use crate::document_parser::DocumentParser;
use crate::grading::GradingDeps;
use crate::llm_manager::LLMManager;
use crate::server::AppState;

/// 按配置组装依赖并启动 HTTP 服务，直到收到退出信号
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .server
        .addr
        .parse()
        .with_context(|| format!("解析监听地址失败: {}", config.server.addr))?;

    let db = Arc::new(Database::new(&config.database.path)?);
    let state = Arc::new(build_state(&config, db));

    tracing::info!(
        "GradeWise v{} ({}) starting, db={:?}",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        config.database.path
    );
    server::serve(addr, state).await
}

/// 组装服务状态（测试中可传入临时数据库）
pub fn build_state(config: &AppConfig, db: Arc<Database>) -> AppState {
    let deps = GradingDeps {
        llm: Arc::new(LLMManager::new(&config.llm)),
        parser: DocumentParser::with_max_file_bytes(config.limits.max_file_bytes),
        limits: config.limits.clone(),
    };
    AppState::new(deps, db, config)
}
