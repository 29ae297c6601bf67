//! Pdfium 公共工具模块
//!
//! 提供 pdfium 库加载和 PDF 文本提取功能。
//! 加载策略：`PDFIUM_LIBRARY_PATH` 指定路径 → 可执行文件旁的捆绑库 → 系统库。
//! 全部失败时由 `document_parser` 回退到纯 Rust 的 lopdf。

use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// 线程安全的 Pdfium 包装
///
/// pdfium-render 0.8.37 移除了 `PdfiumLibraryBindings` 的 `Send + Sync` trait bound，
/// 但 `thread_safe` feature 已启用，底层 pdfium 调用由库内互斥锁串行化。
struct SyncPdfium(Pdfium);

// SAFETY: pdfium-render 的 `thread_safe` feature 通过互斥锁保证了线程安全
unsafe impl Send for SyncPdfium {}
unsafe impl Sync for SyncPdfium {}

/// 全局 Pdfium 实例缓存（加载失败也会被缓存，避免每个请求重复尝试）
static PDFIUM_INSTANCE: OnceLock<Result<SyncPdfium, String>> = OnceLock::new();

/// 获取全局 Pdfium 实例（惰性初始化，首次调用时加载库）
pub fn load_pdfium() -> Result<&'static Pdfium, String> {
    PDFIUM_INSTANCE
        .get_or_init(init_pdfium)
        .as_ref()
        .map(|sp| &sp.0)
        .map_err(|e| e.clone())
}

fn init_pdfium() -> Result<SyncPdfium, String> {
    for lib_path in candidate_library_paths() {
        if !lib_path.exists() {
            continue;
        }
        match Pdfium::bind_to_library(&lib_path) {
            Ok(bindings) => {
                info!("[Pdfium] Using library: {:?}", lib_path);
                return Ok(SyncPdfium(Pdfium::new(bindings)));
            }
            Err(e) => {
                debug!("[Pdfium] Library {:?} failed: {:?}", lib_path, e);
            }
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => {
            info!("[Pdfium] Using system library");
            Ok(SyncPdfium(Pdfium::new(bindings)))
        }
        Err(e) => {
            warn!("[Pdfium] No pdfium library available: {:?}", e);
            Err(format!(
                "pdfium 库不可用，请确保 libpdfium 在系统路径中或设置 PDFIUM_LIBRARY_PATH。错误: {:?}",
                e
            ))
        }
    }
}

/// 显式配置的库路径优先，其次是可执行文件旁的捆绑库
fn candidate_library_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(explicit) = std::env::var("PDFIUM_LIBRARY_PATH") {
        if !explicit.trim().is_empty() {
            paths.push(PathBuf::from(explicit.trim()));
        }
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    {
        paths.push(dir.join(Pdfium::pdfium_platform_library_name()));
        paths.push(dir.join("lib").join(Pdfium::pdfium_platform_library_name()));
    }
    paths
}

/// 使用 pdfium 从 PDF 字节流中提取全部文本
///
/// 逐页提取，页间以换行符分隔；无法提取文本的页面静默跳过。
pub fn extract_text_from_pdf_bytes(pdfium: &Pdfium, pdf_bytes: &[u8]) -> Result<String, String> {
    let document = pdfium
        .load_pdf_from_byte_slice(pdf_bytes, None)
        .map_err(|e| format!("PDF文档加载失败: {:?}", e))?;

    let mut all_text = String::new();
    let total_pages = document.pages().len();

    for i in 0..total_pages {
        match document.pages().get(i) {
            Ok(page) => match page.text() {
                Ok(text_page) => {
                    let page_text = text_page.all();
                    if !page_text.trim().is_empty() {
                        if !all_text.is_empty() {
                            all_text.push('\n');
                        }
                        all_text.push_str(&page_text);
                    }
                }
                Err(e) => {
                    debug!("[Pdfium] Failed to extract text from page {}: {:?}", i, e);
                }
            },
            Err(e) => {
                debug!("[Pdfium] Failed to get page {}: {:?}", i, e);
            }
        }
    }

    Ok(all_text)
}
