//! 上传文件的文本提取
//!
//! 浏览器上传的文件以 Data URI（`data:<mime>;base64,<payload>`）形式传入，
//! 按 MIME 类型分派到 TXT / PDF / DOCX 解析器。

use base64::{engine::general_purpose, Engine};
use regex::Regex;
use std::io::Cursor;
use std::sync::LazyLock;

pub const MIME_TEXT_PLAIN: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";

/// 默认单文件大小限制 (5MB)
pub const DEFAULT_MAX_FILE_BYTES: usize = 5 * 1024 * 1024;

/// ZIP Bomb 防护：最大解压后大小 (200MB)
const MAX_DECOMPRESSED_SIZE: u64 = 200 * 1024 * 1024;

/// 最大压缩比 (100:1)
/// 正常文档压缩比通常在 2:1 到 20:1 之间
const MAX_COMPRESSION_RATIO: f64 = 100.0;

/// 最大文件数量
const MAX_FILES_IN_ARCHIVE: usize = 10000;

static RE_DATA_URI_META: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^data:(.+);base64$").expect("static regex"));

/// 文档解析错误
#[derive(Debug, thiserror::Error)]
pub enum ParsingError {
    #[error("Invalid data URI format")]
    InvalidDataUri,
    #[error("Could not extract MIME type from data URI")]
    MissingMimeType,
    #[error("Invalid base64 payload in data URI: {0}")]
    Base64DecodingError(String),
    #[error("{0}")]
    FileTooLarge(String),
    #[error("Unsupported MIME type for text extraction: .doc files are not supported. Please use .docx, .pdf, or .txt.")]
    LegacyDoc,
    #[error("Unsupported MIME type for text extraction: {0}. Please use .docx, .pdf, or .txt.")]
    UnsupportedFormat(String),
    #[error("{0}")]
    EncryptedDocument(String),
    #[error("{0}")]
    ZipBombDetected(String),
    #[error("DOCX parsing error: {0}")]
    DocxParsingError(String),
    #[error("PDF parsing error: {0}")]
    PdfParsingError(String),
    /// 解析阶段的任何失败都会被包装成此变体，附带 MIME 类型
    #[error("Failed to extract text from file (MIME type: {mime_type}). Ensure the file is valid and not corrupted. Internal error: {source}")]
    ExtractionFailed {
        mime_type: String,
        #[source]
        source: Box<ParsingError>,
    },
}

impl From<base64::DecodeError> for ParsingError {
    fn from(error: base64::DecodeError) -> Self {
        ParsingError::Base64DecodingError(error.to_string())
    }
}

/// 解码后的 Data URI
#[derive(Debug, Clone)]
pub struct DataUri {
    /// 小写、去掉 `;charset=...` 等参数后的 MIME 类型
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DataUri {
    /// 仅读取 MIME 类型，不解码载荷
    pub fn peek_mime_type(data_uri: &str) -> Result<String, ParsingError> {
        let (meta, payload) = data_uri
            .split_once(',')
            .ok_or(ParsingError::InvalidDataUri)?;
        if meta.is_empty() || payload.trim().is_empty() {
            return Err(ParsingError::InvalidDataUri);
        }
        let captures = RE_DATA_URI_META
            .captures(meta.trim())
            .ok_or(ParsingError::MissingMimeType)?;
        let raw = captures
            .get(1)
            .map(|m| m.as_str())
            .ok_or(ParsingError::MissingMimeType)?;
        let mime_type = raw
            .split(';')
            .next()
            .unwrap_or(raw)
            .trim()
            .to_ascii_lowercase();
        if mime_type.is_empty() {
            return Err(ParsingError::MissingMimeType);
        }
        Ok(mime_type)
    }

    pub fn parse(data_uri: &str) -> Result<Self, ParsingError> {
        let mime_type = Self::peek_mime_type(data_uri)?;
        let payload = data_uri
            .split_once(',')
            .map(|(_, p)| p)
            .ok_or(ParsingError::InvalidDataUri)?;
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = general_purpose::STANDARD.decode(compact)?;
        Ok(Self { mime_type, bytes })
    }
}

/// 文档解析器
#[derive(Debug, Clone)]
pub struct DocumentParser {
    max_file_bytes: usize,
}

impl DocumentParser {
    pub fn new() -> Self {
        Self::with_max_file_bytes(DEFAULT_MAX_FILE_BYTES)
    }

    pub fn with_max_file_bytes(max_file_bytes: usize) -> Self {
        Self { max_file_bytes }
    }

    /// 从 Data URI 提取纯文本
    pub fn extract_text_from_data_uri(&self, data_uri: &str) -> Result<String, ParsingError> {
        let uri = DataUri::parse(data_uri)?;
        self.extract_text(&uri)
    }

    /// 从已解码的 Data URI 提取纯文本，结果已 trim
    pub fn extract_text(&self, uri: &DataUri) -> Result<String, ParsingError> {
        self.check_file_size(uri.bytes.len())?;

        let result = match uri.mime_type.as_str() {
            MIME_TEXT_PLAIN => Ok(self.extract_txt_from_bytes(&uri.bytes)),
            MIME_PDF => self.extract_pdf_from_bytes(&uri.bytes),
            MIME_DOCX => self.extract_docx_from_bytes(&uri.bytes),
            MIME_DOC => Err(ParsingError::LegacyDoc),
            other => Err(ParsingError::UnsupportedFormat(other.to_string())),
        };

        result.map_err(|e| {
            log::warn!(
                "[DocumentParser] Error extracting text from {}: {}",
                uri.mime_type,
                e
            );
            ParsingError::ExtractionFailed {
                mime_type: uri.mime_type.clone(),
                source: Box::new(e),
            }
        })
    }

    fn check_file_size(&self, size: usize) -> Result<(), ParsingError> {
        if size > self.max_file_bytes {
            return Err(ParsingError::FileTooLarge(format!(
                "File size {:.1}MB exceeds the {}MB limit.",
                size as f64 / (1024.0 * 1024.0),
                self.max_file_bytes / (1024 * 1024)
            )));
        }
        Ok(())
    }

    /// TXT：识别 BOM（UTF-8 / UTF-16LE / UTF-16BE），否则按 UTF-8 解码，失败时 lossy
    fn extract_txt_from_bytes(&self, bytes: &[u8]) -> String {
        if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
            let (text, _had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
            return text.trim().to_string();
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => text.trim().to_string(),
            Err(_) => String::from_utf8_lossy(bytes).trim().to_string(),
        }
    }

    // ========================================================================
    // PDF
    // ========================================================================

    /// PDF：优先 pdfium；库不可用时回退到 lopdf
    fn extract_pdf_from_bytes(&self, bytes: &[u8]) -> Result<String, ParsingError> {
        self.check_pdf_encryption(bytes)?;

        match crate::pdfium_utils::load_pdfium() {
            Ok(pdfium) => {
                let text = crate::pdfium_utils::extract_text_from_pdf_bytes(pdfium, bytes)
                    .map_err(ParsingError::PdfParsingError)?;
                Ok(text.trim().to_string())
            }
            Err(e) => {
                log::debug!("[DocumentParser] pdfium unavailable, using lopdf: {}", e);
                Self::extract_pdf_with_lopdf(bytes)
            }
        }
    }

    fn extract_pdf_with_lopdf(bytes: &[u8]) -> Result<String, ParsingError> {
        let document = lopdf::Document::load_mem(bytes)
            .map_err(|e| ParsingError::PdfParsingError(e.to_string()))?;

        let mut all_text = String::new();
        for page_number in document.get_pages().keys() {
            match document.extract_text(&[*page_number]) {
                Ok(page_text) => {
                    if !page_text.trim().is_empty() {
                        if !all_text.is_empty() {
                            all_text.push('\n');
                        }
                        all_text.push_str(page_text.trim());
                    }
                }
                Err(e) => {
                    log::debug!(
                        "[DocumentParser] lopdf failed on page {}: {}",
                        page_number,
                        e
                    );
                }
            }
        }

        Ok(all_text.trim().to_string())
    }

    /// 检测 PDF 是否加密
    ///
    /// `/Encrypt` 字典通常位于 trailer 附近，依次检查头部、尾部和中间 8KB
    fn check_pdf_encryption(&self, bytes: &[u8]) -> Result<(), ParsingError> {
        const WINDOW: usize = 4096;
        let len = bytes.len();

        let mut windows = vec![0..len.min(WINDOW)];
        if len > WINDOW {
            windows.push(len - WINDOW..len);
        }
        if len > 2 * WINDOW {
            let mid_start = len / 2 - WINDOW;
            windows.push(mid_start..(mid_start + 2 * WINDOW).min(len));
        }

        let has_encrypt_dict = windows
            .into_iter()
            .any(|range| String::from_utf8_lossy(&bytes[range]).contains("/Encrypt"));
        if has_encrypt_dict {
            return Err(ParsingError::EncryptedDocument(
                "The PDF is password-protected. Remove the password and upload it again."
                    .to_string(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // DOCX
    // ========================================================================

    fn extract_docx_from_bytes(&self, bytes: &[u8]) -> Result<String, ParsingError> {
        self.check_office_encryption(bytes)?;
        self.check_zip_bomb(bytes)?;

        let docx = docx_rs::read_docx(bytes)
            .map_err(|e| ParsingError::DocxParsingError(e.to_string()))?;

        Ok(Self::extract_docx_text(&docx))
    }

    /// 检测 DOCX 是否加密
    ///
    /// 加密后的 Office 文档包含 `EncryptedPackage`，或缺少 `[Content_Types].xml`
    fn check_office_encryption(&self, bytes: &[u8]) -> Result<(), ParsingError> {
        let mut archive = match zip::ZipArchive::new(Cursor::new(bytes)) {
            Ok(a) => a,
            // 无法作为 ZIP 打开，交给 docx-rs 报告具体错误
            Err(_) => return Ok(()),
        };

        if archive.by_name("EncryptedPackage").is_ok() {
            return Err(ParsingError::EncryptedDocument(
                "The document is password-protected. Remove the password and upload it again."
                    .to_string(),
            ));
        }

        if archive.by_name("[Content_Types].xml").is_err() {
            let has_office_structure = archive
                .file_names()
                .any(|name| name.starts_with("word/") || name == "docProps/core.xml");
            if !has_office_structure {
                return Err(ParsingError::EncryptedDocument(
                    "The document appears to be encrypted or damaged.".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// ZIP Bomb 检测：条目数量、单条目压缩比、总解压大小
    fn check_zip_bomb(&self, bytes: &[u8]) -> Result<(), ParsingError> {
        let mut archive = match zip::ZipArchive::new(Cursor::new(bytes)) {
            Ok(a) => a,
            Err(_) => return Ok(()),
        };

        let file_count = archive.len();
        if file_count > MAX_FILES_IN_ARCHIVE {
            return Err(ParsingError::ZipBombDetected(format!(
                "The document contains {} archive entries, more than the {} allowed.",
                file_count, MAX_FILES_IN_ARCHIVE
            )));
        }

        let mut total_uncompressed: u64 = 0;
        for i in 0..file_count {
            let entry = match archive.by_index(i) {
                Ok(e) => e,
                Err(_) => continue,
            };
            let entry_size = entry.size();
            let entry_compressed = entry.compressed_size();

            if entry_compressed > 0 {
                let ratio = entry_size as f64 / entry_compressed as f64;
                if ratio > MAX_COMPRESSION_RATIO {
                    return Err(ParsingError::ZipBombDetected(format!(
                        "Archive entry '{}' has a compression ratio of {:.1}:1, above the {:.0}:1 limit.",
                        entry.name(),
                        ratio,
                        MAX_COMPRESSION_RATIO
                    )));
                }
            }

            total_uncompressed += entry_size;
            if total_uncompressed > MAX_DECOMPRESSED_SIZE {
                return Err(ParsingError::ZipBombDetected(format!(
                    "The document expands to more than {:.0}MB.",
                    MAX_DECOMPRESSED_SIZE as f64 / (1024.0 * 1024.0)
                )));
            }
        }

        log::debug!(
            "[DocumentParser] ZIP check passed: {} entries, {:.1}MB uncompressed",
            file_count,
            total_uncompressed as f64 / (1024.0 * 1024.0)
        );
        Ok(())
    }

    /// 从DOCX文档对象提取文本内容（段落、表格、目录）
    fn extract_docx_text(docx: &docx_rs::Docx) -> String {
        let mut text_content = String::with_capacity(8192);

        for child in &docx.document.children {
            match child {
                docx_rs::DocumentChild::Paragraph(para) => {
                    let line = Self::extract_paragraph_text(para);
                    if !line.trim().is_empty() {
                        text_content.push_str(&line);
                        text_content.push('\n');
                    }
                }
                docx_rs::DocumentChild::Table(table) => {
                    Self::extract_table_text(table, &mut text_content);
                    text_content.push('\n');
                }
                docx_rs::DocumentChild::TableOfContents(toc) => {
                    for item in &toc.items {
                        if !item.text.is_empty() {
                            text_content.push_str(&item.text);
                            text_content.push('\n');
                        }
                    }
                }
                _ => {}
            }
        }

        text_content.trim().to_string()
    }

    /// 从段落中提取纯文本（包括 Run / Hyperlink / Insert 子元素）
    fn extract_paragraph_text(para: &docx_rs::Paragraph) -> String {
        let mut line = String::new();
        for child in &para.children {
            match child {
                docx_rs::ParagraphChild::Run(run) => {
                    Self::extract_run_text(run, &mut line);
                }
                docx_rs::ParagraphChild::Hyperlink(hyperlink) => {
                    for run in &hyperlink.children {
                        if let docx_rs::ParagraphChild::Run(r) = run {
                            Self::extract_run_text(r, &mut line);
                        }
                    }
                }
                docx_rs::ParagraphChild::Insert(ins) => {
                    for ic in &ins.children {
                        if let docx_rs::InsertChild::Run(r) = ic {
                            Self::extract_run_text(r, &mut line);
                        }
                    }
                }
                _ => {}
            }
        }
        line
    }

    /// 从 Run 中提取文本（Text / Tab / Break）
    fn extract_run_text(run: &docx_rs::Run, out: &mut String) {
        for rc in &run.children {
            match rc {
                docx_rs::RunChild::Text(t) => out.push_str(&t.text),
                docx_rs::RunChild::Tab(_) => out.push('\t'),
                docx_rs::RunChild::Break(_) => out.push('\n'),
                _ => {}
            }
        }
    }

    fn extract_cell_text(cell: &docx_rs::TableCell) -> String {
        let mut cell_text = String::new();
        for cc in &cell.children {
            if let docx_rs::TableCellContent::Paragraph(para) = cc {
                let t = Self::extract_paragraph_text(para);
                if !t.trim().is_empty() {
                    if !cell_text.is_empty() {
                        cell_text.push(' ');
                    }
                    cell_text.push_str(t.trim());
                }
            }
        }
        cell_text
    }

    /// 表格按行输出为 `| a | b |`
    fn extract_table_text(table: &docx_rs::Table, out: &mut String) {
        for tc in &table.rows {
            let mut cells: Vec<String> = Vec::new();
            if let docx_rs::TableChild::TableRow(row) = tc {
                for rc in &row.cells {
                    if let docx_rs::TableRowChild::TableCell(cell) = rc {
                        cells.push(Self::extract_cell_text(cell));
                    }
                }
            }
            if cells.is_empty() {
                continue;
            }
            out.push('|');
            for cell in &cells {
                out.push_str(&format!(" {} |", cell));
            }
            out.push('\n');
        }
    }
}

impl Default for DocumentParser {
    fn default() -> Self {
        Self::new()
    }
}
