//! 集成测试共用的夹具

#![allow(dead_code)]

use base64::{engine::general_purpose, Engine};
use gradewise_lib::config::LlmConfig;
use gradewise_lib::grading::UploadedFile;
use gradewise_lib::models::StoredGradedTest;
use std::io::Cursor;

pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
}

/// 每行一个段落的 DOCX
pub fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
    let mut docx = docx_rs::Docx::new();
    for p in paragraphs {
        docx = docx.add_paragraph(docx_rs::Paragraph::new().add_run(docx_rs::Run::new().add_text(*p)));
    }
    let mut buf = Cursor::new(Vec::new());
    docx.build().pack(&mut buf).unwrap();
    buf.into_inner()
}

pub fn docx_file(name: &str, paragraphs: &[&str]) -> UploadedFile {
    UploadedFile {
        file_name: name.to_string(),
        data_uri: data_uri(MIME_DOCX, &docx_bytes(paragraphs)),
    }
}

pub fn text_file(name: &str, text: &str) -> UploadedFile {
    UploadedFile {
        file_name: name.to_string(),
        data_uri: data_uri("text/plain", text.as_bytes()),
    }
}

/// 指向 mockito 服务的 OpenAI 兼容配置，重试间隔压到 1ms
pub fn openai_llm_config(base_url: &str) -> LlmConfig {
    LlmConfig {
        model: Some("openai/gpt-4o-mini".into()),
        base_url: Some(base_url.to_string()),
        openai_api_key: Some("sk-test-key".into()),
        max_attempts: 3,
        retry_initial_delay_ms: 1,
        request_timeout_secs: 10,
        ..LlmConfig::default()
    }
}

pub fn gemini_llm_config(base_url: &str) -> LlmConfig {
    LlmConfig {
        model: Some("googleai/gemini-2.0-flash".into()),
        base_url: Some(base_url.to_string()),
        google_api_key: Some("g-test-key".into()),
        max_attempts: 2,
        retry_initial_delay_ms: 1,
        request_timeout_secs: 10,
        ..LlmConfig::default()
    }
}

/// OpenAI chat completion 响应体，`content` 为模型输出
pub fn openai_completion(content: &str) -> String {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
    .to_string()
}

pub fn gemini_completion(text: &str) -> String {
    serde_json::json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
    .to_string()
}

pub fn stored(id: &str, instructor: &str, date: &str) -> StoredGradedTest {
    StoredGradedTest {
        id: id.to_string(),
        instructor_id: instructor.to_string(),
        question_file_name: "question.docx".into(),
        student_response_file_name: "answer.txt".into(),
        rubric_summary: "Two points for each correct step".into(),
        max_score: 10.0,
        ai_score: 7.0,
        ai_feedback: "Clear reasoning".into(),
        ai_justification: "Steps 1-3 correct".into(),
        final_score: 7.5,
        instructor_comments: None,
        grading_date: date.to_string(),
    }
}

/// 每个元素一页的最小 PDF（Courier，单行文本）
pub fn pdf_bytes(pages: &[&str]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

pub fn pdf_file(name: &str, pages: &[&str]) -> UploadedFile {
    UploadedFile {
        file_name: name.to_string(),
        data_uri: data_uri("application/pdf", &pdf_bytes(pages)),
    }
}
