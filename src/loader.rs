//! 知识文件读取
//!
//! 支持 txt / md (UTF-8 文本)、docx (从 `word/document.xml` 抽取段落文本) 与 pdf。
//! doc 能通过扩展名过滤，但读取时返回 `UnsupportedDocument`。

use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::error::{Result, ServiceError};

/// 允许上传的知识文件扩展名
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["txt", "md", "docx", "doc", "pdf"];

/// 文件名是否具有允许的扩展名 (不区分大小写)
pub fn is_supported_extension(name: &str) -> bool {
    extension_of(name)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// 读取知识文件为纯文本
pub fn load_document(path: &Path) -> Result<String> {
    let name = path.display().to_string();
    let ext = extension_of(&name)
        .ok_or_else(|| ServiceError::UnsupportedDocument(format!("{} has no extension", name)))?;

    debug!(path = %name, ext = %ext, "loading document");

    match ext.as_str() {
        "txt" | "md" => {
            let bytes = std::fs::read(path)?;
            String::from_utf8(bytes)
                .map_err(|_| ServiceError::UnsupportedDocument(format!("{} is not valid UTF-8", name)))
        }
        "docx" => {
            let file = std::fs::File::open(path)?;
            let mut archive = zip::ZipArchive::new(file)?;
            let mut xml = String::new();
            archive.by_name("word/document.xml")?.read_to_string(&mut xml)?;
            Ok(docx_xml_to_text(&xml))
        }
        "pdf" => {
            let bytes = std::fs::read(path)?;
            let text = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
                ServiceError::UnsupportedDocument(format!("{}: cannot extract pdf text: {}", name, e))
            })?;
            Ok(normalize_pdf_text(&text))
        }
        "doc" => Err(ServiceError::UnsupportedDocument(format!(
            "{}: .{} text extraction is not available",
            name, ext
        ))),
        _ => Err(ServiceError::UnsupportedDocument(name)),
    }
}

/// pdf 抽取结果含大量空行与行尾空白
fn normalize_pdf_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 将 WordprocessingML 转为纯文本：段落换行，去除标签，还原实体
fn docx_xml_to_text(xml: &str) -> String {
    static PARAGRAPH_END: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();

    let paragraph_end = PARAGRAPH_END.get_or_init(|| Regex::new(r"</w:p>|<w:br\s*/>|<w:tab\s*/>").unwrap());
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]+>").unwrap());

    let with_breaks = paragraph_end.replace_all(xml, |caps: &regex::Captures| {
        if caps[0].starts_with("<w:tab") {
            "\t".to_string()
        } else {
            "\n".to_string()
        }
    });
    let text = tag.replace_all(&with_breaks, "");

    let text = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    text.lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
