// extract.rs - 内容解码
//! 按媒体类型读取文件内容：文档抽取正文，图片和视频只返回空内容。

use std::fs;
use std::path::Path;

use crate::models::{DecodedContent, MediaKind};

/// 解码错误
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("不支持的文件格式: {0}")]
    UnsupportedFormat(String),

    #[error("读取文件失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 按媒体类型解码文件内容（外部能力）
pub trait Decoder: Send + Sync {
    fn decode(&self, path: &Path, kind: MediaKind) -> Result<DecodedContent, DecodeError>;
}

/// 根据扩展名猜测 MIME 类型
pub fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// 默认解码器
///
/// 文本类文档读出正文，PDF 走 pdf-extract；图片和视频不做格式解析，
/// 只返回空内容，由标注器基于路径和类型处理。
pub struct FileDecoder {}

impl FileDecoder {
    pub fn new() -> Self {
        Self {}
    }

    fn extension(path: &Path) -> String {
        path.extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_lowercase()
    }

    fn decode_document(&self, path: &Path) -> Result<DecodedContent, DecodeError> {
        let extension = Self::extension(path);
        let text = match extension.as_str() {
            "txt" | "md" | "markdown" => {
                let bytes = fs::read(path)?;
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            "pdf" => {
                // 检查可读性，区分 IO 错误和解析错误
                fs::metadata(path)?;
                match pdf_extract::extract_text(path) {
                    Ok(text) => Some(text),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "无法解析 PDF，仅保存元数据");
                        None
                    }
                }
            }
            // Office 文档只记录元数据
            "docx" | "pptx" => {
                fs::metadata(path)?;
                None
            }
            other => return Err(DecodeError::UnsupportedFormat(other.to_string())),
        };

        Ok(DecodedContent {
            text_content: text.filter(|t| !t.trim().is_empty()),
            ..Default::default()
        })
    }

}

impl Default for FileDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FileDecoder {
    fn decode(&self, path: &Path, kind: MediaKind) -> Result<DecodedContent, DecodeError> {
        tracing::debug!(path = %path.display(), kind = %kind, "正在解析文件");
        match kind {
            MediaKind::Document => self.decode_document(path),
            MediaKind::Image | MediaKind::Video => {
                fs::metadata(path)?;
                Ok(DecodedContent::default())
            }
        }
    }
}

/// 截取内容预览，尽量在句子结尾处截断
pub fn format_content_preview(content: &str, max_chars: usize) -> String {
    let cleaned = content.trim();
    if cleaned.is_empty() {
        return "[无文本内容]".to_string();
    }
    if cleaned.chars().count() <= max_chars {
        return cleaned.to_string();
    }

    let head: String = cleaned.chars().take(max_chars).collect();
    let sentence_endings = ['。', '！', '？', '.', '!', '?', '\n', '；', ';'];
    // 只在后半段寻找句子结尾，避免预览过短
    let min_len = head.len() / 2;
    let cut = head
        .char_indices()
        .filter(|(i, c)| *i >= min_len && sentence_endings.contains(c))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(head.len());

    format!("{}...", &head[..cut])
}
