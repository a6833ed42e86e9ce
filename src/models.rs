// models.rs - 核心数据模型
//! 媒体记录、标签以及外部解码/标注结果的类型化表示

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "image" | "images" | "photo" => Some(MediaKind::Image),
            "video" | "videos" => Some(MediaKind::Video),
            "document" | "documents" | "doc" => Some(MediaKind::Document),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// 媒体尺寸 / 时长
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaDimensions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// 时长（秒）
    pub duration: Option<f64>,
}

/// 结构化技术元数据（相机 / GPS 等），不透明的键值对
pub type TechnicalMetadata = BTreeMap<String, String>;

/// 一条媒体记录，每个路径恰好一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    /// 存储分配的 id，移动后保持不变（0 表示尚未分配）
    pub id: u64,
    /// 唯一键
    pub path: String,
    /// 内容指纹（64 位十六进制 SHA-256），允许重复
    pub content_hash: String,
    pub size: u64,
    pub mime_type: String,
    pub kind: MediaKind,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub dimensions: Option<MediaDimensions>,

    // === AI 标注字段 ===
    pub description: Option<String>,
    pub scene_type: Option<String>,
    pub extracted_text: Option<String>,
    pub tags: Vec<String>,
    pub detected_objects: Vec<String>,

    pub technical: Option<TechnicalMetadata>,
}

impl MediaRecord {
    /// 文件名（不含目录）
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.path)
    }
}

/// 标签（名称小写规范化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
    pub usage_count: u64,
}

impl Tag {
    /// 标签名规范化：去空白 + 小写
    pub fn normalize(name: &str) -> Option<String> {
        let name = name.trim().to_lowercase();
        if name.is_empty() { None } else { Some(name) }
    }
}

/// 媒体与标签的关联
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaTagLink {
    pub media_id: u64,
    pub tag_id: u64,
    pub confidence: f32,
}

/// 媒体集合（用户整理的一组媒体）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// 最近一次加入媒体的时间
    pub updated_at: DateTime<Utc>,
}

/// 解码器输出
#[derive(Debug, Clone, Default)]
pub struct DecodedContent {
    pub dimensions: Option<MediaDimensions>,
    pub text_content: Option<String>,
    pub technical: Option<TechnicalMetadata>,
}

/// 标注器输出
#[derive(Debug, Clone, Default)]
pub struct Annotation {
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub detected_objects: Vec<String>,
    pub scene_type: Option<String>,
    pub extracted_text: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// 传给标注器的内容
#[derive(Debug, Clone)]
pub struct AnnotationInput<'a> {
    pub path: &'a str,
    pub kind: MediaKind,
    pub mime_type: &'a str,
    pub content: &'a DecodedContent,
}
