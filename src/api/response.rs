// api/response.rs - 对外响应类型
//! 查询结果、语义检索结果、扫描报告和统计信息的结构化表示

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Collection, MediaKind, MediaRecord, Tag};
use crate::scan::{ScanMode, ScanOutcome, ScanStats};

/// 一条记录的对外投影
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSummary {
    pub id: u64,
    pub path: String,
    pub file_name: String,
    pub kind: MediaKind,
    pub mime_type: String,
    pub size: u64,
    /// 人类可读的文件大小
    pub size_display: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl From<&MediaRecord> for MediaSummary {
    fn from(record: &MediaRecord) -> Self {
        Self {
            id: record.id,
            path: record.path.clone(),
            file_name: record.file_name().to_string(),
            kind: record.kind,
            mime_type: record.mime_type.clone(),
            size: record.size,
            size_display: format_file_size(record.size),
            created_at: record.created_at,
            modified_at: record.modified_at,
            indexed_at: record.indexed_at,
            description: record.description.clone(),
            scene_type: record.scene_type.clone(),
            tags: record.tags.clone(),
        }
    }
}

/// 语义检索的一条命中
///
/// 向量索引只追加，记录删除后旧向量仍可能命中，此时 `record` 为 None。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticHit {
    pub media_id: u64,
    /// 向量追加时的路径
    pub path: String,
    pub score: f32,
    pub record: Option<MediaSummary>,
}

impl SemanticHit {
    pub fn is_stale(&self) -> bool {
        self.record.is_none()
    }
}

/// 扫描报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub mode: ScanMode,
    #[serde(flatten)]
    pub stats: ScanStats,
    pub discovered: usize,
    pub started_at: DateTime<Utc>,
    /// 耗时（毫秒）
    pub took_ms: u64,
}

impl ScanReport {
    pub fn new(outcome: &ScanOutcome, started_at: DateTime<Utc>, took_ms: u64) -> Self {
        Self {
            mode: outcome.mode,
            stats: outcome.stats,
            discovered: outcome.discovered,
            started_at,
            took_ms,
        }
    }

    pub fn total(&self) -> usize {
        self.stats.processed + self.stats.skipped + self.stats.errors
    }
}

/// 断点状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStatus {
    pub last_scan_time: Option<DateTime<Utc>>,
    pub processed_count: usize,
}

/// 按类型统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindCount {
    pub kind: MediaKind,
    pub count: usize,
}

/// 库统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub total_files: usize,
    pub by_kind: Vec<KindCount>,
    pub top_tags: Vec<Tag>,
    /// 向量条目数（包含已删除记录留下的旧条目）
    pub vector_entries: usize,
}

/// 集合及其成员数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub item_count: usize,
}

impl CollectionSummary {
    pub fn new(collection: Collection, item_count: usize) -> Self {
        Self {
            id: collection.id,
            name: collection.name,
            description: collection.description,
            created_at: collection.created_at,
            updated_at: collection.updated_at,
            item_count,
        }
    }
}

/// 集合导出文件的内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionExport {
    pub collection: CollectionSummary,
    pub media_files: Vec<MediaSummary>,
    pub exported_at: DateTime<Utc>,
}

// 辅助函数
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// 相对时间显示，例如 "3 小时前"
pub fn format_age(time: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - time).num_seconds();
    if secs < 0 {
        "未来".to_string()
    } else if secs < 60 {
        "刚刚".to_string()
    } else if secs < 3600 {
        format!("{} 分钟前", secs / 60)
    } else if secs < 86400 {
        format!("{} 小时前", secs / 3600)
    } else if secs < 30 * 86400 {
        format!("{} 天前", secs / 86400)
    } else {
        time.format("%Y-%m-%d").to_string()
    }
}
