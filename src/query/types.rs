// query/types.rs - 查询相关类型定义
//! 元数据查询的过滤条件，所有条件之间为 AND

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::MediaKind;

/// 默认返回数量
pub const DEFAULT_QUERY_LIMIT: usize = 50;

/// 元数据查询
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaQuery {
    /// 自由文本，在全文影子索引中匹配（各词之间为 AND）
    pub text: String,
    pub kind: Option<MediaKind>,
    /// 场景类型（不区分大小写的精确匹配）
    pub scene_type: Option<String>,
    /// MIME 前缀，例如 "image/" 或 "video/mp4"
    pub mime_prefix: Option<String>,
    /// 媒体必须带有其中的全部标签
    pub tags: Vec<String>,
    /// 创建时间范围（闭区间）
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// 路径过滤（支持 glob 通配符）
    pub paths: Vec<PathFilter>,
    pub limit: usize,
}

impl Default for MediaQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            kind: None,
            scene_type: None,
            mime_prefix: None,
            tags: Vec::new(),
            created_after: None,
            created_before: None,
            paths: Vec::new(),
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl MediaQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn kind(mut self, kind: MediaKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn scene_type(mut self, scene: impl Into<String>) -> Self {
        self.scene_type = Some(scene.into());
        self
    }

    pub fn mime_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mime_prefix = Some(prefix.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn created_between(mut self, after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    pub fn path(mut self, filter: PathFilter) -> Self {
        self.paths.push(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// 去掉空白后的自由文本，为空时返回 None
    pub fn free_text(&self) -> Option<&str> {
        let text = self.text.trim();
        if text.is_empty() { None } else { Some(text) }
    }
}

/// 路径过滤条件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathFilter {
    /// 路径模式（支持 glob 通配符）
    pub pattern: String,
    /// 是否排除（true 表示排除匹配的路径）
    pub exclude: bool,
}

impl PathFilter {
    pub fn include(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), exclude: false }
    }

    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), exclude: true }
    }
}

/// 相对时间范围
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum TimeRange {
    /// 过去 N 小时
    LastHours(u32),
    /// 过去 N 天
    LastDays(u32),
    /// 过去 N 周
    LastWeeks(u32),
    /// 过去 N 月（按 30 天计）
    LastMonths(u32),
    /// 今天（UTC）
    Today,
}

impl TimeRange {
    /// 转换为以 now 为终点的起始时间；超出可表示范围时返回 None
    pub fn start_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let span = match self {
            TimeRange::LastHours(n) => Duration::try_hours(i64::from(*n))?,
            TimeRange::LastDays(n) => Duration::try_days(i64::from(*n))?,
            TimeRange::LastWeeks(n) => Duration::try_weeks(i64::from(*n))?,
            TimeRange::LastMonths(n) => Duration::try_days(30 * i64::from(*n))?,
            TimeRange::Today => {
                return Some(
                    now.date_naive()
                        .and_hms_opt(0, 0, 0)
                        .map(|t| t.and_utc())
                        .unwrap_or(now),
                );
            }
        };
        now.checked_sub_signed(span)
    }
}
