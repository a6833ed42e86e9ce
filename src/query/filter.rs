// query/filter.rs - 记录过滤器
//! 把 MediaQuery 中的结构化条件编译成对单条 MediaRecord 的判定

use chrono::{DateTime, Utc};
use glob::Pattern;

use super::types::*;
use crate::models::{MediaKind, MediaRecord};

/// 结构化条件的判定器（不含自由文本和标签，这两项由索引负责）
pub struct RecordFilter {
    kind: Option<MediaKind>,
    scene_type: Option<String>,
    mime_prefix: Option<String>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
    paths: PathMatcher,
}

impl RecordFilter {
    pub fn new(query: &MediaQuery) -> Self {
        Self {
            kind: query.kind,
            scene_type: query.scene_type.as_ref().map(|s| s.trim().to_lowercase()),
            mime_prefix: query.mime_prefix.as_ref().map(|s| s.trim().to_lowercase()),
            created_after: query.created_after,
            created_before: query.created_before,
            paths: PathMatcher::new(&query.paths),
        }
    }

    pub fn matches(&self, record: &MediaRecord) -> bool {
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }

        if let Some(ref scene) = self.scene_type {
            let matched = record
                .scene_type
                .as_deref()
                .map(|s| s.trim().to_lowercase() == *scene)
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }

        if let Some(ref prefix) = self.mime_prefix {
            if !record.mime_type.to_lowercase().starts_with(prefix.as_str()) {
                return false;
            }
        }

        if self.created_after.is_some_and(|after| record.created_at < after) {
            return false;
        }
        if self.created_before.is_some_and(|before| record.created_at > before) {
            return false;
        }

        self.paths.matches(&record.path)
    }
}

/// 路径匹配器（使用 glob 模式）
pub struct PathMatcher {
    patterns: Vec<(Pattern, bool)>, // (pattern, is_exclude)
}

impl PathMatcher {
    pub fn new(filters: &[PathFilter]) -> Self {
        let patterns = filters
            .iter()
            .filter_map(|f| match Pattern::new(&f.pattern) {
                Ok(p) => Some((p, f.exclude)),
                Err(e) => {
                    tracing::warn!(pattern = %f.pattern, error = %e, "忽略无效的路径模式");
                    None
                }
            })
            .collect();

        Self { patterns }
    }

    /// 检查路径是否匹配过滤条件
    /// 返回 true 表示路径应该被包含在结果中
    pub fn matches(&self, path: &str) -> bool {
        if self.patterns.is_empty() {
            return true; // 没有过滤条件，全部包含
        }

        let mut included = false;
        let mut has_include_patterns = false;

        for (pattern, is_exclude) in &self.patterns {
            if *is_exclude {
                if pattern.matches(path) {
                    return false;
                }
            } else {
                has_include_patterns = true;
                if pattern.matches(path) {
                    included = true;
                }
            }
        }

        // 只有排除模式时默认包含
        !has_include_patterns || included
    }
}
