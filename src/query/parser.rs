// query/parser.rs - 查询解析器
//! 解析自由文本 + 结构化过滤语法
//!
//! 支持的语法:
//! - 自由文本: "sunset over the ocean"
//! - 媒体类型: --kind=image|video|document
//! - 场景类型: --scene=beach
//! - MIME 前缀: --mime=image/
//! - 标签（全部匹配）: --tag=beach,sunset
//! - 创建时间: --after=2024-01-01 --before=2024-12-31（均含当天）
//! - 相对时间: --time=7d (过去7天), --time=24h, --time=1w, --time=3m, --time=today
//! - 路径过滤: --path=/photos/* 或 --path="/path with spaces/*"
//! - 排除路径: --exclude-path=/tmp/*
//! - 数量: --limit=20

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::types::*;
use crate::models::MediaKind;

// 正则表达式预编译
static ARG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    // 匹配 --key=value 或 --key="value with spaces"
    Regex::new(r#"--([a-z\-]+)=(?:"([^"]+)"|([^\s]+))"#).unwrap()
});

static TIME_RELATIVE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)(h|d|w|m)$").unwrap());

/// 查询解析器
pub struct QueryParser {
    default_limit: usize,
}

impl QueryParser {
    pub fn new() -> Self {
        Self { default_limit: DEFAULT_QUERY_LIMIT }
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    /// 解析查询字符串
    pub fn parse(&self, input: &str) -> MediaQuery {
        let input = input.trim();
        let mut args: HashMap<String, Vec<String>> = HashMap::new();
        let mut text_parts: Vec<&str> = Vec::new();

        // 提取所有 --key=value 参数
        let mut last_end = 0;
        for cap in ARG_PATTERN.captures_iter(input) {
            let (Some(full_match), Some(key)) = (cap.get(0), cap.get(1)) else {
                continue;
            };

            // 收集参数之前的文本
            if full_match.start() > last_end {
                text_parts.push(input[last_end..full_match.start()].trim());
            }
            last_end = full_match.end();

            // 优先使用带引号的值
            let value = cap
                .get(2)
                .or_else(|| cap.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();

            args.entry(key.as_str().to_string()).or_default().push(value);
        }

        if last_end < input.len() {
            text_parts.push(input[last_end..].trim());
        }

        let text = text_parts
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");

        let mut query = MediaQuery::new().text(text).limit(self.default_limit);
        self.apply_filters(&mut query, &args, Utc::now());
        query
    }

    fn apply_filters(&self, query: &mut MediaQuery, args: &HashMap<String, Vec<String>>, now: DateTime<Utc>) {
        let first = |key: &str| args.get(key).and_then(|v| v.first()).map(|s| s.as_str());

        if let Some(kind) = first("kind") {
            match MediaKind::parse(kind) {
                Some(k) => query.kind = Some(k),
                None => tracing::debug!(kind, "未知的媒体类型，忽略"),
            }
        }

        if let Some(scene) = first("scene") {
            query.scene_type = Some(scene.to_string());
        }

        if let Some(mime) = first("mime") {
            query.mime_prefix = Some(mime.to_string());
        }

        // 标签
        if let Some(tags) = args.get("tag") {
            for t in tags {
                query.tags.extend(
                    t.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty()),
                );
            }
        }

        // 路径过滤
        if let Some(paths) = args.get("path") {
            for path in paths {
                query.paths.push(PathFilter::include(path.clone()));
            }
        }
        if let Some(paths) = args.get("exclude-path") {
            for path in paths {
                query.paths.push(PathFilter::exclude(path.clone()));
            }
        }

        // 时间过滤
        // 超出日期范围的相对时间与其他无效值一样忽略
        if let Some(start) = first("time").and_then(parse_time_range).and_then(|r| r.start_from(now)) {
            query.created_after = Some(start);
            query.created_before = Some(now);
        }
        if let Some(after) = first("after").and_then(parse_date) {
            query.created_after = after.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        }
        if let Some(before) = first("before").and_then(parse_date) {
            query.created_before = before.and_hms_nano_opt(23, 59, 59, 999_999_999).map(|t| t.and_utc());
        }

        if let Some(limit) = first("limit").and_then(|s| s.parse::<usize>().ok()) {
            query.limit = limit;
        }
    }
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new()
    }
}

/// 解析相对时间范围
fn parse_time_range(s: &str) -> Option<TimeRange> {
    let s = s.to_lowercase();
    if s == "today" {
        return Some(TimeRange::Today);
    }

    let cap = TIME_RELATIVE_PATTERN.captures(&s)?;
    let num: u32 = cap.get(1)?.as_str().parse().ok()?;
    match cap.get(2)?.as_str() {
        "h" => Some(TimeRange::LastHours(num)),
        "d" => Some(TimeRange::LastDays(num)),
        "w" => Some(TimeRange::LastWeeks(num)),
        "m" => Some(TimeRange::LastMonths(num)),
        _ => None,
    }
}

/// 解析日期字符串 (YYYY-MM-DD)
fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
