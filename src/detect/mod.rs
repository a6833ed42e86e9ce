// detect/mod.rs - 变更检测
//! 比较当前文件系统快照与已知记录集，输出分类后的变更列表。
//!
//! 检测器是只读的，不会修改存储。输出顺序：deleted → new/modified → moved。

mod walk;

pub use walk::*;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::identity::{self, FileIdentity};
use crate::models::MediaKind;

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    New,
    Modified,
    Moved,
    Deleted,
}

impl ChangeKind {
    /// 处理顺序：删除最先，移动最后
    fn order(&self) -> u8 {
        match self {
            ChangeKind::Deleted => 0,
            ChangeKind::New | ChangeKind::Modified => 1,
            ChangeKind::Moved => 2,
        }
    }
}

/// 一条变更（不持久化）
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub path: String,
    pub kind: ChangeKind,
    /// 仅 moved 有值
    pub old_path: Option<String>,
    pub content_hash: Option<String>,
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub media_kind: Option<MediaKind>,
}

impl ChangeRecord {
    pub fn from_identity(path: &str, kind: ChangeKind, media_kind: MediaKind, identity: &FileIdentity) -> Self {
        Self {
            path: path.to_string(),
            kind,
            old_path: None,
            content_hash: Some(identity.content_hash.clone()),
            size: Some(identity.stat.size),
            modified_at: Some(identity.stat.modified_at),
            media_kind: Some(media_kind),
        }
    }

    fn deleted(path: &str) -> Self {
        Self {
            path: path.to_string(),
            kind: ChangeKind::Deleted,
            old_path: None,
            content_hash: None,
            size: None,
            modified_at: None,
            media_kind: None,
        }
    }
}

/// 存储中已知文件的快照条目
#[derive(Debug, Clone, PartialEq)]
pub struct KnownFile {
    pub id: u64,
    pub content_hash: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// 单个文件在检测阶段的失败（计入 errors，不中断扫描）
#[derive(Debug, Clone)]
pub struct DetectFailure {
    pub path: String,
    pub error: String,
}

/// 检测结果
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub changes: Vec<ChangeRecord>,
    pub failures: Vec<DetectFailure>,
    /// 本次发现的文件数
    pub discovered: usize,
}

impl ChangeSet {
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// 并行计算一组文件的指纹；在返回前收集全部结果
pub fn identify_all(
    pool: &ThreadPool,
    files: &[DiscoveredFile],
) -> Vec<(DiscoveredFile, Result<FileIdentity, String>)> {
    pool.install(|| {
        files
            .par_iter()
            .map(|file| {
                let result = identity::identify(std::path::Path::new(&file.path)).map_err(|e| e.to_string());
                (file.clone(), result)
            })
            .collect()
    })
}

/// 变更检测器
pub struct ChangeDetector<'a> {
    walker: &'a MediaWalker,
    pool: &'a ThreadPool,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(walker: &'a MediaWalker, pool: &'a ThreadPool) -> Self {
        Self { walker, pool }
    }

    /// 检测变更
    ///
    /// `known` 是存储中全部 `path → KnownFile`；只有位于扫描根目录下的已知路径
    /// 才可能被判为 deleted。`last_scan_time` 为 None 时视为最早时间。
    pub fn detect(
        &self,
        roots: &[PathBuf],
        known: &BTreeMap<String, KnownFile>,
        last_scan_time: Option<DateTime<Utc>>,
    ) -> ChangeSet {
        let discovered = self.walker.discover(roots);
        let current_paths: HashSet<&str> = discovered.iter().map(|f| f.path.as_str()).collect();

        // 一次完整哈希，所有结果收集完毕后才开始比较
        let identified = identify_all(self.pool, &discovered);

        let mut failures = Vec::new();
        let mut hashed: BTreeMap<&str, (MediaKind, &FileIdentity)> = BTreeMap::new();
        for (file, result) in &identified {
            match result {
                Ok(identity) => {
                    hashed.insert(file.path.as_str(), (file.kind, identity));
                }
                Err(e) => {
                    tracing::warn!(path = %file.path, error = %e, "计算文件指纹失败");
                    failures.push(DetectFailure {
                        path: file.path.clone(),
                        error: e.clone(),
                    });
                }
            }
        }

        // hash → 存储中未知的当前路径（按路径排序），移动目标只从中选取
        let mut hash_to_unknown: HashMap<&str, Vec<&str>> = HashMap::new();
        for (path, (_, identity)) in &hashed {
            if !known.contains_key(*path) {
                hash_to_unknown
                    .entry(identity.content_hash.as_str())
                    .or_default()
                    .push(*path);
            }
        }

        let known_in_roots: Vec<(&String, &KnownFile)> = known
            .iter()
            .filter(|(path, _)| MediaWalker::is_under_roots(path, roots))
            .collect();

        // 移动检测：旧路径已消失、新路径未知、同一新路径只认领一次
        let mut claimed: HashSet<&str> = HashSet::new();
        let mut moved_from: HashSet<&str> = HashSet::new();
        let mut moved = Vec::new();
        for (old_path, known_file) in &known_in_roots {
            if current_paths.contains(old_path.as_str()) {
                continue;
            }
            // 第一个尚未被认领的未知路径
            let Some(new_path) = hash_to_unknown
                .get(known_file.content_hash.as_str())
                .and_then(|paths| paths.iter().copied().find(|p| !claimed.contains(p)))
            else {
                continue;
            };
            let Some((media_kind, identity)) = hashed.get(new_path) else {
                continue;
            };

            claimed.insert(new_path);
            moved_from.insert(old_path.as_str());
            let mut change = ChangeRecord::from_identity(new_path, ChangeKind::Moved, *media_kind, identity);
            change.old_path = Some(old_path.to_string());
            moved.push(change);
        }

        let mut changes = Vec::new();

        for (path, _) in &known_in_roots {
            if !current_paths.contains(path.as_str()) && !moved_from.contains(path.as_str()) {
                changes.push(ChangeRecord::deleted(path));
            }
        }

        let last_scan = last_scan_time.unwrap_or(DateTime::<Utc>::MIN_UTC);
        for (path, (media_kind, identity)) in &hashed {
            match known.get(*path) {
                None if !claimed.contains(path) => {
                    changes.push(ChangeRecord::from_identity(path, ChangeKind::New, *media_kind, identity));
                }
                None => {}
                Some(known_file) => {
                    // mtime 晚于上次扫描也算修改：仅 touch 的文件会被重新处理
                    let content_changed = identity.content_hash != known_file.content_hash;
                    let touched = identity.stat.modified_at > last_scan;
                    if content_changed || touched {
                        tracing::debug!(path = %path, content_changed, touched, "文件已修改");
                        changes.push(ChangeRecord::from_identity(path, ChangeKind::Modified, *media_kind, identity));
                    }
                }
            }
        }

        changes.extend(moved);
        // 稳定排序，保持同组内的路径顺序
        changes.sort_by_key(|c| c.kind.order());

        let set = ChangeSet {
            changes,
            failures,
            discovered: discovered.len(),
        };
        tracing::info!(
            new = set.count(ChangeKind::New),
            modified = set.count(ChangeKind::Modified),
            moved = set.count(ChangeKind::Moved),
            deleted = set.count(ChangeKind::Deleted),
            "变更检测完成"
        );
        set
    }
}
