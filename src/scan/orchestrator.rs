// scan/orchestrator.rs - 扫描编排
//! 检测 → 解码/标注（外部能力）→ 持久化 → 写断点。
//!
//! 单项失败只计入 errors，扫描总会走完整个变更列表并写入新断点。
//! 解码和标注在线程池中按批并行，存储写入始终按变更顺序串行执行。

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use super::checkpoint::{CheckpointError, CheckpointFile, ScanCheckpoint};
use crate::ai::{AnnotateError, Annotator};
use crate::detect::{identify_all, ChangeDetector, ChangeKind, ChangeRecord, MediaWalker};
use crate::extract::{guess_mime, DecodeError, Decoder};
use crate::identity::{self, IdentityError};
use crate::models::{AnnotationInput, MediaRecord};
use crate::store::{MetadataStore, StoreError};
use crate::vector::VectorIndex;

/// 扫描模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Incremental,
    Full,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Incremental => f.write_str("incremental"),
            ScanMode::Full => f.write_str("full"),
        }
    }
}

/// 单次扫描的状态机：Idle → Detecting → Processing → Checkpointing → Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    Idle,
    Detecting,
    Processing,
    Checkpointing,
}

/// 单次扫描的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub deleted: usize,
}

/// 单个变更的失败分类，全部计入 errors
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("文件不可读: {0}")]
    Io(String),

    #[error("不支持的格式: {0}")]
    UnsupportedFormat(String),

    #[error("标注失败: {0}")]
    Annotation(#[from] AnnotateError),

    #[error("存储写入失败: {0}")]
    StoreWrite(#[from] StoreError),
}

impl From<DecodeError> for ItemError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::UnsupportedFormat(ext) => ItemError::UnsupportedFormat(ext),
            DecodeError::Io(e) => ItemError::Io(e.to_string()),
        }
    }
}

impl From<IdentityError> for ItemError {
    fn from(e: IdentityError) -> Self {
        ItemError::Io(e.to_string())
    }
}

/// 导致扫描无法开始或无法写入断点的错误
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("读取已知记录失败: {0}")]
    Store(#[from] StoreError),

    #[error("写入断点失败: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// 一次扫描的结果
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// 实际执行的模式（无断点的增量扫描按全量执行）
    pub mode: ScanMode,
    pub stats: ScanStats,
    /// 本次发现的候选文件数
    pub discovered: usize,
    /// 已写入磁盘的新断点
    pub checkpoint: ScanCheckpoint,
}

/// 解码 + 标注完成、等待写入的一项
struct Prepared {
    record: MediaRecord,
    embedding: Option<Vec<f32>>,
}

/// 扫描编排器
pub struct ScanOrchestrator<'a> {
    store: &'a MetadataStore,
    vectors: &'a VectorIndex,
    decoder: &'a dyn Decoder,
    annotator: &'a dyn Annotator,
    walker: &'a MediaWalker,
    pool: &'a ThreadPool,
    batch_size: usize,
}

impl<'a> ScanOrchestrator<'a> {
    pub fn new(
        store: &'a MetadataStore,
        vectors: &'a VectorIndex,
        decoder: &'a dyn Decoder,
        annotator: &'a dyn Annotator,
        walker: &'a MediaWalker,
        pool: &'a ThreadPool,
    ) -> Self {
        Self {
            store,
            vectors,
            decoder,
            annotator,
            walker,
            pool,
            batch_size: 8,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// 执行一次扫描
    ///
    /// `previous` 是扫描开始时的断点；成功后返回已经持久化的新断点。
    pub fn run(
        &self,
        roots: &[PathBuf],
        mode: ScanMode,
        previous: &ScanCheckpoint,
        checkpoint_file: &CheckpointFile,
        progress: &mut dyn FnMut(ScanPhase, usize, usize),
    ) -> Result<ScanOutcome, ScanError> {
        let roots: Vec<PathBuf> = roots.iter().map(|r| MediaWalker::normalize_root(r)).collect();
        let mode = if mode == ScanMode::Incremental && previous.is_fresh() {
            tracing::info!("没有上次扫描记录，按全量扫描执行");
            ScanMode::Full
        } else {
            mode
        };
        tracing::info!(mode = %mode, roots = roots.len(), "开始扫描");

        progress(ScanPhase::Detecting, 0, 0);
        let mut stats = ScanStats::default();
        let (changes, discovered) = match mode {
            ScanMode::Incremental => self.detect_incremental(&roots, previous, &mut stats)?,
            ScanMode::Full => self.detect_full(&roots, &mut stats),
        };

        let total = changes.len();
        progress(ScanPhase::Processing, 0, total);
        let processed_paths = self.process(&changes, &mut stats, &mut |done| {
            progress(ScanPhase::Processing, done, total)
        });

        progress(ScanPhase::Checkpointing, total, total);
        let checkpoint = ScanCheckpoint::completed_at(Utc::now(), processed_paths);
        checkpoint_file.save(&checkpoint)?;

        progress(ScanPhase::Idle, total, total);
        tracing::info!(
            mode = %mode,
            processed = stats.processed,
            skipped = stats.skipped,
            errors = stats.errors,
            deleted = stats.deleted,
            "扫描完成"
        );

        Ok(ScanOutcome {
            mode,
            stats,
            discovered,
            checkpoint,
        })
    }

    fn detect_incremental(
        &self,
        roots: &[PathBuf],
        previous: &ScanCheckpoint,
        stats: &mut ScanStats,
    ) -> Result<(Vec<ChangeRecord>, usize), ScanError> {
        let known = self.store.known_files()?;
        let detector = ChangeDetector::new(self.walker, self.pool);
        let set = detector.detect(roots, &known, previous.last_scan_time);
        stats.errors += set.failures.len();
        Ok((set.changes, set.discovered))
    }

    /// 全量模式：跳过变更检测，任一路径下已有相同内容的文件计为 skipped
    fn detect_full(&self, roots: &[PathBuf], stats: &mut ScanStats) -> (Vec<ChangeRecord>, usize) {
        let discovered = self.walker.discover(roots);
        let mut changes = Vec::new();

        for (file, result) in identify_all(self.pool, &discovered) {
            let identity = match result {
                Ok(identity) => identity,
                Err(e) => {
                    tracing::warn!(path = %file.path, error = %e, "计算文件指纹失败");
                    stats.errors += 1;
                    continue;
                }
            };
            match self.store.exists(&identity.content_hash) {
                Ok(true) => {
                    tracing::debug!(path = %file.path, "内容已存在，跳过");
                    stats.skipped += 1;
                }
                Ok(false) => {
                    changes.push(ChangeRecord::from_identity(&file.path, ChangeKind::New, file.kind, &identity));
                }
                Err(e) => {
                    tracing::warn!(path = %file.path, error = %e, "查询内容指纹失败");
                    stats.errors += 1;
                }
            }
        }

        tracing::info!(discovered = discovered.len(), pending = changes.len(), skipped = stats.skipped, "全量扫描待处理");
        (changes, discovered.len())
    }

    /// 按顺序应用变更，返回处理成功的路径
    fn process(
        &self,
        changes: &[ChangeRecord],
        stats: &mut ScanStats,
        on_item: &mut dyn FnMut(usize),
    ) -> Vec<String> {
        let mut processed_paths = Vec::new();
        let mut done = 0;
        let mut index = 0;

        while index < changes.len() {
            let change = &changes[index];
            match change.kind {
                ChangeKind::Deleted => {
                    match self.store.remove(&change.path) {
                        Ok(_) => stats.deleted += 1,
                        Err(e) => {
                            tracing::warn!(path = %change.path, error = %e, "删除记录失败");
                            stats.errors += 1;
                        }
                    }
                    index += 1;
                    done += 1;
                    on_item(done);
                }
                ChangeKind::Moved => {
                    let old_path = change.old_path.as_deref().unwrap_or_default();
                    match self.store.rekey(old_path, &change.path) {
                        Ok(_) => {
                            stats.processed += 1;
                            processed_paths.push(change.path.clone());
                        }
                        Err(e) => {
                            tracing::warn!(from = old_path, to = %change.path, error = %e, "移动记录失败");
                            stats.errors += 1;
                        }
                    }
                    index += 1;
                    done += 1;
                    on_item(done);
                }
                ChangeKind::New | ChangeKind::Modified => {
                    // 连续的 new/modified 组成一批
                    let end = changes[index..]
                        .iter()
                        .take(self.batch_size)
                        .take_while(|c| matches!(c.kind, ChangeKind::New | ChangeKind::Modified))
                        .count()
                        + index;
                    let batch = &changes[index..end];

                    for (change, result) in batch.iter().zip(self.prepare_batch(batch)) {
                        match result.and_then(|prepared| self.commit(prepared)) {
                            Ok(()) => {
                                stats.processed += 1;
                                processed_paths.push(change.path.clone());
                            }
                            Err(e) => {
                                tracing::warn!(path = %change.path, error = %e, "处理文件失败");
                                stats.errors += 1;
                            }
                        }
                        done += 1;
                        on_item(done);
                    }
                    index = end;
                }
            }
        }

        processed_paths
    }

    /// 在线程池中并行解码和标注一批变更，结果与输入一一对应
    fn prepare_batch(&self, batch: &[ChangeRecord]) -> Vec<Result<Prepared, ItemError>> {
        let decoder = self.decoder;
        let annotator = self.annotator;
        self.pool.install(|| {
            batch
                .par_iter()
                .map(|change| prepare(decoder, annotator, change))
                .collect()
        })
    }

    /// 单一写入者：记录 → 向量（仅当有描述和向量时）
    fn commit(&self, prepared: Prepared) -> Result<(), ItemError> {
        let Prepared { record, embedding } = prepared;
        let path = record.path.clone();
        let description = record.description.clone().filter(|d| !d.trim().is_empty());

        let id = self.store.upsert(record)?;
        if let (Some(description), Some(embedding)) = (description, embedding) {
            self.vectors.append(id, &path, &description, &embedding)?;
        }
        Ok(())
    }
}

fn prepare(decoder: &dyn Decoder, annotator: &dyn Annotator, change: &ChangeRecord) -> Result<Prepared, ItemError> {
    let path = Path::new(&change.path);
    let stat = identity::stat_file(path)?;
    let kind = change
        .media_kind
        .ok_or_else(|| ItemError::UnsupportedFormat(change.path.clone()))?;
    let content_hash = match &change.content_hash {
        Some(hash) => hash.clone(),
        None => identity::hash_file(path)?,
    };
    let mime_type = guess_mime(path);

    let content = decoder.decode(path, kind)?;
    let annotation = annotator.annotate(&AnnotationInput {
        path: &change.path,
        kind,
        mime_type: &mime_type,
        content: &content,
    })?;

    let record = MediaRecord {
        id: 0,
        path: change.path.clone(),
        content_hash,
        size: change.size.unwrap_or(stat.size),
        mime_type,
        kind,
        created_at: stat.created_at,
        modified_at: change.modified_at.unwrap_or(stat.modified_at),
        indexed_at: Utc::now(),
        dimensions: content.dimensions,
        description: annotation.description.filter(|d| !d.trim().is_empty()),
        scene_type: annotation.scene_type,
        extracted_text: annotation.extracted_text,
        tags: annotation.tags,
        detected_objects: annotation.detected_objects,
        technical: content.technical,
    };

    Ok(Prepared {
        record,
        embedding: annotation.embedding,
    })
}
