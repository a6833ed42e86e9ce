// engine/core.rs - 媒体库核心
//! 对调用方（CLI / UI）暴露的统一接口：扫描、查询、语义检索、断点管理和统计

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rayon::ThreadPool;

use crate::ai::{AnnotateError, Annotator};
use crate::api::{
    CheckpointStatus, CollectionExport, CollectionSummary, KindCount, LibraryStats, MediaSummary, ScanReport,
    SemanticHit,
};
use crate::config::AppConfig;
use crate::detect::MediaWalker;
use crate::extract::Decoder;
use crate::models::MediaRecord;
use crate::query::{MediaQuery, QueryParser};
use crate::scan::{CheckpointError, CheckpointFile, ScanCheckpoint, ScanError, ScanMode, ScanOrchestrator, ScanPhase};
use crate::store::{MetadataStore, StoreError};
use crate::vector::VectorIndex;

/// 统计中返回的热门标签数
const TOP_TAGS: usize = 10;

/// 媒体库错误类型
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),

    #[error("扫描失败: {0}")]
    Scan(#[from] ScanError),

    #[error("断点错误: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("标注器错误: {0}")]
    Annotation(#[from] AnnotateError),

    #[error("线程池创建失败: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("导出失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("记录不存在: {0}")]
    NotFound(String),

    #[error("参数无效: {0}")]
    InvalidInput(String),

    #[error("配置错误: {0}")]
    Config(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// 媒体库
pub struct MediaLibrary {
    pub(crate) config: AppConfig,
    pub(crate) store: MetadataStore,
    pub(crate) vectors: VectorIndex,
    pub(crate) walker: MediaWalker,
    pub(crate) pool: ThreadPool,
    pub(crate) decoder: Arc<dyn Decoder>,
    pub(crate) annotator: Arc<dyn Annotator>,
    pub(crate) checkpoint_file: CheckpointFile,
    pub(crate) export_dir: PathBuf,
}

impl MediaLibrary {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取元数据存储引用
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// 获取向量索引引用
    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    // ============== 扫描 ==============

    /// 扫描配置文件中的根目录
    pub fn scan_configured(&self, mode: ScanMode) -> EngineResult<ScanReport> {
        let roots = self.config.scan.root_paths();
        self.scan(&roots, mode)
    }

    pub fn scan_configured_with_progress<F>(&self, mode: ScanMode, progress: F) -> EngineResult<ScanReport>
    where
        F: FnMut(ScanPhase, usize, usize),
    {
        let roots = self.config.scan.root_paths();
        self.scan_with_progress(&roots, mode, progress)
    }

    pub fn scan(&self, roots: &[PathBuf], mode: ScanMode) -> EngineResult<ScanReport> {
        self.scan_with_progress(roots, mode, |_, _, _| {})
    }

    /// 扫描并通过回调报告进度 `(phase, done, total)`
    pub fn scan_with_progress<F>(&self, roots: &[PathBuf], mode: ScanMode, mut progress: F) -> EngineResult<ScanReport>
    where
        F: FnMut(ScanPhase, usize, usize),
    {
        let started_at = Utc::now();
        let start = Instant::now();

        let previous = self.load_checkpoint();
        let orchestrator = ScanOrchestrator::new(
            &self.store,
            &self.vectors,
            self.decoder.as_ref(),
            self.annotator.as_ref(),
            &self.walker,
            &self.pool,
        )
        .with_batch_size(self.config.performance.batch_size);

        let outcome = orchestrator.run(roots, mode, &previous, &self.checkpoint_file, &mut progress)?;
        Ok(ScanReport::new(&outcome, started_at, start.elapsed().as_millis() as u64))
    }

    /// 读取断点；损坏的断点按“从未扫描”处理
    fn load_checkpoint(&self) -> ScanCheckpoint {
        self.checkpoint_file.load().unwrap_or_else(|e| {
            tracing::warn!(
                path = %self.checkpoint_file.path().display(),
                error = %e,
                "断点文件无法读取，按全量扫描处理"
            );
            ScanCheckpoint::default()
        })
    }

    pub fn checkpoint_status(&self) -> EngineResult<CheckpointStatus> {
        let checkpoint = self.checkpoint_file.load()?;
        Ok(CheckpointStatus {
            last_scan_time: checkpoint.last_scan_time,
            processed_count: checkpoint.last_processed_paths.len(),
        })
    }

    /// 删除断点，下一次扫描按全量执行
    pub fn reset_checkpoint(&self) -> EngineResult<()> {
        self.checkpoint_file.reset()?;
        Ok(())
    }

    // ============== 查询 ==============

    pub fn query(&self, query: &MediaQuery) -> EngineResult<Vec<MediaSummary>> {
        Ok(self.query_records(query)?.iter().map(MediaSummary::from).collect())
    }

    pub fn query_records(&self, query: &MediaQuery) -> EngineResult<Vec<MediaRecord>> {
        Ok(self.store.query(query)?)
    }

    /// 解析文本过滤语法后查询，例如 `beach --kind=image --tag=sunset`
    pub fn query_text(&self, input: &str) -> EngineResult<Vec<MediaSummary>> {
        let query = QueryParser::new()
            .with_default_limit(self.config.search.default_limit)
            .parse(input);
        self.query(&query)
    }

    /// 语义检索：命中按得分从高到低；已删除记录留下的旧向量也会返回，`record` 为 None
    pub fn semantic_search(&self, text: &str, limit: usize) -> EngineResult<Vec<SemanticHit>> {
        let text = text.trim();
        if text.is_empty() || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let embedding = self.annotator.embed(text)?;
        let hits = self.vectors.search(&embedding, limit)?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let record = self.store.get(hit.media_id)?;
            results.push(SemanticHit {
                media_id: hit.media_id,
                path: hit.path,
                score: hit.score,
                record: record.as_ref().map(MediaSummary::from),
            });
        }
        Ok(results)
    }

    /// 以记录的描述做语义检索，结果中不含该记录本身
    pub fn similar_to(&self, media_id: u64, limit: usize) -> EngineResult<Vec<SemanticHit>> {
        let record = self
            .store
            .get(media_id)?
            .ok_or_else(|| EngineError::NotFound(media_id.to_string()))?;
        let Some(description) = record.description.filter(|d| !d.trim().is_empty()) else {
            return Ok(Vec::new());
        };

        let mut hits = self.semantic_search(&description, limit.saturating_add(1))?;
        hits.retain(|hit| hit.media_id != media_id);
        hits.truncate(limit);
        Ok(hits)
    }

    pub fn get(&self, id: u64) -> EngineResult<Option<MediaRecord>> {
        Ok(self.store.get(id)?)
    }

    pub fn get_by_path(&self, path: &str) -> EngineResult<Option<MediaRecord>> {
        Ok(self.store.get_by_path(path)?)
    }

    // ============== 集合 ==============

    /// 创建集合并加入给定记录（不存在的 id 被忽略）
    pub fn create_collection(
        &self,
        name: &str,
        description: Option<&str>,
        media_ids: &[u64],
    ) -> EngineResult<CollectionSummary> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidInput("集合名称不能为空".to_string()));
        }
        let created = self.store.create_collection(name, description)?;
        let added = self.store.add_to_collection(created.id, media_ids)?;
        tracing::info!(id = created.id, name = %created.name, items = added, "集合已创建");

        let collection = self.store.collection(created.id)?.unwrap_or(created);
        Ok(CollectionSummary::new(collection, added))
    }

    /// 返回新增的记录数
    pub fn add_to_collection(&self, collection_id: u64, media_ids: &[u64]) -> EngineResult<usize> {
        Ok(self.store.add_to_collection(collection_id, media_ids)?)
    }

    /// 全部集合，最近更新的在前
    pub fn collections(&self) -> EngineResult<Vec<CollectionSummary>> {
        Ok(self
            .store
            .collections()?
            .into_iter()
            .map(|(collection, count)| CollectionSummary::new(collection, count))
            .collect())
    }

    pub fn collection_export(&self, collection_id: u64) -> EngineResult<CollectionExport> {
        let collection = self
            .store
            .collection(collection_id)?
            .ok_or_else(|| EngineError::NotFound(format!("collection {}", collection_id)))?;
        let records = self.store.collection_records(collection_id)?;

        Ok(CollectionExport {
            collection: CollectionSummary::new(collection, records.len()),
            media_files: records.iter().map(MediaSummary::from).collect(),
            exported_at: Utc::now(),
        })
    }

    /// 把集合导出为 `<export_dir>/collection_<id>_export.json`，返回文件路径
    pub fn export_collection(&self, collection_id: u64) -> EngineResult<PathBuf> {
        let export = self.collection_export(collection_id)?;

        std::fs::create_dir_all(&self.export_dir)?;
        let path = self.export_dir.join(format!("collection_{}_export.json", collection_id));
        let mut temp = tempfile::NamedTempFile::new_in(&self.export_dir)?;
        serde_json::to_writer_pretty(&mut temp, &export)?;
        temp.flush()?;
        temp.persist(&path).map_err(|e| EngineError::Io(e.error))?;

        tracing::info!(id = collection_id, path = %path.display(), items = export.media_files.len(), "集合已导出");
        Ok(path)
    }

    // ============== 统计 ==============

    pub fn stats(&self) -> EngineResult<LibraryStats> {
        let by_kind = self
            .store
            .count_by_kind()?
            .into_iter()
            .map(|(kind, count)| KindCount { kind, count })
            .collect();

        Ok(LibraryStats {
            total_files: self.store.len(),
            by_kind,
            top_tags: self.store.top_tags(TOP_TAGS)?,
            vector_entries: self.vectors.len(),
        })
    }
}
