// engine/builder.rs - 媒体库构建器
//! 使用 Builder 模式构建 MediaLibrary

use std::path::PathBuf;
use std::sync::Arc;

use crate::ai::{Annotator, BertAnnotator};
use crate::config::AppConfig;
use crate::detect::MediaWalker;
use crate::extract::{Decoder, FileDecoder};
use crate::scan::CheckpointFile;
use crate::store::MetadataStore;
use crate::vector::VectorIndex;

use super::core::{EngineError, EngineResult, MediaLibrary};

/// 媒体库构建器
#[derive(Default)]
pub struct MediaLibraryBuilder {
    config: Option<AppConfig>,
    storage_path: Option<PathBuf>,
    checkpoint_path: Option<PathBuf>,
    export_dir: Option<PathBuf>,
    decoder: Option<Arc<dyn Decoder>>,
    annotator: Option<Arc<dyn Annotator>>,
}

impl MediaLibraryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置配置
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 设置存储目录（覆盖配置）
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// 设置断点文件路径（覆盖配置）
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// 设置集合导出目录（覆盖配置）
    pub fn with_export_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(path.into());
        self
    }

    /// 设置解码器，默认使用 FileDecoder
    pub fn with_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// 设置标注器，默认加载配置中的 BGE 模型
    pub fn with_annotator(mut self, annotator: Arc<dyn Annotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    /// 构建媒体库
    pub fn build(self) -> EngineResult<MediaLibrary> {
        let config = self.config.unwrap_or_default();

        let storage_path = self
            .storage_path
            .unwrap_or_else(|| PathBuf::from(&config.paths.storage_path));
        let checkpoint_path = self
            .checkpoint_path
            .unwrap_or_else(|| PathBuf::from(&config.paths.checkpoint_path));
        let export_dir = self
            .export_dir
            .unwrap_or_else(|| PathBuf::from(&config.paths.export_dir));

        let store = MetadataStore::open(&storage_path, config.performance.index_writer_memory)?;
        let vectors = VectorIndex::open(store.db())?;

        let annotator: Arc<dyn Annotator> = match self.annotator {
            Some(annotator) => annotator,
            None => Arc::new(
                BertAnnotator::new(&config.ai.model_id, config.ai.keyword_count)
                    .map_err(|e| EngineError::Config(format!("无法加载模型 {}: {}", config.ai.model_id, e)))?,
            ),
        };
        let decoder = self.decoder.unwrap_or_else(|| Arc::new(FileDecoder::new()));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.performance.workers.max(1))
            .thread_name(|i| format!("media-index-{}", i))
            .build()?;

        let walker = MediaWalker::new(config.scan.clone());

        Ok(MediaLibrary {
            store,
            vectors,
            walker,
            pool,
            decoder,
            annotator,
            checkpoint_file: CheckpointFile::new(checkpoint_path),
            export_dir,
            config,
        })
    }
}
