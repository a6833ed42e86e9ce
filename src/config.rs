// 配置模块 - 支持外部配置文件
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::MediaKind;

/// 默认配置文件路径
pub const CONFIG_FILE: &str = "./config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("无法读取配置文件: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置文件格式错误: {0}")]
    Toml(#[from] toml::de::Error),
}

// ============== 配置结构体 ==============

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub scan: ScanConfig,
    pub performance: PerformanceConfig,
    pub search: SearchConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// 存储目录（记录库、全文索引、向量索引）
    pub storage_path: String,
    /// 扫描 checkpoint 文件
    pub checkpoint_path: String,
    /// 集合导出目录
    pub export_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScanConfig {
    /// 扫描根目录
    pub roots: Vec<String>,
    /// 排除的路径片段（目录或文件路径中包含即跳过）
    pub excluded_paths: Vec<String>,
    /// 排除的文件名模式（glob）
    pub exclude_patterns: Vec<String>,
    /// 单个文件大小上限 (MB)
    pub max_file_size_mb: u64,
    /// 是否跟随符号链接
    pub follow_symlinks: bool,
    /// 是否跳过隐藏文件
    pub skip_hidden: bool,
    /// 按媒体类型分组的扩展名白名单
    pub extensions: ExtensionsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtensionsConfig {
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub documents: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PerformanceConfig {
    /// 哈希 / 标注线程池大小
    pub workers: usize,
    /// 每批并行标注的变更数
    pub batch_size: usize,
    /// 全文索引写入器内存
    pub index_writer_memory: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub semantic_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AiConfig {
    pub model_id: String,
    pub keyword_count: usize,
}

// ============== 默认配置 ==============

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            storage_path: "./storage".to_string(),
            checkpoint_path: "./storage/scan_state.json".to_string(),
            export_dir: "./storage/exports".to_string(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: vec!["./media".to_string()],
            excluded_paths: vec![
                "/.git".to_string(),
                "/.Trash".to_string(),
                "/node_modules".to_string(),
            ],
            exclude_patterns: vec!["*.tmp".to_string(), ".DS_Store".to_string()],
            max_file_size_mb: 500,
            follow_symlinks: false,
            skip_hidden: true,
            extensions: ExtensionsConfig::default(),
        }
    }
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        let list = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            images: list(&["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp", "heic"]),
            videos: list(&["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"]),
            documents: list(&["pdf", "docx", "pptx", "txt", "md"]),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 8,
            index_writer_memory: 50_000_000,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            semantic_limit: 10,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model_id: "BAAI/bge-small-zh-v1.5".to_string(),
            keyword_count: 5,
        }
    }
}

// ============== 辅助方法 ==============

impl ExtensionsConfig {
    /// 根据扩展名判断媒体类型，不在白名单内返回 None
    pub fn kind_for(&self, path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        let hit = |list: &[String]| list.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext));

        if hit(&self.images) {
            Some(MediaKind::Image)
        } else if hit(&self.videos) {
            Some(MediaKind::Video)
        } else if hit(&self.documents) {
            Some(MediaKind::Document)
        } else {
            None
        }
    }
}

impl ScanConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn root_paths(&self) -> Vec<PathBuf> {
        self.roots.iter().map(PathBuf::from).collect()
    }
}

// ============== 配置加载 ==============

impl AppConfig {
    /// 从默认配置文件加载，失败则使用默认配置
    pub fn load() -> Self {
        Self::load_from_file(CONFIG_FILE).unwrap_or_else(|e| {
            tracing::warn!(file = CONFIG_FILE, error = %e, "无法加载配置文件，使用默认配置");
            Self::default()
        })
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// 生成默认配置文件
    pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let default_content = include_str!("../config.toml");
        fs::write(path, default_content)?;
        Ok(())
    }
}
