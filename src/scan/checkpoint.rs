// scan/checkpoint.rs - 扫描断点
//! 记录“存储截至何时反映了文件系统”，用于增量扫描。
//! 只在扫描结束时整体替换（临时文件 + rename），不会留下半写的文件。

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 当前断点格式版本
pub const CHECKPOINT_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("读写断点文件失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("断点文件格式错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("替换断点文件失败: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// 扫描断点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCheckpoint {
    /// ISO-8601；None 表示从未完成过扫描
    pub last_scan_time: Option<DateTime<Utc>>,
    /// 最近一次扫描处理过的路径（仅用于诊断）
    #[serde(default)]
    pub last_processed_paths: Vec<String>,
    pub format_version: String,
}

impl Default for ScanCheckpoint {
    fn default() -> Self {
        Self {
            last_scan_time: None,
            last_processed_paths: Vec::new(),
            format_version: CHECKPOINT_FORMAT_VERSION.to_string(),
        }
    }
}

impl ScanCheckpoint {
    /// 一次扫描完成后的新断点
    pub fn completed_at(time: DateTime<Utc>, processed_paths: Vec<String>) -> Self {
        Self {
            last_scan_time: Some(time),
            last_processed_paths: processed_paths,
            format_version: CHECKPOINT_FORMAT_VERSION.to_string(),
        }
    }

    /// 没有上次扫描时间时，增量扫描退化为全量扫描
    pub fn is_fresh(&self) -> bool {
        self.last_scan_time.is_none()
    }
}

/// 断点文件
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取断点；文件不存在时返回默认值
    pub fn load(&self) -> CheckpointResult<ScanCheckpoint> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ScanCheckpoint::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// 原子地替换断点文件
    pub fn save(&self, checkpoint: &ScanCheckpoint) -> CheckpointResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let content = serde_json::to_string_pretty(checkpoint)?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path)?;

        tracing::debug!(path = %self.path.display(), "断点已保存");
        Ok(())
    }

    /// 删除断点文件，下一次扫描按全量处理
    pub fn reset(&self) -> CheckpointResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "断点已重置");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join("state.json"));
        let checkpoint = file.load().unwrap();
        assert!(checkpoint.is_fresh());
        assert_eq!(checkpoint.format_version, CHECKPOINT_FORMAT_VERSION);
    }

    #[test]
    fn test_save_load_and_reset() {
        let dir = tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join("nested/state.json"));
        let time = Utc.with_ymd_and_hms(2024, 2, 29, 10, 0, 0).unwrap();

        file.save(&ScanCheckpoint::completed_at(time, vec!["/m/a.jpg".to_string()]))
            .unwrap();

        let raw = std::fs::read_to_string(file.path()).unwrap();
        assert!(raw.contains("\"lastScanTime\": \"2024-02-29T10:00:00Z\""));
        assert!(raw.contains("\"formatVersion\": \"1.0\""));
        assert!(raw.contains("lastProcessedPaths"));

        let loaded = file.load().unwrap();
        assert_eq!(loaded.last_scan_time, Some(time));
        assert_eq!(loaded.last_processed_paths, vec!["/m/a.jpg"]);

        file.reset().unwrap();
        assert!(!file.path().exists());
        assert!(file.load().unwrap().is_fresh());
        // 重复重置不报错
        file.reset().unwrap();
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(CheckpointFile::new(path).load(), Err(CheckpointError::Json(_))));
    }
}
