// detect/walk.rs - 媒体文件发现
//! 遍历扫描根目录，按扩展名白名单、排除路径、文件名模式和大小上限筛选文件

use std::path::{Path, PathBuf};

use glob::Pattern;
use walkdir::{DirEntry, WalkDir};

use crate::config::ScanConfig;
use crate::models::MediaKind;

/// 一个被发现的候选文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: String,
    pub kind: MediaKind,
    pub size: u64,
}

/// 媒体文件遍历器
pub struct MediaWalker {
    config: ScanConfig,
    patterns: Vec<Pattern>,
}

impl MediaWalker {
    pub fn new(config: ScanConfig) -> Self {
        let patterns = config
            .exclude_patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "忽略无效的排除模式");
                    None
                }
            })
            .collect();

        Self { config, patterns }
    }

    /// 把根目录转换为绝对路径（不解析符号链接）
    pub fn normalize_root(root: &Path) -> PathBuf {
        std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf())
    }

    /// 路径是否位于任一扫描根目录之下
    pub fn is_under_roots(path: &str, roots: &[PathBuf]) -> bool {
        let path = Path::new(path);
        roots.iter().any(|root| path.starts_with(root))
    }

    /// 路径是否命中排除列表
    pub fn is_excluded_path(&self, path: &str) -> bool {
        self.config
            .excluded_paths
            .iter()
            .any(|excluded| !excluded.is_empty() && path.contains(excluded.as_str()))
    }

    fn is_hidden(entry: &DirEntry) -> bool {
        // 根目录本身不算隐藏
        entry.depth() > 0
            && entry
                .file_name()
                .to_str()
                .map(|s| s.starts_with('.'))
                .unwrap_or(false)
    }

    fn matches_exclude_pattern(&self, file_name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(file_name))
    }

    /// 发现所有符合条件的文件，按路径排序返回
    pub fn discover(&self, roots: &[PathBuf]) -> Vec<DiscoveredFile> {
        let max_size = self.config.max_file_size_bytes();
        let mut files = Vec::new();

        for root in roots {
            if !root.exists() {
                tracing::warn!(root = %root.display(), "扫描路径不存在，跳过");
                continue;
            }
            tracing::info!(root = %root.display(), "正在扫描目录");

            let walker = WalkDir::new(root)
                .follow_links(self.config.follow_symlinks)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| {
                    if self.config.skip_hidden && Self::is_hidden(entry) {
                        return false;
                    }
                    !self.is_excluded_path(&entry.path().to_string_lossy())
                });

            for entry in walker {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "遍历目录出错，跳过该项");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }

                let path = entry.path();
                let Some(kind) = self.config.extensions.kind_for(path) else {
                    continue;
                };

                let file_name = entry.file_name().to_string_lossy();
                if self.matches_exclude_pattern(&file_name) {
                    continue;
                }

                let size = match entry.metadata() {
                    Ok(m) => m.len(),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "无法读取文件元数据");
                        continue;
                    }
                };
                if size > max_size {
                    tracing::debug!(path = %path.display(), size, "文件超过大小上限，跳过");
                    continue;
                }

                files.push(DiscoveredFile {
                    path: path.to_string_lossy().to_string(),
                    kind,
                    size,
                });
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);
        tracing::info!(count = files.len(), "文件发现完成");
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, bytes: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_discover_applies_filters() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("photos/a.jpg"), b"img");
        write(&root.join("photos/b.PNG"), b"img2");
        write(&root.join("docs/notes.txt"), b"text");
        write(&root.join("docs/skip.zip"), b"zip");
        write(&root.join("node_modules/pkg/c.jpg"), b"img3");
        write(&root.join(".hidden/d.jpg"), b"img4");
        write(&root.join("docs/draft.tmp"), b"tmp");
        write(&root.join("big.mp4"), &vec![0u8; 2 * 1024 * 1024]);

        let mut config = ScanConfig::default();
        config.max_file_size_mb = 1;
        config.extensions.documents.push("tmp".to_string());
        let walker = MediaWalker::new(config);

        let files = walker.discover(&[root.to_path_buf()]);
        let names: Vec<String> = files
            .iter()
            .map(|f| Path::new(&f.path).strip_prefix(root).unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["docs/notes.txt", "photos/a.jpg", "photos/b.PNG"]);
        assert_eq!(files[0].kind, MediaKind::Document);
        assert_eq!(files[1].kind, MediaKind::Image);
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let dir = tempdir().unwrap();
        let walker = MediaWalker::new(ScanConfig::default());
        let files = walker.discover(&[dir.path().join("does-not-exist")]);
        assert!(files.is_empty());
    }

    #[test]
    fn test_is_under_roots() {
        let roots = vec![PathBuf::from("/media/photos")];
        assert!(MediaWalker::is_under_roots("/media/photos/x.jpg", &roots));
        assert!(!MediaWalker::is_under_roots("/media/photos2/x.jpg", &roots));
        assert!(!MediaWalker::is_under_roots("/other/x.jpg", &roots));
    }
}
