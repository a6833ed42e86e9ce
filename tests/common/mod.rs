// tests/common/mod.rs - 集成测试共用工具
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use media_index::ai::{AnnotateError, Annotator};
use media_index::extract::{DecodeError, Decoder, FileDecoder};
use media_index::models::{Annotation, AnnotationInput, DecodedContent, MediaKind};
use media_index::{MediaLibrary, MediaLibraryBuilder};

/// 测试用向量维度
pub const DIM: usize = 256;

/// 确定性的词袋向量：每个词哈希到一个维度
pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for word in words(text) {
        let h = word
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3));
        v[(h % DIM as u64) as usize] += 1.0;
    }
    v
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

fn stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// 不依赖模型的标注器
///
/// 文档用正文作描述，其他类型用文件名；标签取文件名中以 `_` / `-` 分隔的词。
pub struct FakeAnnotator;

impl Annotator for FakeAnnotator {
    fn annotate(&self, input: &AnnotationInput<'_>) -> Result<Annotation, AnnotateError> {
        let stem = stem(input.path);
        let description = match (&input.content.text_content, input.kind) {
            (Some(text), MediaKind::Document) => text.trim().to_string(),
            (_, kind) => format!("{} of {}", kind, stem.replace(['_', '-'], " ")),
        };
        let tags: Vec<String> = words(&stem).collect();

        Ok(Annotation {
            embedding: Some(bag_of_words(&description)),
            description: Some(description),
            scene_type: tags.first().cloned(),
            tags,
            ..Default::default()
        })
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, AnnotateError> {
        Ok(bag_of_words(text))
    }
}

/// 文件名包含 "broken" 时解码失败，其余交给默认解码器
pub struct FlakyDecoder {
    inner: FileDecoder,
}

impl FlakyDecoder {
    pub fn new() -> Self {
        Self { inner: FileDecoder::new() }
    }
}

impl Decoder for FlakyDecoder {
    fn decode(&self, path: &Path, kind: MediaKind) -> Result<DecodedContent, DecodeError> {
        if path.to_string_lossy().contains("broken") {
            return Err(DecodeError::UnsupportedFormat("broken".to_string()));
        }
        self.inner.decode(path, kind)
    }
}

/// 一个临时媒体库：媒体目录、存储目录和断点文件都在同一个临时目录下
pub struct TestLibrary {
    pub dir: TempDir,
    pub library: MediaLibrary,
}

impl TestLibrary {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("media")).unwrap();
        let library = MediaLibraryBuilder::new()
            .with_storage_path(dir.path().join("storage"))
            .with_checkpoint_path(dir.path().join("state").join("scan_state.json"))
            .with_export_dir(dir.path().join("exports"))
            .with_annotator(Arc::new(FakeAnnotator))
            .with_decoder(Arc::new(FlakyDecoder::new()))
            .build()
            .unwrap();
        Self { dir, library }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("media")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.dir.path().join("exports")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.path().join("state").join("scan_state.json")
    }

    /// 在媒体目录下写文件，返回其绝对路径字符串
    pub fn write(&self, rel: &str, content: &[u8]) -> String {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().to_string()
    }

    pub fn path_of(&self, rel: &str) -> String {
        self.root().join(rel).to_string_lossy().to_string()
    }

    pub fn scan(&self, mode: media_index::ScanMode) -> media_index::ScanReport {
        self.library.scan(&[self.root()], mode).unwrap()
    }
}
