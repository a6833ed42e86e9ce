use anyhow::Result;
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel as CandleBert, Config};
use hf_hub::api::sync::Api;
use jieba_rs::Jieba;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokenizers::Tokenizer;

use crate::extract::format_content_preview;
use crate::models::{Annotation, AnnotationInput, MediaKind};

/// 标注错误：统一计入单项 errors，不会中断扫描
#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("标注服务不可用: {0}")]
    ServiceUnavailable(String),

    #[error("标注超时 ({0:?})")]
    Timeout(Duration),

    #[error("模型推理失败: {0}")]
    Model(String),
}

/// 外部标注能力：把解码后的内容变成描述 / 标签 / 向量
pub trait Annotator: Send + Sync {
    fn annotate(&self, input: &AnnotationInput<'_>) -> Result<Annotation, AnnotateError>;

    /// 语义检索时为查询文本生成向量
    fn embed(&self, text: &str) -> Result<Vec<f32>, AnnotateError>;
}

/// 描述的最大长度
const DESCRIPTION_MAX_CHARS: usize = 200;
/// 送入模型的最大字符数
const MODEL_MAX_CHARS: usize = 512;

/// 基于本地 BGE 模型的标注器
pub struct BertAnnotator {
    model: CandleBert,
    tokenizer: Tokenizer,
    jieba: Jieba,
    device: Device,
    keyword_count: usize,
}

impl BertAnnotator {
    pub fn new(model_id: &str, keyword_count: usize) -> Result<Self> {
        tracing::info!(model = model_id, "正在加载模型");

        let api = Api::new()?;
        let repo = api.model(model_id.to_string());

        let model_path = repo.get("model.safetensors")?;
        let tokenizer_path = repo.get("tokenizer.json")?;
        let config_path = repo.get("config.json")?;

        let device = Device::Cpu;

        let config_content = std::fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(anyhow::Error::msg)?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_path], candle_core::DType::F32, &device)?
        };
        let model = CandleBert::load(vb, &config)?;

        tracing::info!(model = model_id, "模型加载完成");

        Ok(Self {
            model,
            tokenizer,
            jieba: Jieba::new(),
            device,
            keyword_count,
        })
    }

    fn truncate(text: &str) -> String {
        text.chars().take(MODEL_MAX_CHARS).collect()
    }

    fn get_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self.tokenizer.encode(text, true).map_err(anyhow::Error::msg)?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;

        // 取 [CLS] 位置作为句向量
        let cls_embedding = output.i((0, 0))?;
        let vec = cls_embedding.flatten_all()?.to_vec1()?;
        Ok(vec)
    }

    /// 候选词与全文向量做余弦相似度，取前 top_k 个作为关键词
    pub fn extract_keywords(&self, text: &str, top_k: usize) -> Result<Vec<String>> {
        let truncated_text = Self::truncate(text);

        let words = self.jieba.cut(&truncated_text, false);
        let candidates: Vec<String> = words
            .into_iter()
            .map(|w: &str| w.trim().to_string())
            .filter(|w: &String| w.chars().count() > 1 && w.chars().any(|c| c.is_alphanumeric()))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let doc_vec = self.get_embedding(&truncated_text)?;

        let mut scored_candidates: Vec<(f32, String)> = Vec::new();
        for candidate in &candidates {
            if let Ok(cand_vec) = self.get_embedding(candidate) {
                let score = cosine_similarity(&doc_vec, &cand_vec);
                scored_candidates.push((score, candidate.clone()));
            }
        }

        scored_candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored_candidates
            .into_iter()
            .take(top_k)
            .map(|(_, word)| word)
            .collect())
    }

    /// 图片 / 视频没有视觉模型，用文件名生成一段可检索的描述
    fn describe_by_name(path: &str, kind: MediaKind) -> String {
        let stem = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let words = stem.replace(['_', '-', '.'], " ");
        format!("{} {}", kind, words.trim())
    }
}

impl Annotator for BertAnnotator {
    fn annotate(&self, input: &AnnotationInput<'_>) -> Result<Annotation, AnnotateError> {
        let text = input.content.text_content.as_deref().unwrap_or("");

        let (description, source) = if text.trim().is_empty() {
            let d = Self::describe_by_name(input.path, input.kind);
            (d.clone(), d)
        } else {
            (format_content_preview(text, DESCRIPTION_MAX_CHARS), text.to_string())
        };

        let tags = self
            .extract_keywords(&source, self.keyword_count)
            .map_err(|e| AnnotateError::Model(e.to_string()))?;
        let embedding = self
            .get_embedding(&Self::truncate(&description))
            .map_err(|e| AnnotateError::Model(e.to_string()))?;

        Ok(Annotation {
            description: Some(description),
            tags,
            detected_objects: Vec::new(),
            scene_type: None,
            extracted_text: if text.trim().is_empty() { None } else { Some(text.to_string()) },
            embedding: Some(embedding),
        })
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, AnnotateError> {
        self.get_embedding(&Self::truncate(text))
            .map_err(|e| AnnotateError::Model(e.to_string()))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 { 0.0 } else { dot_product / (norm_a * norm_b) }
}
