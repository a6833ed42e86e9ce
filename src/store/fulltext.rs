// store/fulltext.rs - 全文影子索引
//! 每条 MediaRecord 对应一个 tantivy 文档，以记录 id 为键。
//! 只由 MetadataStore 在规范写入之后重建，调用方只读。

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, SchemaBuilder, TextFieldIndexing, TextOptions, Value, FAST, INDEXED,
    STORED,
};
use tantivy::tokenizer::{LowerCaser, TextAnalyzer};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tantivy_jieba::JiebaTokenizer;

use super::fields::*;
use super::{StoreError, StoreResult};
use crate::models::MediaRecord;

/// 影子行：MediaRecord 文本字段的一对一投影
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FullTextEntry {
    pub media_id: u64,
    pub path: String,
    pub description: String,
    pub scene_type: String,
    pub extracted_text: String,
    pub tags: Vec<String>,
    pub detected_objects: Vec<String>,
}

impl FullTextEntry {
    pub fn from_record(record: &MediaRecord) -> Self {
        Self {
            media_id: record.id,
            path: record.path.clone(),
            description: record.description.clone().unwrap_or_default(),
            scene_type: record.scene_type.clone().unwrap_or_default(),
            extracted_text: record.extracted_text.clone().unwrap_or_default(),
            tags: record.tags.clone(),
            detected_objects: record.detected_objects.clone(),
        }
    }
}

/// 构建影子索引的 Schema
pub fn build_schema() -> Schema {
    let mut schema_builder = SchemaBuilder::default();

    let text_options = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(TOKENIZER_NAME)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();

    schema_builder.add_u64_field(FIELD_ID, INDEXED | STORED | FAST);
    schema_builder.add_text_field(FIELD_PATH, text_options.clone());
    schema_builder.add_text_field(FIELD_DESCRIPTION, text_options.clone());
    schema_builder.add_text_field(FIELD_SCENE_TYPE, text_options.clone());
    schema_builder.add_text_field(FIELD_EXTRACTED_TEXT, text_options.clone());
    schema_builder.add_text_field(FIELD_TAGS, text_options.clone());
    schema_builder.add_text_field(FIELD_DETECTED_OBJECTS, text_options);

    schema_builder.build()
}

/// 注册分词器到索引
pub fn register_tokenizers(index: &Index) {
    let analyzer = TextAnalyzer::builder(JiebaTokenizer {})
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(TOKENIZER_NAME, analyzer);
}

/// 全文影子索引
pub struct FullTextIndex {
    index: Index,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,

    // 字段缓存
    field_id: Field,
    field_path: Field,
    field_description: Field,
    field_scene_type: Field,
    field_extracted_text: Field,
    field_tags: Field,
    field_detected_objects: Field,
}

impl FullTextIndex {
    /// tantivy 单线程写入器的最小堆
    const MIN_WRITER_MEMORY: usize = 15_000_000;

    pub fn open(dir: &Path, writer_memory: usize) -> StoreResult<Self> {
        std::fs::create_dir_all(dir)?;

        let schema = build_schema();
        let directory = MmapDirectory::open(dir).map_err(tantivy::TantivyError::from)?;
        let index = Index::open_or_create(directory, schema.clone())?;
        register_tokenizers(&index);

        // 单一写入者，一个线程足够
        let writer = index.writer_with_num_threads(1, writer_memory.max(Self::MIN_WRITER_MEMORY))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        let field = |name: &str| schema.get_field(name);

        Ok(Self {
            field_id: field(FIELD_ID)?,
            field_path: field(FIELD_PATH)?,
            field_description: field(FIELD_DESCRIPTION)?,
            field_scene_type: field(FIELD_SCENE_TYPE)?,
            field_extracted_text: field(FIELD_EXTRACTED_TEXT)?,
            field_tags: field(FIELD_TAGS)?,
            field_detected_objects: field(FIELD_DETECTED_OBJECTS)?,
            index,
            writer: Mutex::new(writer),
            reader,
        })
    }

    fn build_doc(&self, entry: &FullTextEntry) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        doc.add_u64(self.field_id, entry.media_id);
        doc.add_text(self.field_path, &entry.path);
        doc.add_text(self.field_description, &entry.description);
        doc.add_text(self.field_scene_type, &entry.scene_type);
        doc.add_text(self.field_extracted_text, &entry.extracted_text);
        for tag in &entry.tags {
            doc.add_text(self.field_tags, tag);
        }
        for object in &entry.detected_objects {
            doc.add_text(self.field_detected_objects, object);
        }
        doc
    }

    fn id_term(&self, media_id: u64) -> Term {
        Term::from_field_u64(self.field_id, media_id)
    }

    /// 用新的影子行替换该记录的旧行（删除 + 添加 + 提交）
    pub fn replace(&self, entry: &FullTextEntry) -> StoreResult<()> {
        {
            let mut writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
            writer.delete_term(self.id_term(entry.media_id));
            writer.add_document(self.build_doc(entry))?;
            writer.commit()?;
        }
        self.reader.reload()?;
        Ok(())
    }

    /// 删除该记录的影子行
    pub fn delete(&self, media_id: u64) -> StoreResult<()> {
        {
            let mut writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
            writer.delete_term(self.id_term(media_id));
            writer.commit()?;
        }
        self.reader.reload()?;
        Ok(())
    }

    /// 自由文本检索，返回全部命中记录的 id（各词之间为 AND）
    pub fn search_ids(&self, text: &str) -> StoreResult<HashSet<u64>> {
        let searcher = self.reader.searcher();
        let num_docs = searcher.num_docs() as usize;
        if num_docs == 0 || text.trim().is_empty() {
            return Ok(HashSet::new());
        }

        let mut query_parser = QueryParser::for_index(
            &self.index,
            vec![
                self.field_path,
                self.field_description,
                self.field_scene_type,
                self.field_extracted_text,
                self.field_tags,
                self.field_detected_objects,
            ],
        );
        query_parser.set_conjunction_by_default();

        let (query, errors) = query_parser.parse_query_lenient(text);
        if !errors.is_empty() {
            tracing::debug!(query = text, errors = ?errors, "查询语法不完整，已宽松解析");
        }

        let top_docs = searcher.search(&query, &TopDocs::with_limit(num_docs))?;
        let mut ids = HashSet::new();
        for (_score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            if let Some(id) = doc.get_first(self.field_id).and_then(|v| v.as_u64()) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// 读取某条记录的影子行
    pub fn entry(&self, media_id: u64) -> StoreResult<Option<FullTextEntry>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(self.id_term(media_id), IndexRecordOption::Basic);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;

        let Some((_score, doc_address)) = top_docs.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(doc_address)?;

        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        let all = |field: Field| -> Vec<String> {
            doc.get_all(field)
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        };

        Ok(Some(FullTextEntry {
            media_id,
            path: text(self.field_path),
            description: text(self.field_description),
            scene_type: text(self.field_scene_type),
            extracted_text: text(self.field_extracted_text),
            tags: all(self.field_tags),
            detected_objects: all(self.field_detected_objects),
        }))
    }

    /// 影子行数量
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(id: u64, description: &str) -> FullTextEntry {
        FullTextEntry {
            media_id: id,
            path: format!("/photos/img_{}.jpg", id),
            description: description.to_string(),
            tags: vec!["Beach".to_string(), "sunset".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_replace_and_search() {
        let dir = tempdir().unwrap();
        let index = FullTextIndex::open(dir.path(), 15_000_000).unwrap();

        index.replace(&entry(1, "A Sunset over the ocean")).unwrap();
        index.replace(&entry(2, "city skyline at night")).unwrap();

        assert_eq!(index.search_ids("sunset").unwrap(), HashSet::from([1]));
        assert_eq!(index.search_ids("beach").unwrap(), HashSet::from([1, 2]));
        assert_eq!(index.search_ids("ocean night").unwrap(), HashSet::new());

        // 替换而不是追加
        index.replace(&entry(1, "mountain lake")).unwrap();
        assert_eq!(index.num_docs(), 2);
        assert!(index.search_ids("sunset").unwrap().is_empty());
        assert_eq!(index.entry(1).unwrap().unwrap().description, "mountain lake");
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let index = FullTextIndex::open(dir.path(), 15_000_000).unwrap();

        index.replace(&entry(5, "forest trail")).unwrap();
        index.delete(5).unwrap();

        assert_eq!(index.num_docs(), 0);
        assert!(index.entry(5).unwrap().is_none());
        assert!(index.search_ids("forest").unwrap().is_empty());
    }
}
