// store/mod.rs - 元数据存储
//! 规范记录表（sled）+ 全文影子索引（tantivy）+ 规范化标签索引。
//!
//! 写入顺序：规范行（单个多树事务）→ 影子行 → 标签关联。
//! 影子行写入失败会把规范行回滚到写入前的状态，因此成功返回时两者一致；
//! 标签写入失败只记录警告，记录本身保留。
//! 所有写操作要求单一写入者顺序调用。

pub mod fields;
mod collections;
mod fulltext;
mod tags;

pub use collections::CollectionIndex;
pub use fulltext::{FullTextEntry, FullTextIndex};
pub use tags::{TagIndex, DEFAULT_CONFIDENCE};

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};

use crate::detect::KnownFile;
use crate::models::{Collection, MediaKind, MediaRecord, MediaTagLink, Tag};
use crate::query::{MediaQuery, RecordFilter};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("存储引擎错误: {0}")]
    Sled(#[from] sled::Error),

    #[error("全文索引错误: {0}")]
    FullText(#[from] tantivy::TantivyError),

    #[error("记录编码错误: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("目标路径已存在记录: {0}")]
    PathConflict(String),

    #[error("路径没有对应的记录: {0}")]
    NotFound(String),

    #[error("写事务被中止")]
    Aborted,

    #[error("全文写入器锁已损坏")]
    Poisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============== 键编码 ==============

pub(crate) const EMPTY: &[u8] = &[];

pub(crate) fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

pub(crate) fn pair_key(a: u64, b: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&a.to_be_bytes());
    key[8..].copy_from_slice(&b.to_be_bytes());
    key
}

pub(crate) fn decode_id(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes)
}

/// hash ‖ id，同一内容的多条记录共享前缀
fn hash_key(content_hash: &str, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(content_hash.len() + 8);
    key.extend_from_slice(content_hash.as_bytes());
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn transaction_error(e: TransactionError<()>) -> StoreError {
    match e {
        TransactionError::Storage(e) => StoreError::Sled(e),
        TransactionError::Abort(()) => StoreError::Aborted,
    }
}

/// 元数据存储
pub struct MetadataStore {
    db: Db,
    /// id → MediaRecord
    records: Tree,
    /// path → id
    paths: Tree,
    /// hash ‖ id → ∅
    hashes: Tree,
    tags: TagIndex,
    collections: CollectionIndex,
    fulltext: FullTextIndex,
}

impl MetadataStore {
    /// 打开或创建存储目录
    pub fn open(storage_dir: &Path, writer_memory: usize) -> StoreResult<Self> {
        std::fs::create_dir_all(storage_dir)?;
        let db = sled::open(storage_dir.join("records"))?;
        let fulltext = FullTextIndex::open(&storage_dir.join("fulltext"), writer_memory)?;

        let store = Self {
            records: db.open_tree("records")?,
            paths: db.open_tree("paths")?,
            hashes: db.open_tree("hashes")?,
            tags: TagIndex::open(&db)?,
            collections: CollectionIndex::open(&db)?,
            fulltext,
            db,
        };
        tracing::info!(
            path = %storage_dir.display(),
            records = store.len(),
            "元数据存储已打开"
        );
        Ok(store)
    }

    /// 底层数据库句柄（向量索引共用）
    pub fn db(&self) -> &Db {
        &self.db
    }

    // ============== 读取 ==============

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: u64) -> StoreResult<Option<MediaRecord>> {
        match self.records.get(id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_by_path(&self, path: &str) -> StoreResult<Option<MediaRecord>> {
        match self.paths.get(path.as_bytes())?.and_then(|v| decode_id(&v)) {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    /// 任一路径下是否已有该内容指纹的记录
    pub fn exists(&self, content_hash: &str) -> StoreResult<bool> {
        match self.hashes.scan_prefix(content_hash.as_bytes()).next() {
            Some(item) => {
                item?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 按 id 顺序遍历全部记录
    pub fn iter(&self) -> impl Iterator<Item = StoreResult<MediaRecord>> + '_ {
        self.records.iter().values().map(|item| -> StoreResult<MediaRecord> {
            let bytes = item?;
            Ok(bincode::deserialize(&bytes)?)
        })
    }

    /// 变更检测所需的 path → KnownFile 快照
    pub fn known_files(&self) -> StoreResult<BTreeMap<String, KnownFile>> {
        let mut known = BTreeMap::new();
        for record in self.iter() {
            let record = record?;
            known.insert(
                record.path.clone(),
                KnownFile {
                    id: record.id,
                    content_hash: record.content_hash,
                    size: record.size,
                    modified_at: record.modified_at,
                },
            );
        }
        Ok(known)
    }

    pub fn fulltext_entry(&self, id: u64) -> StoreResult<Option<FullTextEntry>> {
        self.fulltext.entry(id)
    }

    pub fn tag(&self, name: &str) -> StoreResult<Option<Tag>> {
        self.tags.get(name)
    }

    pub fn tag_links(&self, media_id: u64) -> StoreResult<Vec<MediaTagLink>> {
        self.tags.links_for(media_id)
    }

    pub fn top_tags(&self, n: usize) -> StoreResult<Vec<Tag>> {
        self.tags.top_tags(n)
    }

    /// 各媒体类型的记录数
    pub fn count_by_kind(&self) -> StoreResult<Vec<(MediaKind, usize)>> {
        let mut counts = [0usize; 3];
        for record in self.iter() {
            let slot = match record?.kind {
                MediaKind::Image => 0,
                MediaKind::Video => 1,
                MediaKind::Document => 2,
            };
            counts[slot] += 1;
        }
        Ok(vec![
            (MediaKind::Image, counts[0]),
            (MediaKind::Video, counts[1]),
            (MediaKind::Document, counts[2]),
        ])
    }

    // ============== 写入 ==============

    /// 把 `record` 写入规范表，同时清理 `previous` 留下的路径和指纹索引行
    fn write_canonical(&self, previous: Option<&MediaRecord>, record: &MediaRecord) -> StoreResult<()> {
        let bytes = bincode::serialize(record)?;
        let key = id_key(record.id);
        let new_hash_key = hash_key(&record.content_hash, record.id);
        let old_keys = previous.map(|p| (p.path.clone(), hash_key(&p.content_hash, p.id)));

        (&self.records, &self.paths, &self.hashes)
            .transaction(|(records, paths, hashes)| {
                if let Some((old_path, old_hash_key)) = &old_keys {
                    if *old_path != record.path {
                        paths.remove(old_path.as_bytes())?;
                    }
                    hashes.remove(old_hash_key.as_slice())?;
                }
                records.insert(&key[..], bytes.as_slice())?;
                paths.insert(record.path.as_bytes(), &key[..])?;
                hashes.insert(new_hash_key.as_slice(), EMPTY)?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(transaction_error)
    }

    fn delete_canonical(&self, record: &MediaRecord) -> StoreResult<()> {
        let key = id_key(record.id);
        let old_hash_key = hash_key(&record.content_hash, record.id);

        (&self.records, &self.paths, &self.hashes)
            .transaction(|(records, paths, hashes)| {
                records.remove(&key[..])?;
                paths.remove(record.path.as_bytes())?;
                hashes.remove(old_hash_key.as_slice())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(transaction_error)
    }

    /// 影子行写入失败后，把规范行恢复到 `previous`（或删除新插入的行）
    fn restore_canonical(&self, current: &MediaRecord, previous: Option<&MediaRecord>) {
        let result = match previous {
            Some(prev) => self.write_canonical(Some(current), prev),
            None => self.delete_canonical(current),
        };
        if let Err(e) = result {
            tracing::error!(path = %current.path, error = %e, "回滚规范记录失败");
        }
    }

    /// 插入或更新一条记录，返回其 id
    ///
    /// 路径已存在时原地更新并保留 id；否则分配新 id。
    pub fn upsert(&self, mut record: MediaRecord) -> StoreResult<u64> {
        let previous = self.get_by_path(&record.path)?;
        record.id = match &previous {
            Some(prev) => prev.id,
            // generate_id 从 0 开始，0 保留给未分配
            None => self.db.generate_id()? + 1,
        };

        self.write_canonical(previous.as_ref(), &record)?;

        if let Err(e) = self.fulltext.replace(&FullTextEntry::from_record(&record)) {
            self.restore_canonical(&record, previous.as_ref());
            return Err(e);
        }

        if let Err(e) = self.tags.replace_links(record.id, &record.tags) {
            tracing::warn!(path = %record.path, error = %e, "写入标签关联失败，记录已保存");
        }

        self.db.flush()?;
        tracing::debug!(id = record.id, path = %record.path, updated = previous.is_some(), "记录已写入");
        Ok(record.id)
    }

    /// 删除记录及其影子行和标签关联；向量索引不受影响
    ///
    /// 返回是否确实删除了记录。
    pub fn remove(&self, path: &str) -> StoreResult<bool> {
        let Some(record) = self.get_by_path(path)? else {
            return Ok(false);
        };

        self.fulltext.delete(record.id)?;
        if let Err(e) = self.delete_canonical(&record) {
            // 规范行仍在，把影子行补回去
            if let Err(restore) = self.fulltext.replace(&FullTextEntry::from_record(&record)) {
                tracing::error!(path, error = %restore, "恢复全文影子行失败");
            }
            return Err(e);
        }

        if let Err(e) = self.tags.remove_links(record.id) {
            tracing::warn!(path, error = %e, "删除标签关联失败");
        }
        if let Err(e) = self.collections.remove_media(record.id) {
            tracing::warn!(path, error = %e, "从集合中移除记录失败");
        }

        self.db.flush()?;
        tracing::debug!(id = record.id, path, "记录已删除");
        Ok(true)
    }

    /// 只修改记录的路径；标注字段、内容指纹与 id 保持不变
    pub fn rekey(&self, old_path: &str, new_path: &str) -> StoreResult<u64> {
        let Some(previous) = self.get_by_path(old_path)? else {
            return Err(StoreError::NotFound(old_path.to_string()));
        };
        if old_path == new_path {
            return Ok(previous.id);
        }
        if self.paths.contains_key(new_path.as_bytes())? {
            return Err(StoreError::PathConflict(new_path.to_string()));
        }

        let mut record = previous.clone();
        record.path = new_path.to_string();
        self.write_canonical(Some(&previous), &record)?;

        // 影子行除 path 外原样保留
        let entry = match self.fulltext.entry(record.id) {
            Ok(Some(mut entry)) => {
                entry.path = record.path.clone();
                entry
            }
            Ok(None) => FullTextEntry::from_record(&record),
            Err(e) => {
                self.restore_canonical(&record, Some(&previous));
                return Err(e);
            }
        };
        if let Err(e) = self.fulltext.replace(&entry) {
            self.restore_canonical(&record, Some(&previous));
            return Err(e);
        }

        self.db.flush()?;
        tracing::debug!(id = record.id, from = old_path, to = new_path, "记录已移动");
        Ok(record.id)
    }

    // ============== 集合 ==============

    pub fn create_collection(&self, name: &str, description: Option<&str>) -> StoreResult<Collection> {
        let collection = self.collections.create(name, description)?;
        self.db.flush()?;
        tracing::debug!(id = collection.id, name = %collection.name, "集合已创建");
        Ok(collection)
    }

    /// 把已存在的记录加入集合，不存在的 id 被忽略；返回新增数量
    pub fn add_to_collection(&self, collection_id: u64, media_ids: &[u64]) -> StoreResult<usize> {
        let mut existing = Vec::with_capacity(media_ids.len());
        for &id in media_ids {
            if self.records.contains_key(id_key(id))? {
                existing.push(id);
            } else {
                tracing::warn!(collection_id, media_id = id, "记录不存在，未加入集合");
            }
        }
        let added = self.collections.add(collection_id, &existing)?;
        self.db.flush()?;
        Ok(added)
    }

    pub fn collection(&self, id: u64) -> StoreResult<Option<Collection>> {
        self.collections.get(id)
    }

    /// 全部集合及成员数
    pub fn collections(&self) -> StoreResult<Vec<(Collection, usize)>> {
        self.collections.list()
    }

    /// 集合中的记录，最近加入的在前
    pub fn collection_records(&self, collection_id: u64) -> StoreResult<Vec<MediaRecord>> {
        let mut records = Vec::new();
        for (media_id, _) in self.collections.items(collection_id)? {
            if let Some(record) = self.get(media_id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    // ============== 查询 ==============

    /// 条件之间为 AND；结果按创建时间从新到旧排序，最多 `limit` 条
    pub fn query(&self, query: &MediaQuery) -> StoreResult<Vec<MediaRecord>> {
        let mut candidates: Option<HashSet<u64>> = None;

        if let Some(text) = query.free_text() {
            candidates = Some(self.fulltext.search_ids(text)?);
        }
        if !query.tags.is_empty() {
            let tagged = self.tags.media_with_all(&query.tags)?;
            candidates = Some(match candidates {
                Some(ids) => ids.intersection(&tagged).copied().collect(),
                None => tagged,
            });
        }

        let filter = RecordFilter::new(query);
        let mut results = Vec::new();
        match candidates {
            Some(ids) => {
                for id in ids {
                    // 影子行可能短暂领先于规范行，找不到就跳过
                    if let Some(record) = self.get(id)? {
                        if filter.matches(&record) {
                            results.push(record);
                        }
                    }
                }
            }
            None => {
                for record in self.iter() {
                    let record = record?;
                    if filter.matches(&record) {
                        results.push(record);
                    }
                }
            }
        }

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        results.truncate(query.limit);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn record(path: &str, hash_byte: u8, day: u32) -> MediaRecord {
        let created = Utc.with_ymd_and_hms(2024, 5, day, 8, 0, 0).unwrap();
        MediaRecord {
            id: 0,
            path: path.to_string(),
            content_hash: format!("{:02x}", hash_byte).repeat(32),
            size: 100,
            mime_type: "image/jpeg".to_string(),
            kind: MediaKind::Image,
            created_at: created,
            modified_at: created,
            indexed_at: created,
            dimensions: None,
            description: Some(format!("photo of {}", path)),
            scene_type: None,
            extracted_text: None,
            tags: vec!["Holiday".to_string()],
            detected_objects: vec![],
            technical: None,
        }
    }

    fn open(dir: &Path) -> MetadataStore {
        MetadataStore::open(dir, 15_000_000).unwrap()
    }

    #[test]
    fn test_upsert_preserves_id() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let id = store.upsert(record("/m/a.jpg", 1, 1)).unwrap();
        assert!(id > 0);
        assert!(store.exists(&"01".repeat(32)).unwrap());

        let mut updated = record("/m/a.jpg", 2, 1);
        updated.description = Some("a red kite".to_string());
        assert_eq!(store.upsert(updated).unwrap(), id);

        assert_eq!(store.len(), 1);
        assert!(!store.exists(&"01".repeat(32)).unwrap());
        assert!(store.exists(&"02".repeat(32)).unwrap());
        assert_eq!(store.fulltext_entry(id).unwrap().unwrap().description, "a red kite");
        assert_eq!(store.tag("holiday").unwrap().unwrap().usage_count, 2);
    }

    #[test]
    fn test_duplicate_content_under_two_paths() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let a = store.upsert(record("/m/a.jpg", 9, 1)).unwrap();
        let b = store.upsert(record("/m/b.jpg", 9, 2)).unwrap();
        assert_ne!(a, b);

        store.remove("/m/a.jpg").unwrap();
        // 另一条记录仍然持有该指纹
        assert!(store.exists(&"09".repeat(32)).unwrap());
    }

    #[test]
    fn test_collections_follow_records() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let a = store.upsert(record("/m/a.jpg", 1, 1)).unwrap();
        let b = store.upsert(record("/m/b.jpg", 2, 2)).unwrap();
        let trip = store.create_collection("trip", Some("june")).unwrap();

        // 不存在的记录 id 被忽略
        assert_eq!(store.add_to_collection(trip.id, &[a, b, 4242]).unwrap(), 2);
        assert!(store.add_to_collection(trip.id + 100, &[a]).is_err());

        // 移动后成员关系不变
        store.rekey("/m/a.jpg", "/m/trips/a.jpg").unwrap();
        let paths: Vec<String> = store.collection_records(trip.id).unwrap().into_iter().map(|r| r.path).collect();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&"/m/trips/a.jpg".to_string()));

        store.remove("/m/b.jpg").unwrap();
        let list = store.collections().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].0.name, "trip");
        assert_eq!(list[0].1, 1);
    }

    #[test]
    fn test_remove_clears_shadow_and_tags() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let id = store.upsert(record("/m/a.jpg", 1, 1)).unwrap();
        assert!(store.remove("/m/a.jpg").unwrap());
        assert!(!store.remove("/m/a.jpg").unwrap());

        assert!(store.get(id).unwrap().is_none());
        assert!(store.fulltext_entry(id).unwrap().is_none());
        assert!(store.tag_links(id).unwrap().is_empty());
        assert!(!store.exists(&"01".repeat(32)).unwrap());
        assert!(store.query(&MediaQuery::new().text("photo")).unwrap().is_empty());
    }

    #[test]
    fn test_rekey_updates_path_only() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let id = store.upsert(record("/m/a.jpg", 1, 1)).unwrap();
        let before = store.get(id).unwrap().unwrap();

        assert_eq!(store.rekey("/m/a.jpg", "/m/sub/a.jpg").unwrap(), id);

        let after = store.get_by_path("/m/sub/a.jpg").unwrap().unwrap();
        assert_eq!(after.id, id);
        assert_eq!(after.description, before.description);
        assert_eq!(after.tags, before.tags);
        assert_eq!(after.indexed_at, before.indexed_at);
        assert!(store.get_by_path("/m/a.jpg").unwrap().is_none());

        let entry = store.fulltext_entry(id).unwrap().unwrap();
        assert_eq!(entry.path, "/m/sub/a.jpg");
        assert_eq!(entry.description, "photo of /m/a.jpg");
    }

    #[test]
    fn test_rekey_errors() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        store.upsert(record("/m/a.jpg", 1, 1)).unwrap();
        store.upsert(record("/m/b.jpg", 2, 1)).unwrap();

        assert!(matches!(store.rekey("/m/none.jpg", "/m/c.jpg"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.rekey("/m/a.jpg", "/m/b.jpg"), Err(StoreError::PathConflict(_))));
    }

    #[test]
    fn test_query_filters_and_order() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let mut beach = record("/m/beach.jpg", 1, 3);
        beach.tags = vec!["beach".to_string(), "sunset".to_string()];
        beach.scene_type = Some("Outdoor".to_string());
        let mut city = record("/m/city.jpg", 2, 5);
        city.tags = vec!["sunset".to_string()];
        let mut notes = record("/m/notes.txt", 3, 4);
        notes.kind = MediaKind::Document;
        notes.mime_type = "text/plain".to_string();
        notes.description = Some("travel notes about the beach".to_string());

        let beach_id = store.upsert(beach).unwrap();
        let city_id = store.upsert(city).unwrap();
        let notes_id = store.upsert(notes).unwrap();

        let ids = |q: MediaQuery| -> Vec<u64> { store.query(&q).unwrap().iter().map(|r| r.id).collect() };

        // 最新的在前
        assert_eq!(ids(MediaQuery::new()), vec![city_id, notes_id, beach_id]);
        assert_eq!(ids(MediaQuery::new().limit(1)), vec![city_id]);
        assert_eq!(ids(MediaQuery::new().tag("sunset")), vec![city_id, beach_id]);
        assert_eq!(ids(MediaQuery::new().tag("Sunset").tag("beach")), vec![beach_id]);
        assert_eq!(ids(MediaQuery::new().tag("sunset").tag("missing")), Vec::<u64>::new());
        assert_eq!(ids(MediaQuery::new().kind(MediaKind::Document)), vec![notes_id]);
        assert_eq!(ids(MediaQuery::new().mime_prefix("image/")), vec![city_id, beach_id]);
        assert_eq!(ids(MediaQuery::new().scene_type("outdoor")), vec![beach_id]);
        assert_eq!(ids(MediaQuery::new().text("travel")), vec![notes_id]);
        assert_eq!(ids(MediaQuery::new().text("travel").kind(MediaKind::Image)), Vec::<u64>::new());
    }

    #[test]
    fn test_known_files_snapshot() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let id = store.upsert(record("/m/a.jpg", 1, 1)).unwrap();

        let known = store.known_files().unwrap();
        assert_eq!(known.len(), 1);
        assert_eq!(known["/m/a.jpg"].id, id);
        assert_eq!(known["/m/a.jpg"].content_hash, "01".repeat(32));
    }

    #[test]
    fn test_reopen_keeps_records() {
        let dir = tempdir().unwrap();
        let id = {
            let store = open(dir.path());
            store.upsert(record("/m/a.jpg", 1, 1)).unwrap()
        };
        let store = open(dir.path());
        assert_eq!(store.get(id).unwrap().unwrap().path, "/m/a.jpg");
        assert_eq!(store.query(&MediaQuery::new().text("photo")).unwrap().len(), 1);
    }
}
