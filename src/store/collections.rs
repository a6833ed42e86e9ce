// store/collections.rs - 媒体集合
//! 集合保存在 `collections` 树（id → Collection），成员保存在
//! `collection_items` 树（collection ‖ media → 加入时间，毫秒）。
//! 同一媒体在同一集合中只出现一次，重复加入会被忽略。

use chrono::{DateTime, Utc};
use sled::{Batch, Db, Tree};

use super::{decode_id, id_key, pair_key, StoreError, StoreResult};
use crate::models::Collection;

pub struct CollectionIndex {
    db: Db,
    /// id → Collection
    collections: Tree,
    /// collection ‖ media → added_at (i64 毫秒)
    items: Tree,
}

impl CollectionIndex {
    pub fn open(db: &Db) -> StoreResult<Self> {
        Ok(Self {
            db: db.clone(),
            collections: db.open_tree("collections")?,
            items: db.open_tree("collection_items")?,
        })
    }

    pub fn create(&self, name: &str, description: Option<&str>) -> StoreResult<Collection> {
        let now = Utc::now();
        let collection = Collection {
            id: self.db.generate_id()? + 1,
            name: name.trim().to_string(),
            description: description.map(str::trim).filter(|d| !d.is_empty()).map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        self.collections
            .insert(id_key(collection.id), bincode::serialize(&collection)?)?;
        Ok(collection)
    }

    pub fn get(&self, id: u64) -> StoreResult<Option<Collection>> {
        match self.collections.get(id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 加入媒体，返回实际新增的数量
    pub fn add(&self, collection_id: u64, media_ids: &[u64]) -> StoreResult<usize> {
        let mut collection = self
            .get(collection_id)?
            .ok_or_else(|| StoreError::NotFound(format!("collection {}", collection_id)))?;

        let now = Utc::now();
        let added_at = now.timestamp_millis().to_be_bytes();
        let mut batch = Batch::default();
        let mut added = 0;
        let mut seen = std::collections::HashSet::new();
        for &media_id in media_ids {
            let key = pair_key(collection_id, media_id);
            if !seen.insert(media_id) || self.items.contains_key(key)? {
                continue;
            }
            batch.insert(&key[..], &added_at[..]);
            added += 1;
        }

        if added > 0 {
            self.items.apply_batch(batch)?;
            collection.updated_at = now;
            self.collections
                .insert(id_key(collection_id), bincode::serialize(&collection)?)?;
        }
        Ok(added)
    }

    /// 集合成员，最近加入的在前
    pub fn items(&self, collection_id: u64) -> StoreResult<Vec<(u64, DateTime<Utc>)>> {
        let mut items = Vec::new();
        for item in self.items.scan_prefix(id_key(collection_id)) {
            let (key, value) = item?;
            let Some(media_id) = decode_id(&key[8..]) else {
                continue;
            };
            let added_at = <[u8; 8]>::try_from(value.as_ref())
                .ok()
                .map(i64::from_be_bytes)
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            items.push((media_id, added_at));
        }
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(items)
    }

    pub fn count(&self, collection_id: u64) -> usize {
        self.items.scan_prefix(id_key(collection_id)).count()
    }

    /// 全部集合及成员数，最近更新的在前
    pub fn list(&self) -> StoreResult<Vec<(Collection, usize)>> {
        let mut collections = Vec::new();
        for item in self.collections.iter() {
            let (_, bytes) = item?;
            let collection: Collection = bincode::deserialize(&bytes)?;
            let count = self.count(collection.id);
            collections.push((collection, count));
        }
        collections.sort_by(|a, b| b.0.updated_at.cmp(&a.0.updated_at).then_with(|| b.0.id.cmp(&a.0.id)));
        Ok(collections)
    }

    /// 记录被删除后，从所有集合中移除它
    pub fn remove_media(&self, media_id: u64) -> StoreResult<()> {
        let mut batch = Batch::default();
        for key in self.collections.iter().keys() {
            let key = key?;
            if let Some(collection_id) = decode_id(&key) {
                batch.remove(&pair_key(collection_id, media_id)[..]);
            }
        }
        self.items.apply_batch(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_add_ignores_duplicates() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let index = CollectionIndex::open(&db).unwrap();

        let trip = index.create(" Summer trip ", Some("  ")).unwrap();
        assert_eq!(trip.name, "Summer trip");
        assert!(trip.description.is_none());
        assert!(trip.id > 0);

        assert_eq!(index.add(trip.id, &[3, 5, 3]).unwrap(), 2);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(index.add(trip.id, &[5, 8]).unwrap(), 1);
        assert_eq!(index.count(trip.id), 3);

        let ids: Vec<u64> = index.items(trip.id).unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids.len(), 3);
        // 最后一次加入的 8 排在最前
        assert_eq!(ids[0], 8);

        assert!(matches!(index.add(9999, &[1]), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_list_and_remove_media() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let index = CollectionIndex::open(&db).unwrap();

        let a = index.create("a", None).unwrap();
        let b = index.create("b", Some("second")).unwrap();
        index.add(a.id, &[1, 2]).unwrap();
        index.add(b.id, &[2]).unwrap();

        let list = index.list().unwrap();
        assert_eq!(list.len(), 2);
        // b 最后更新
        assert_eq!(list[0].0.name, "b");
        assert_eq!(list[0].1, 1);
        assert_eq!(list[1].1, 2);

        index.remove_media(2).unwrap();
        assert_eq!(index.count(a.id), 1);
        assert_eq!(index.count(b.id), 0);
        assert_eq!(index.get(b.id).unwrap().unwrap().description.as_deref(), Some("second"));
    }
}
