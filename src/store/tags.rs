// store/tags.rs - 规范化标签索引
//! 标签名唯一（去空白 + 小写），使用计数只增不减；
//! 媒体与标签的关联按 (media, tag) 唯一，双向各存一份以便按任一方前缀扫描。

use std::collections::{BTreeSet, HashSet};

use sled::{Batch, Db, Tree};

use super::{decode_id, id_key, pair_key, StoreResult, EMPTY};
use crate::models::{MediaTagLink, Tag};

/// 新关联的默认置信度
pub const DEFAULT_CONFIDENCE: f32 = 1.0;

pub struct TagIndex {
    db: Db,
    /// name → Tag
    tags: Tree,
    /// media ‖ tag → confidence
    media_tags: Tree,
    /// tag ‖ media → ∅
    tag_media: Tree,
}

impl TagIndex {
    pub fn open(db: &Db) -> StoreResult<Self> {
        Ok(Self {
            db: db.clone(),
            tags: db.open_tree("tags")?,
            media_tags: db.open_tree("media_tags")?,
            tag_media: db.open_tree("tag_media")?,
        })
    }

    pub fn get(&self, name: &str) -> StoreResult<Option<Tag>> {
        let Some(name) = Tag::normalize(name) else {
            return Ok(None);
        };
        match self.tags.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 查找或创建标签，并把使用计数加一
    fn touch(&self, name: &str) -> StoreResult<Tag> {
        let tag = match self.tags.get(name.as_bytes())? {
            Some(bytes) => {
                let mut tag: Tag = bincode::deserialize(&bytes)?;
                tag.usage_count += 1;
                tag
            }
            None => Tag {
                id: self.db.generate_id()? + 1,
                name: name.to_string(),
                usage_count: 1,
            },
        };
        self.tags.insert(name.as_bytes(), bincode::serialize(&tag)?)?;
        Ok(tag)
    }

    /// 用给定标签列表替换该媒体的全部关联（先删后插）
    pub fn replace_links(&self, media_id: u64, names: &[String]) -> StoreResult<()> {
        let (mut forward, mut backward) = self.unlink_batches(media_id)?;

        // 同一条记录内重复的标签只关联一次
        let names: BTreeSet<String> = names.iter().filter_map(|n| Tag::normalize(n)).collect();
        for name in &names {
            let tag = self.touch(name)?;
            forward.insert(&pair_key(media_id, tag.id)[..], &DEFAULT_CONFIDENCE.to_be_bytes()[..]);
            backward.insert(&pair_key(tag.id, media_id)[..], EMPTY);
        }

        self.media_tags.apply_batch(forward)?;
        self.tag_media.apply_batch(backward)?;
        Ok(())
    }

    /// 删除该媒体的全部关联，标签本身与计数保留
    pub fn remove_links(&self, media_id: u64) -> StoreResult<()> {
        let (forward, backward) = self.unlink_batches(media_id)?;
        self.media_tags.apply_batch(forward)?;
        self.tag_media.apply_batch(backward)?;
        Ok(())
    }

    fn unlink_batches(&self, media_id: u64) -> StoreResult<(Batch, Batch)> {
        let mut forward = Batch::default();
        let mut backward = Batch::default();
        for link in self.links_for(media_id)? {
            forward.remove(&pair_key(media_id, link.tag_id)[..]);
            backward.remove(&pair_key(link.tag_id, media_id)[..]);
        }
        Ok((forward, backward))
    }

    /// 该媒体的全部关联
    pub fn links_for(&self, media_id: u64) -> StoreResult<Vec<MediaTagLink>> {
        let mut links = Vec::new();
        for item in self.media_tags.scan_prefix(id_key(media_id)) {
            let (key, value) = item?;
            let Some(tag_id) = decode_id(&key[8..]) else {
                continue;
            };
            let confidence = <[u8; 4]>::try_from(value.as_ref())
                .map(f32::from_be_bytes)
                .unwrap_or(DEFAULT_CONFIDENCE);
            links.push(MediaTagLink {
                media_id,
                tag_id,
                confidence,
            });
        }
        Ok(links)
    }

    fn media_for_tag(&self, tag_id: u64) -> StoreResult<HashSet<u64>> {
        let mut ids = HashSet::new();
        for item in self.tag_media.scan_prefix(id_key(tag_id)) {
            let (key, _) = item?;
            if let Some(media_id) = decode_id(&key[8..]) {
                ids.insert(media_id);
            }
        }
        Ok(ids)
    }

    /// 同时带有全部给定标签的媒体 id
    pub fn media_with_all(&self, names: &[String]) -> StoreResult<HashSet<u64>> {
        let mut result: Option<HashSet<u64>> = None;
        for name in names {
            let Some(tag) = self.get(name)? else {
                return Ok(HashSet::new());
            };
            let ids = self.media_for_tag(tag.id)?;
            result = Some(match result {
                Some(acc) => acc.intersection(&ids).copied().collect(),
                None => ids,
            });
            if result.as_ref().is_some_and(|r| r.is_empty()) {
                break;
            }
        }
        Ok(result.unwrap_or_default())
    }

    /// 按使用次数排序的前 n 个标签
    pub fn top_tags(&self, n: usize) -> StoreResult<Vec<Tag>> {
        let mut tags = Vec::new();
        for item in self.tags.iter() {
            let (_, bytes) = item?;
            tags.push(bincode::deserialize::<Tag>(&bytes)?);
        }
        tags.sort_by(|a, b| b.usage_count.cmp(&a.usage_count).then_with(|| a.name.cmp(&b.name)));
        tags.truncate(n);
        Ok(tags)
    }
}
