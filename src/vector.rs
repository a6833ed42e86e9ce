// vector.rs - 语义向量索引
//! 只追加的平铺向量索引：每次 append 占用下一个序号，从不替换或删除。
//! 记录被删除后其向量仍会留在索引中，检索结果需要调用方回查记录。

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::store::StoreResult;

/// 向量条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub sequence_index: u64,
    pub media_id: u64,
    pub path: String,
    pub source_text: String,
    /// 已做 L2 归一化
    pub embedding: Vec<f32>,
}

/// 一条检索命中
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub sequence_index: u64,
    pub media_id: u64,
    pub path: String,
    pub score: f32,
}

/// 只追加的向量索引
pub struct VectorIndex {
    db: Db,
    /// sequence → VectorEntry
    vectors: Tree,
}

impl VectorIndex {
    pub fn open(db: &Db) -> StoreResult<Self> {
        Ok(Self {
            db: db.clone(),
            vectors: db.open_tree("vectors")?,
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// 下一个序号
    fn next_sequence(&self) -> StoreResult<u64> {
        Ok(match self.vectors.last()? {
            Some((key, _)) => <[u8; 8]>::try_from(key.as_ref())
                .map(u64::from_be_bytes)
                .map(|seq| seq + 1)
                .unwrap_or(0),
            None => 0,
        })
    }

    /// 追加一条向量，返回其序号；不做任何去重
    pub fn append(&self, media_id: u64, path: &str, text: &str, embedding: &[f32]) -> StoreResult<u64> {
        let sequence_index = self.next_sequence()?;
        let entry = VectorEntry {
            sequence_index,
            media_id,
            path: path.to_string(),
            source_text: text.to_string(),
            embedding: normalize(embedding),
        };

        self.vectors
            .insert(sequence_index.to_be_bytes(), bincode::serialize(&entry)?)?;
        self.db.flush()?;
        tracing::debug!(sequence_index, media_id, path, "向量已追加");
        Ok(sequence_index)
    }

    pub fn entry(&self, sequence_index: u64) -> StoreResult<Option<VectorEntry>> {
        match self.vectors.get(sequence_index.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 对全部历史条目做内积打分，按得分从高到低返回前 `limit` 个
    pub fn search(&self, query: &[f32], limit: usize) -> StoreResult<Vec<VectorHit>> {
        let query = normalize(query);
        let mut hits = Vec::new();

        for item in self.vectors.iter() {
            let (_, bytes) = item?;
            let entry: VectorEntry = bincode::deserialize(&bytes)?;
            if entry.embedding.len() != query.len() {
                tracing::debug!(
                    sequence_index = entry.sequence_index,
                    expected = query.len(),
                    actual = entry.embedding.len(),
                    "向量维度不一致，跳过"
                );
                continue;
            }
            hits.push(VectorHit {
                sequence_index: entry.sequence_index,
                media_id: entry.media_id,
                path: entry.path,
                score: dot(&query, &entry.embedding),
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.sequence_index.cmp(&b.sequence_index))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

/// L2 归一化；零向量原样返回
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
