// identity.rs - 内容指纹
//! 流式计算文件的 SHA-256 指纹，并读取基本的 stat 元数据。
//! 指纹只取决于文件字节，与路径无关。

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// 每次读取的块大小
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("无法读取文件 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// 文件 stat 信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// 指纹 + stat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub content_hash: String,
    pub stat: FileStat,
}

/// 读取文件 stat
pub fn stat_file(path: &Path) -> IdentityResult<FileStat> {
    let metadata = std::fs::metadata(path).map_err(|source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let modified = metadata.modified().map_err(|source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    // 部分文件系统不支持创建时间，退回到修改时间
    let created = metadata.created().unwrap_or(modified);

    Ok(FileStat {
        size: metadata.len(),
        modified_at: DateTime::<Utc>::from(modified),
        created_at: DateTime::<Utc>::from(created),
    })
}

/// 流式计算文件内容的 SHA-256，返回 64 位小写十六进制
pub fn hash_file(path: &Path) -> IdentityResult<String> {
    let io_err = |source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut reader = BufReader::with_capacity(HASH_CHUNK_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// 同时计算指纹与 stat
pub fn identify(path: &Path) -> IdentityResult<FileIdentity> {
    let stat = stat_file(path)?;
    let content_hash = hash_file(path)?;
    Ok(FileIdentity { content_hash, stat })
}

/// 对内存中的字节计算指纹（与 `hash_file` 结果一致）
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
