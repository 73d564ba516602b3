use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::core::{Row, RowKey};
use crate::error::{IndexError, Result};

/// 快照文件 Header
const MAGIC: u32 = 0x5244_5801;
const VERSION_CURRENT: u32 = 1;
const STATE_COMMITTED: u32 = 0x0000_0001;
const STATE_INCOMPLETE: u32 = 0xFFFF_FFFF;
pub const HEADER_SIZE: usize = 4 + 4 + 4 + 8 + 8; // magic + version + state + data_len + checksum

/// 有序索引的持久化内容（只含已提交行）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub index_name: String,
    pub table: String,
    pub column_ids: Vec<usize>,
    pub sort_bits: Vec<u8>,
    /// 落盘时构建已完成；false 表示需要从断点继续重建
    pub complete: bool,
    pub last_indexed_row_key: Option<RowKey>,
    pub rows: Vec<Row>,
}

/// 原子快照存储（atomic replacement）
///
/// 落盘流程：
/// 1) 写 `*.tmp` 的 INCOMPLETE header（len/checksum 先置 0）
/// 2) `bincode::serialize_into` 流式写 body，边写边算 xxh3 / data_len
/// 3) seek 回开头覆盖 COMMITTED header
/// 4) fsync(tmpfile)
/// 5) rename(tmp, target) 原子替换
/// 6) fsync(dir)
///
/// 加载时校验 magic + version + state + data_len + checksum，任何不一致都拒绝（返回 None）。
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    path: PathBuf,
}

struct ChecksumWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: Xxh3,
    bytes: u64,
}

impl<'a, W: Write> ChecksumWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            hasher: Xxh3::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, u64) {
        (self.bytes, self.hasher.digest())
    }
}

impl<'a, W: Write> Write for ChecksumWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn encode_header(state: u32, data_len: u64, checksum: u64) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&VERSION_CURRENT.to_le_bytes());
    header[8..12].copy_from_slice(&state.to_le_bytes());
    header[12..20].copy_from_slice(&data_len.to_le_bytes());
    header[20..28].copy_from_slice(&checksum.to_le_bytes());
    header
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(b)
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<dir>/<table>.<index>.idx`
    pub fn for_index(dir: &Path, table: &str, index: &str) -> Self {
        Self::new(dir.join(format!("{}.{}.idx", table, index).to_lowercase()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn disk_size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// 加载快照；文件缺失或任何校验失败都返回 `Ok(None)`，仅读文件本身的 I/O 错误上抛
    pub fn load_if_valid(&self) -> Result<Option<IndexSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = fs::read(&self.path)?;
        if data.len() < HEADER_SIZE {
            tracing::warn!("Snapshot {} too small, ignoring", self.path.display());
            return Ok(None);
        }

        let magic = read_u32(&data, 0);
        let version = read_u32(&data, 4);
        let state = read_u32(&data, 8);
        let data_len = read_u64(&data, 12);
        let stored_checksum = read_u64(&data, 20);

        if magic != MAGIC {
            tracing::warn!("Snapshot magic mismatch: {:#x} != {:#x}", magic, MAGIC);
            return Ok(None);
        }
        if version != VERSION_CURRENT {
            tracing::warn!(
                "Snapshot version mismatch: {} != {}",
                version,
                VERSION_CURRENT
            );
            return Ok(None);
        }
        if state != STATE_COMMITTED {
            tracing::warn!("Snapshot state INCOMPLETE, ignoring");
            return Ok(None);
        }

        let body = &data[HEADER_SIZE..];
        if body.len() as u64 != data_len {
            tracing::warn!("Snapshot data length mismatch");
            return Ok(None);
        }

        let computed = xxhash_rust::xxh3::xxh3_64(body);
        if computed != stored_checksum {
            tracing::warn!(
                "Snapshot checksum mismatch: {:#x} != {:#x}",
                computed,
                stored_checksum
            );
            return Ok(None);
        }

        match bincode::deserialize::<IndexSnapshot>(body) {
            Ok(snap) => Ok(Some(snap)),
            Err(e) => {
                tracing::warn!("Snapshot deserialize failed: {}", e);
                Ok(None)
            }
        }
    }

    /// 原子写入快照，返回文件总字节数
    pub fn write_atomic(&self, snap: &IndexSnapshot) -> Result<u64> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("idx.tmp");

        let mut file = File::create(&tmp_path)?;
        file.write_all(&encode_header(STATE_INCOMPLETE, 0, 0))?;

        let (data_len, checksum) = {
            let mut cw = ChecksumWriter::new(&mut file);
            bincode::serialize_into(&mut cw, snap)?;
            cw.finish()
        };

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&encode_header(STATE_COMMITTED, data_len, checksum))?;

        file.sync_all()?;

        fs::rename(&tmp_path, &self.path)?;

        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        let total = HEADER_SIZE as u64 + data_len;
        tracing::info!(
            "Snapshot written: index {} rows {} bytes {}",
            snap.index_name,
            snap.rows.len(),
            total
        );
        Ok(total)
    }

    /// 删除快照文件；文件本就不存在不算错误
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IndexError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("rowdex-{}-{}", tag, nanos))
    }

    fn sample() -> IndexSnapshot {
        IndexSnapshot {
            index_name: "IDX_NAME".into(),
            table: "PUBLIC.T".into(),
            column_ids: vec![1],
            sort_bits: vec![0],
            complete: true,
            last_indexed_row_key: Some(RowKey(2)),
            rows: vec![
                Row::new(RowKey(1), vec![Value::Int(1), Value::from("a")]),
                Row::new(RowKey(2), vec![Value::Int(2), Value::Null]),
            ],
        }
    }

    #[test]
    fn write_then_load() {
        let dir = unique_tmp_dir("snap");
        let store = SnapshotStore::for_index(&dir, "T", "IDX_NAME");
        let size = store.write_atomic(&sample()).unwrap();
        assert_eq!(size, store.disk_size());
        assert!(!store.path().with_extension("idx.tmp").exists());

        let loaded = store.load_if_valid().unwrap().unwrap();
        assert_eq!(loaded.rows, sample().rows);
        assert_eq!(loaded.last_indexed_row_key, Some(RowKey(2)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupted_body_is_rejected() {
        let dir = unique_tmp_dir("snap-corrupt");
        let store = SnapshotStore::for_index(&dir, "T", "IDX_NAME");
        store.write_atomic(&sample()).unwrap();

        let mut bytes = std::fs::read(store.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(store.path(), &bytes).unwrap();

        assert!(store.load_if_valid().unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_loads_as_none_and_removes_cleanly() {
        let dir = unique_tmp_dir("snap-missing");
        let store = SnapshotStore::for_index(&dir, "T", "I");
        assert!(store.load_if_valid().unwrap().is_none());
        store.remove().unwrap();
        assert_eq!(store.disk_size(), 0);
    }
}
