use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::index::builder::BuildReport;
use crate::index::format::{self, IndexHeader};
use crate::index::hash::{decode_singleton, Bucket, RefHit, SeedHasher};
use crate::index::shape::{SeedCheck, SeedShape};
use crate::index::storage::{ArrayStorage, MemoryMode};
use crate::util::alphabet::Alphabet;

/// 一张已构建表的只读访问器。
///
/// 构建完成后只读，可在任意多个线程间共享（`&HashIndexReader` 是 `Sync`）；
/// 分页模式内部用互斥锁保护页缓存。
#[derive(Debug)]
pub struct HashIndexReader {
    dir: PathBuf,
    table: usize,
    mode: MemoryMode,
    header: IndexHeader,
    alphabet: Alphabet,
    hasher: SeedHasher,
    heads: ArrayStorage,
    data: ArrayStorage,
    report: Option<BuildReport>,
}

impl HashIndexReader {
    pub fn open(dir: &Path, table: usize, mode: MemoryMode) -> Result<Self> {
        let header = IndexHeader::load(&format::header_path(dir, table))?;
        let alphabet = header.alphabet()?;
        let hasher = header.hasher();

        let heads = ArrayStorage::open(&format::heads_path(dir, table), mode)?;
        let expected = header.table_size as u64 * 8;
        if heads.len_bytes() != expected {
            return Err(Error::parse(format!(
                "bucket file of table {} has {} bytes, header expects {}",
                table,
                heads.len_bytes(),
                expected
            )));
        }
        let data = ArrayStorage::open(&format::data_path(dir, table), mode)?;
        if data.len_bytes() < 4 || data.len_bytes() % 4 != 0 {
            return Err(Error::parse(format!("data file of table {} has {} bytes", table, data.len_bytes())));
        }

        let report = match File::open(format::meta_path(dir, table)) {
            Ok(f) => match bincode::deserialize_from::<_, BuildReport>(BufReader::new(f)) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("ignoring unreadable build report for table {}: {}", table, e);
                    None
                }
            },
            Err(_) => None,
        };

        debug!(
            "opened table {} in {} ({} mode, {} buckets, {} entries, shape {})",
            table,
            dir.display(),
            mode,
            header.table_size,
            header.entry_count,
            header.shape
        );
        Ok(Self { dir: dir.to_path_buf(), table, mode, header, alphabet, hasher, heads, data, report })
    }

    /// 打开目录中所有有效的表
    pub fn open_all(dir: &Path, mode: MemoryMode) -> Result<Vec<Self>> {
        let n = format::count_tables(dir);
        if n == 0 {
            return Err(Error::invalid(format!("no index tables found in {}", dir.display())));
        }
        (0..n).map(|t| Self::open(dir, t, mode)).collect()
    }

    /// 释放映射或缓存的文件
    pub fn close(self) {
        debug!("closing table {} in {}", self.table, self.dir.display());
    }

    pub fn table(&self) -> usize {
        self.table
    }

    pub fn memory_mode(&self) -> MemoryMode {
        self.mode
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn seed_shape(&self) -> &SeedShape {
        &self.header.shape
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// 索引的 (ref, pos) 对总数
    pub fn size(&self) -> u64 {
        self.header.entry_count as u64
    }

    pub fn build_report(&self) -> Option<&BuildReport> {
        self.report.as_ref()
    }

    pub fn bucket(&self, code: u64) -> Result<Bucket> {
        let b = self.hasher.bucket(code);
        let head = self.heads.i64_at(b as u64)?;
        if head == 0 {
            return Ok(Bucket::Empty);
        }
        if head < 0 {
            return decode_singleton(head)
                .map(Bucket::Singleton)
                .ok_or_else(|| Error::parse(format!("bucket {} holds an unfilled singleton", b)));
        }
        let offset = head as u64;
        let count = self.data.i32_at(offset)?;
        let words = self.data.len_bytes() / 4;
        if count <= 0 || offset + 1 + 2 * count as u64 > words {
            return Err(Error::parse(format!(
                "bucket {} points at a length word of {} ({} words in data file)",
                b, count, words
            )));
        }
        Ok(Bucket::Many { offset, count: count as u32 })
    }

    /// 追加至多 `max` 个命中到 `out`，返回桶中的命中总数。
    /// 桶内顺序在构建时已打乱，截取前 `max` 个即是无偏样本。
    pub fn lookup_into(&self, code: u64, out: &mut Vec<RefHit>, max: usize) -> Result<usize> {
        match self.bucket(code)? {
            Bucket::Empty => Ok(0),
            Bucket::Singleton(hit) => {
                if max > 0 {
                    out.push(hit);
                }
                Ok(1)
            }
            Bucket::Many { offset, count } => {
                let take = (count as usize).min(max);
                let mut raw = Vec::with_capacity(take * 2);
                self.data.i32s_into(offset + 1, take * 2, &mut raw)?;
                out.extend(raw.chunks_exact(2).map(|p| RefHit::new(p[0] as u32, p[1] as u32)));
                Ok(count as usize)
            }
        }
    }

    pub fn lookup(&self, code: u64) -> Result<Vec<RefHit>> {
        let mut out = Vec::new();
        self.lookup_into(code, &mut out, usize::MAX)?;
        Ok(out)
    }

    /// 用一段字母（至少一个种子形状长）查询；不是好种子时返回空
    pub fn lookup_letters(&self, window: &[u8]) -> Result<Vec<RefHit>> {
        match self.seed_shape().check_letters(window, &self.alphabet) {
            SeedCheck::Good(code) => self.lookup(code),
            SeedCheck::Undefined | SeedCheck::LowComplexity => Ok(Vec::new()),
        }
    }
}
