//! 间隔种子哈希索引：构建、文件格式与只读访问。

pub mod builder;
pub mod format;
pub mod hash;
pub mod reader;
pub mod shape;
pub mod storage;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use builder::{build_index, BuildReport, BuiltTable, HashIndexBuilder};
pub use hash::{Bucket, RefHit};
pub use reader::HashIndexReader;
pub use shape::SeedShape;
pub use storage::MemoryMode;

/// 索引构建选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOpt {
    /// 0 表示使用全部可用核心
    pub threads: usize,
    /// 超过该出现次数的桶整体丢弃
    pub max_hits_per_hash: u32,
    /// 表大小 = 种子位置数 / 装载因子，向上取 2 的幂
    pub load_factor: f64,
    pub step_size: u32,
    pub random_seed: i32,
}

impl Default for IndexOpt {
    fn default() -> Self {
        Self { threads: 0, max_hits_per_hash: 1000, load_factor: 0.8, step_size: 1, random_seed: 666 }
    }
}

impl IndexOpt {
    pub fn validate(&self) -> Result<()> {
        if self.max_hits_per_hash == 0 || self.max_hits_per_hash > i32::MAX as u32 / 2 {
            return Err(Error::invalid(format!("max hits per hash {} out of range", self.max_hits_per_hash)));
        }
        if !(self.load_factor > 0.0 && self.load_factor <= 1.0) {
            return Err(Error::invalid(format!("load factor {} must be in (0, 1]", self.load_factor)));
        }
        if self.step_size == 0 || self.step_size > i32::MAX as u32 {
            return Err(Error::invalid("step size must be positive"));
        }
        Ok(())
    }
}

/// 按编号提供参考序列（原始字节），构建线程并发读取
pub trait ReferenceSource: Sync {
    fn num_references(&self) -> usize;
    fn reference(&self, id: usize) -> &[u8];
}

impl<T: AsRef<[u8]> + Sync> ReferenceSource for [T] {
    fn num_references(&self) -> usize {
        self.len()
    }

    fn reference(&self, id: usize) -> &[u8] {
        self[id].as_ref()
    }
}

impl<T: AsRef<[u8]> + Sync> ReferenceSource for Vec<T> {
    fn num_references(&self) -> usize {
        self.len()
    }

    fn reference(&self, id: usize) -> &[u8] {
        self[id].as_ref()
    }
}
