//! 种子哈希、桶寻址和桶头编码。
//!
//! 桶头数组中每个 i64 的含义：
//! - `0`：空桶
//! - 负数：单例，`-(((ref << 32) | pos) + 1)`，不占 data 数组
//! - 正数：data 数组偏移，`data[off]` 为对数，其后 `2 * count` 个 i32 为 (ref, pos) 对

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh32::xxh32;

/// 超过该桶数时表大小取 `i32::MAX`，寻址退化为取模
pub const MAX_POW2_TABLE: u64 = 1 << 30;

/// 填充阶段单例桶的占位值，填充完成后不会留在表里
pub(crate) const SINGLETON_PENDING: i64 = i64::MIN;

/// 一个 (参考序列编号, 位置) 命中
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RefHit {
    pub ref_id: u32,
    pub pos: u32,
}

impl RefHit {
    pub fn new(ref_id: u32, pos: u32) -> Self {
        Self { ref_id, pos }
    }
}

/// 一个桶的解码结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Empty,
    Singleton(RefHit),
    /// `offset` 指向 data 数组中的长度字
    Many { offset: u64, count: u32 },
}

impl Bucket {
    pub fn len(&self) -> usize {
        match self {
            Bucket::Empty => 0,
            Bucket::Singleton(_) => 1,
            Bucket::Many { count, .. } => *count as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Bucket::Empty)
    }
}

#[inline]
pub fn encode_singleton(hit: RefHit) -> i64 {
    -((((hit.ref_id as i64) << 32) | hit.pos as i64) + 1)
}

/// 负桶头还原为命中；非负值返回 None
#[inline]
pub fn decode_singleton(head: i64) -> Option<RefHit> {
    if head >= 0 || head == SINGLETON_PENDING {
        return None;
    }
    let packed = -head - 1;
    Some(RefHit { ref_id: (packed >> 32) as u32, pos: (packed & 0xffff_ffff) as u32 })
}

/// 种子编码到桶号的映射，构建与查询共用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedHasher {
    table_size: u32,
    mask: u32,
    seed: u32,
}

impl SeedHasher {
    pub fn new(table_size: u32, seed: i32) -> Self {
        let mask = if table_size.is_power_of_two() { table_size - 1 } else { 0 };
        Self { table_size, mask, seed: seed as u32 }
    }

    /// 根据估计的种子数和装载因子确定表大小
    pub fn for_positions(positions: u64, load_factor: f64, seed: i32) -> Self {
        let wanted = ((positions as f64 / load_factor).ceil() as u64).max(1);
        let size = if wanted > MAX_POW2_TABLE { i32::MAX as u32 } else { wanted.next_power_of_two() as u32 };
        Self::new(size, seed)
    }

    pub fn table_size(&self) -> u32 {
        self.table_size
    }

    /// 写入索引头的掩码；非 2 的幂表为 0
    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn seed(&self) -> i32 {
        self.seed as i32
    }

    #[inline]
    pub fn bucket(&self, code: u64) -> usize {
        let h = xxh32(&code.to_be_bytes(), self.seed);
        if self.mask != 0 || self.table_size == 1 {
            (h & self.mask) as usize
        } else {
            (h % self.table_size) as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_encoding_round_trip() {
        for hit in [RefHit::new(0, 0), RefHit::new(7, 123), RefHit::new(i32::MAX as u32, i32::MAX as u32)] {
            let head = encode_singleton(hit);
            assert!(head < 0);
            assert_eq!(decode_singleton(head), Some(hit));
        }
        assert_eq!(decode_singleton(0), None);
        assert_eq!(decode_singleton(5), None);
        assert_eq!(decode_singleton(SINGLETON_PENDING), None);
    }

    #[test]
    fn table_size_is_power_of_two_or_max() {
        let h = SeedHasher::for_positions(1000, 0.8, 1);
        assert_eq!(h.table_size(), 2048);
        assert_eq!(h.mask(), 2047);

        let huge = SeedHasher::for_positions(3 << 30, 0.8, 1);
        assert_eq!(huge.table_size(), i32::MAX as u32);
        assert_eq!(huge.mask(), 0);
        for code in 0..1000u64 {
            assert!(huge.bucket(code) < i32::MAX as usize);
        }
    }

    #[test]
    fn bucket_depends_on_seed_and_stays_in_range() {
        let a = SeedHasher::new(1024, 1);
        let b = SeedHasher::new(1024, 2);
        let mut differ = 0;
        for code in 0..256u64 {
            assert!(a.bucket(code) < 1024);
            assert_eq!(a.bucket(code), a.bucket(code));
            if a.bucket(code) != b.bucket(code) {
                differ += 1;
            }
        }
        assert!(differ > 200);
        assert_eq!(SeedHasher::new(1, 0).bucket(42), 0);
    }
}
