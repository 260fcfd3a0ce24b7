use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::index::reader::HashIndexReader;
use crate::index::shape::SeedCheck;
use crate::index::{RefHit, ReferenceSource};
use crate::util::alphabet::Alphabet;
use crate::util::codec::SequenceCodec;

/// 一个种子锚点：查询和参考上的起点、所在框（DNA 正链 1、反链 -1）和种子跨度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeedMatch {
    pub query_offset: u32,
    pub ref_offset: u32,
    pub frame_rank: i8,
    pub seed_length: u16,
}

impl SeedMatch {
    pub fn new(query_offset: u32, ref_offset: u32, frame_rank: i8, seed_length: u16) -> Self {
        Self { query_offset, ref_offset, frame_rank, seed_length }
    }

    /// 参考偏移减查询偏移；同一对角线上的锚点共线
    #[inline]
    pub fn diagonal(&self) -> i64 {
        self.ref_offset as i64 - self.query_offset as i64
    }
}

// 先按框，再按对角线，最后按查询位置排序
impl Ord for SeedMatch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.frame_rank
            .cmp(&other.frame_rank)
            .then_with(|| self.diagonal().cmp(&other.diagonal()))
            .then_with(|| self.query_offset.cmp(&other.query_offset))
            .then_with(|| self.seed_length.cmp(&other.seed_length))
    }
}

impl PartialOrd for SeedMatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 每条参考上的锚点，按 `SeedMatch` 的顺序排列并去重
pub type SeedMatches = BTreeMap<u32, Vec<SeedMatch>>;

/// 在所有表中查找查询的每个种子位置，结果追加到 `out`。
///
/// 每个种子最多检查 `max_hits_per_seed` 个命中（桶内已随机打乱）；
/// 哈希冲突带来的假命中通过比对参考上同一位置的种子编码剔除。
/// 返回检查过的命中数。
pub fn collect_seed_matches<R: ReferenceSource + ?Sized>(
    tables: &[HashIndexReader],
    refs: &R,
    query: &[u8],
    frame_rank: i8,
    max_hits_per_seed: usize,
    out: &mut SeedMatches,
) -> Result<usize> {
    let protein = Alphabet::protein();
    let mut hits: Vec<RefHit> = Vec::new();
    let mut examined = 0usize;

    for table in tables {
        let alphabet = table.alphabet();
        let shape = table.seed_shape();
        if query.len() < shape.length() {
            continue;
        }
        // 约简字母表在完整蛋白质打包序列上经转换表取种子
        let source = if alphabet.is_reduced() { &protein } else { alphabet };
        let codec = SequenceCodec::new(source);
        let encoded = codec.encode(query);
        let span = shape.length() as u16;

        for pos in 0..=query.len() - shape.length() {
            let code = codec.seed_code_translated(shape, &encoded, pos, alphabet, u64::MAX);
            if code == u64::MAX {
                continue;
            }
            hits.clear();
            table.lookup_into(code, &mut hits, max_hits_per_seed)?;
            examined += hits.len();
            for hit in &hits {
                if hit.ref_id as usize >= refs.num_references() {
                    continue;
                }
                let reference = refs.reference(hit.ref_id as usize);
                let Some(window) = reference.get(hit.pos as usize..) else {
                    continue;
                };
                if shape.check_letters(window, alphabet) != SeedCheck::Good(code) {
                    continue;
                }
                out.entry(hit.ref_id).or_default().push(SeedMatch::new(pos as u32, hit.pos, frame_rank, span));
            }
        }
    }

    for matches in out.values_mut() {
        matches.sort_unstable();
        matches.dedup();
    }
    Ok(examined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::HashIndexBuilder;
    use crate::index::{IndexOpt, MemoryMode};

    #[test]
    fn matches_order_by_frame_then_diagonal() {
        let a = SeedMatch::new(5, 10, 1, 4);
        let b = SeedMatch::new(0, 6, 1, 4);
        let c = SeedMatch::new(9, 14, 1, 4);
        let d = SeedMatch::new(0, 0, -1, 4);
        let mut v = vec![a, b, c, d];
        v.sort();
        assert_eq!(v, vec![d, a, c, b]);
        assert_eq!(a.diagonal(), 5);
        assert_eq!(SeedMatch::new(7, 2, 1, 4).diagonal(), -5);
    }

    #[test]
    fn collects_verified_anchors() {
        let dir = tempfile::tempdir().unwrap();
        let alphabet = Alphabet::dna();
        let refs = vec!["TTTTACGTTGCAAGCTTACGGATCC", "GGCCAAGCTTACGGATTT"];
        HashIndexBuilder::new(&alphabet, "11011".parse().unwrap(), IndexOpt::default())
            .unwrap()
            .build(&refs)
            .unwrap()
            .write(dir.path(), 0)
            .unwrap();
        let tables = HashIndexReader::open_all(dir.path(), MemoryMode::Loaded).unwrap();

        let query = b"GCAAGCTTACG";
        let mut out = SeedMatches::new();
        let examined = collect_seed_matches(&tables, &refs, query, 1, 100, &mut out).unwrap();
        assert!(examined > 0);

        // 查询取自参考 0 的 [9, 20)
        assert!(out[&0].iter().filter(|m| m.diagonal() == 9).count() >= 6);
        for (&id, matches) in &out {
            let r = refs[id as usize].as_bytes();
            for m in matches {
                let q = &query[m.query_offset as usize..m.query_offset as usize + 5];
                let t = &r[m.ref_offset as usize..m.ref_offset as usize + 5];
                assert_eq!((q[0], q[1], q[3], q[4]), (t[0], t[1], t[3], t[4]));
                assert_eq!(m.seed_length, 5);
            }
        }
        // AAGCTTACG 也出现在参考 1 的第 4 位
        assert!(out[&1].iter().any(|m| m.diagonal() == 2));
    }

    #[test]
    fn cap_limits_examined_hits() {
        let dir = tempfile::tempdir().unwrap();
        let alphabet = Alphabet::dna();
        let refs: Vec<&str> = vec!["ACGTAACGTAACGTAACGTAACGTAACGTA"; 4];
        HashIndexBuilder::new(&alphabet, "1111".parse().unwrap(), IndexOpt::default())
            .unwrap()
            .build(&refs)
            .unwrap()
            .write(dir.path(), 0)
            .unwrap();
        let tables = HashIndexReader::open_all(dir.path(), MemoryMode::Loaded).unwrap();
        let mut capped = SeedMatches::new();
        let n = collect_seed_matches(&tables, &refs, b"ACGT", 1, 3, &mut capped).unwrap();
        assert_eq!(n, 3);
        assert!(capped.values().map(Vec::len).sum::<usize>() <= 3);

        let mut all = SeedMatches::new();
        assert!(collect_seed_matches(&tables, &refs, b"ACGT", 1, usize::MAX, &mut all).unwrap() >= 24);
        assert_eq!(all.values().map(Vec::len).sum::<usize>(), 24);
        assert!(all.values().flatten().all(|m| m.ref_offset % 5 == 0));
        // 查询短于种子跨度
        let mut none = SeedMatches::new();
        assert_eq!(collect_seed_matches(&tables, &refs, b"ACG", 1, 10, &mut none).unwrap(), 0);
        assert!(none.is_empty());
    }
}
