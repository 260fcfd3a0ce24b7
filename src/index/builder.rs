//! 多遍并行构建种子哈希表。
//!
//! 1. 计数：扫描所有好种子，按桶累加出现次数（封顶 `max_hits_per_hash + 1`）
//! 2. 分配：按桶决定空桶 / 单例 / 丢弃 / data 偏移，偏移计数器是唯一的全局串行点
//! 3. 填充：再次扫描，单例直接写桶头，多例桶在分段锁下追加 (ref, pos) 对
//! 4. 打乱：每个多例桶先排序再用桶号作种子 Fisher–Yates 打乱
//!
//! 每一遍内部由线程池中的 worker 按参考序列编号步进（或按桶区间）并行处理，
//! 遍与遍之间顺序执行。

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::format::{self, IndexHeader};
use crate::index::hash::{encode_singleton, RefHit, SeedHasher, SINGLETON_PENDING};
use crate::index::shape::{SeedCheck, SeedShape};
use crate::index::{IndexOpt, ReferenceSource};
use crate::util::alphabet::Alphabet;

/// 桶分段锁数量
pub const LOCK_STRIPES: usize = 1 << 10;

// 分配和打乱两遍按桶区间切分的粒度
const BUCKET_CHUNK: usize = 1 << 16;

/// 一次构建的统计，随索引写为 `index<N>.meta`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    /// RFC3339 时间戳
    pub created: String,
    pub alphabet: String,
    pub shape: String,
    pub options: IndexOpt,
    pub references: u64,
    pub letters: u64,
    /// 扫描过的种子位置数
    pub seed_positions: u64,
    /// 写入表中的 (ref, pos) 对数
    pub seeds_indexed: u64,
    pub low_complexity: u64,
    pub buckets_dropped: u64,
    pub seeds_dropped: u64,
    pub singleton_buckets: u64,
    pub multi_buckets: u64,
    pub table_size: u64,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "created:            {}", self.created)?;
        writeln!(f, "alphabet:           {}", self.alphabet)?;
        writeln!(f, "seed shape:         {}", self.shape)?;
        writeln!(f, "references:         {}", self.references)?;
        writeln!(f, "letters:            {}", self.letters)?;
        writeln!(f, "seed positions:     {}", self.seed_positions)?;
        writeln!(f, "seeds indexed:      {}", self.seeds_indexed)?;
        writeln!(f, "low complexity:     {}", self.low_complexity)?;
        writeln!(f, "buckets dropped:    {}", self.buckets_dropped)?;
        writeln!(f, "seeds dropped:      {}", self.seeds_dropped)?;
        writeln!(f, "singleton buckets:  {}", self.singleton_buckets)?;
        writeln!(f, "multi buckets:      {}", self.multi_buckets)?;
        write!(f, "table size:         {}", self.table_size)
    }
}

/// 扫描遍的 worker 本地计数，遍结束后归并
#[derive(Debug, Default, Clone, Copy)]
struct ScanStats {
    letters: u64,
    positions: u64,
    good: u64,
    low_complexity: u64,
    dropped: u64,
}

impl ScanStats {
    fn merge(self, o: Self) -> Self {
        Self {
            letters: self.letters + o.letters,
            positions: self.positions + o.positions,
            good: self.good + o.good,
            low_complexity: self.low_complexity + o.low_complexity,
            dropped: self.dropped + o.dropped,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct AllocStats {
    singletons: u64,
    multi: u64,
    dropped: u64,
}

impl AllocStats {
    fn merge(self, o: Self) -> Self {
        Self { singletons: self.singletons + o.singletons, multi: self.multi + o.multi, dropped: self.dropped + o.dropped }
    }
}

/// 桶分段锁，按 `bucket & (LOCK_STRIPES - 1)` 取锁
pub struct BucketLocks {
    stripes: Vec<Mutex<()>>,
}

impl BucketLocks {
    pub fn new() -> Self {
        Self { stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect() }
    }

    #[inline]
    pub fn stripe(&self, bucket: usize) -> &Mutex<()> {
        &self.stripes[bucket & (LOCK_STRIPES - 1)]
    }
}

impl Default for BucketLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// 内部不变量被破坏时继续构建只会写出损坏的索引，直接终止进程
#[cold]
fn invariant_violation(what: fmt::Arguments<'_>) -> ! {
    error!("index build invariant violated: {}", what);
    std::process::abort()
}

/// 构建完成、尚未落盘的一张表
#[derive(Debug, Clone)]
pub struct BuiltTable {
    header: IndexHeader,
    heads: Vec<i64>,
    data: Vec<i32>,
    report: BuildReport,
}

impl BuiltTable {
    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn heads(&self) -> &[i64] {
        &self.heads
    }

    pub fn data(&self) -> &[i32] {
        &self.data
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    /// 把表写成 `dir` 下编号为 `table` 的四个文件。
    /// 先删除旧文件头使旧表失效，文件头最后写入。
    pub fn write(&self, dir: &Path, table: usize) -> Result<()> {
        let header_path = format::header_path(dir, table);
        match fs::remove_file(&header_path) {
            Ok(()) => debug!("removed previous header {}", header_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        format::write_atomically(&format::heads_path(dir, table), |w| {
            format::write_i64s(w, self.heads.iter().copied())
        })?;
        format::write_atomically(&format::data_path(dir, table), |w| {
            format::write_i32s(w, self.data.iter().copied())
        })?;
        format::write_atomically(&format::meta_path(dir, table), |w| {
            bincode::serialize_into(w, &self.report)?;
            Ok(())
        })?;
        format::write_atomically(&header_path, |w| self.header.write_to(w))?;
        info!(
            "table {} written to {} ({} buckets, {} entries)",
            table,
            dir.display(),
            self.heads.len(),
            self.header.entry_count
        );
        Ok(())
    }
}

/// 单张表的构建器：一个字母表、一个种子形状、一组选项
#[derive(Debug, Clone)]
pub struct HashIndexBuilder<'a> {
    alphabet: &'a Alphabet,
    shape: SeedShape,
    opt: IndexOpt,
}

impl<'a> HashIndexBuilder<'a> {
    pub fn new(alphabet: &'a Alphabet, shape: SeedShape, opt: IndexOpt) -> Result<Self> {
        opt.validate()?;
        shape.check_fits(alphabet)?;
        Ok(Self { alphabet, shape, opt })
    }

    pub fn shape(&self) -> &SeedShape {
        &self.shape
    }

    /// 对一个位置范围内的所有好种子调用 `f(code, pos)`
    fn scan_reference<F: FnMut(u64, u32)>(&self, codes: &[u8], stats: &mut ScanStats, mut f: F) {
        stats.letters += codes.len() as u64;
        let span = self.shape.length();
        if codes.len() < span {
            return;
        }
        for pos in (0..=codes.len() - span).step_by(self.opt.step_size as usize) {
            stats.positions += 1;
            match self.shape.check(codes, pos, self.alphabet) {
                SeedCheck::Good(code) => f(code, pos as u32),
                SeedCheck::LowComplexity => stats.low_complexity += 1,
                SeedCheck::Undefined => {}
            }
        }
    }

    fn check_capacity<R: ReferenceSource + ?Sized>(refs: &R) -> Result<u64> {
        let n = refs.num_references();
        if n > i32::MAX as usize {
            return Err(Error::capacity(format!("{} references, at most {} can be indexed", n, i32::MAX)));
        }
        let mut letters = 0u64;
        for id in 0..n {
            let len = refs.reference(id).len();
            if len > i32::MAX as usize {
                return Err(Error::capacity(format!(
                    "reference {} has {} letters, positions beyond {} cannot be indexed",
                    id,
                    len,
                    i32::MAX
                )));
            }
            letters += len as u64;
        }
        Ok(letters)
    }

    /// 估计种子位置数，用于确定表大小
    fn estimate_positions<R: ReferenceSource + ?Sized>(&self, refs: &R) -> u64 {
        let span = self.shape.length();
        let step = self.opt.step_size as usize;
        (0..refs.num_references())
            .map(|id| {
                let len = refs.reference(id).len();
                if len < span {
                    0
                } else {
                    ((len - span) / step + 1) as u64
                }
            })
            .sum()
    }

    /// worker `w` 处理编号 `w, w + workers, ...` 的参考序列
    fn scan_pass<R, F>(&self, refs: &R, workers: usize, visit: F) -> ScanStats
    where
        R: ReferenceSource + ?Sized,
        F: Fn(u64, RefHit, &mut ScanStats) + Sync,
    {
        let n = refs.num_references();
        (0..workers)
            .into_par_iter()
            .map(|w| {
                let mut stats = ScanStats::default();
                let mut codes = Vec::new();
                for id in (w..n).step_by(workers) {
                    self.alphabet.codes_into(refs.reference(id), &mut codes);
                    let mut local = ScanStats::default();
                    self.scan_reference(&codes, &mut local, |code, pos| {
                        visit(code, RefHit::new(id as u32, pos), &mut stats);
                    });
                    stats = stats.merge(local);
                }
                stats
            })
            .reduce(ScanStats::default, ScanStats::merge)
    }

    pub fn build<R: ReferenceSource + ?Sized>(&self, refs: &R) -> Result<BuiltTable> {
        let started = Instant::now();
        let total_letters = Self::check_capacity(refs)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.opt.threads)
            .build()
            .map_err(|e| Error::invalid(format!("cannot create build thread pool: {}", e)))?;
        let workers = pool.current_num_threads().max(1);

        let hasher = SeedHasher::for_positions(self.estimate_positions(refs), self.opt.load_factor, self.opt.random_seed);
        let table_size = hasher.table_size() as usize;
        info!(
            "building table for shape {} over {} references ({} letters), {} buckets, {} threads",
            self.shape,
            refs.num_references(),
            total_letters,
            table_size,
            workers
        );

        let cap = self.opt.max_hits_per_hash as i64;

        // 1. 计数
        let t = Instant::now();
        let counts: Vec<AtomicI64> = (0..table_size).map(|_| AtomicI64::new(0)).collect();
        let scanned = pool.install(|| {
            self.scan_pass(refs, workers, |code, _hit, stats| {
                stats.good += 1;
                let _ = counts[hasher.bucket(code)].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                    (c <= cap).then_some(c + 1)
                });
            })
        });
        debug!(
            "count pass: {} positions, {} good seeds, {} low-complexity in {:.2?}",
            scanned.positions,
            scanned.good,
            scanned.low_complexity,
            t.elapsed()
        );

        // 2. 分配
        let t = Instant::now();
        let heads: Vec<AtomicI64> = (0..table_size).map(|_| AtomicI64::new(0)).collect();
        // data 的 0 号字保留，偏移从 1 开始
        let next_offset = Mutex::new(1i64);
        let alloc = pool.install(|| {
            (0..(table_size + BUCKET_CHUNK - 1) / BUCKET_CHUNK)
                .into_par_iter()
                .map(|chunk| {
                    let start = chunk * BUCKET_CHUNK;
                    let end = (start + BUCKET_CHUNK).min(table_size);
                    let mut stats = AllocStats::default();
                    let mut need = 0i64;
                    for b in start..end {
                        let c = counts[b].load(Ordering::Relaxed);
                        if c < 0 {
                            invariant_violation(format_args!("bucket {} has negative count {}", b, c));
                        }
                        if c > 1 && c <= cap {
                            need += 2 * c + 1;
                        }
                    }
                    let mut offset = if need > 0 {
                        let mut next = next_offset.lock().unwrap_or_else(|e| e.into_inner());
                        let base = *next;
                        *next += need;
                        base
                    } else {
                        0
                    };
                    for b in start..end {
                        let c = counts[b].load(Ordering::Relaxed);
                        let head = match c {
                            0 => 0,
                            1 => {
                                stats.singletons += 1;
                                SINGLETON_PENDING
                            }
                            c if c > cap => {
                                stats.dropped += 1;
                                0
                            }
                            c => {
                                stats.multi += 1;
                                let here = offset;
                                offset += 2 * c + 1;
                                here
                            }
                        };
                        heads[b].store(head, Ordering::Relaxed);
                    }
                    stats
                })
                .reduce(AllocStats::default, AllocStats::merge)
        });
        let data_len = next_offset.into_inner().unwrap_or_else(|e| e.into_inner());
        if data_len > u32::MAX as i64 {
            return Err(Error::capacity(format!("data array needs {} words", data_len)));
        }
        let data: Vec<AtomicI32> = (0..data_len).map(|_| AtomicI32::new(0)).collect();
        if alloc.dropped > 0 {
            warn!(
                "{} buckets exceeded {} hits per hash and were dropped",
                alloc.dropped, self.opt.max_hits_per_hash
            );
        }
        debug!(
            "allocate pass: {} singleton, {} multi, {} dropped buckets, {} data words in {:.2?}",
            alloc.singletons,
            alloc.multi,
            alloc.dropped,
            data_len,
            t.elapsed()
        );

        // 3. 填充
        let t = Instant::now();
        let locks = BucketLocks::new();
        let filled = pool.install(|| {
            self.scan_pass(refs, workers, |code, hit, stats| {
                let b = hasher.bucket(code);
                let head = heads[b].load(Ordering::Relaxed);
                if head == 0 {
                    stats.dropped += 1;
                } else if head == SINGLETON_PENDING {
                    if heads[b]
                        .compare_exchange(SINGLETON_PENDING, encode_singleton(hit), Ordering::Relaxed, Ordering::Relaxed)
                        .is_err()
                    {
                        invariant_violation(format_args!("singleton bucket {} filled twice", b));
                    }
                    stats.good += 1;
                } else if head > 0 {
                    let expected = counts[b].load(Ordering::Relaxed);
                    let off = head as usize;
                    let _guard = locks.stripe(b).lock().unwrap_or_else(|e| e.into_inner());
                    let len = data[off].load(Ordering::Relaxed) as i64;
                    if len >= expected {
                        invariant_violation(format_args!("bucket {} overflows its {} reserved pairs", b, expected));
                    }
                    let slot = off + 1 + 2 * len as usize;
                    data[slot].store(hit.ref_id as i32, Ordering::Relaxed);
                    data[slot + 1].store(hit.pos as i32, Ordering::Relaxed);
                    data[off].store(len as i32 + 1, Ordering::Relaxed);
                    stats.good += 1;
                } else {
                    invariant_violation(format_args!("bucket {} already holds a singleton", b));
                }
            })
        });
        drop(counts);
        debug!("fill pass: {} seeds indexed, {} dropped in {:.2?}", filled.good, filled.dropped, t.elapsed());

        let heads: Vec<i64> = heads.into_iter().map(AtomicI64::into_inner).collect();
        let mut data: Vec<i32> = data.into_iter().map(AtomicI32::into_inner).collect();
        if let Some(b) = heads.iter().position(|&h| h == SINGLETON_PENDING) {
            invariant_violation(format_args!("singleton bucket {} was never filled", b));
        }

        // 4. 打乱
        let t = Instant::now();
        pool.install(|| shuffle_buckets(&heads, &mut data));
        debug!("randomize pass in {:.2?}", t.elapsed());

        let report = BuildReport {
            created: chrono::Utc::now().to_rfc3339(),
            alphabet: self.alphabet.name().to_string(),
            shape: self.shape.to_string(),
            options: self.opt.clone(),
            references: refs.num_references() as u64,
            letters: total_letters,
            seed_positions: scanned.positions,
            seeds_indexed: filled.good,
            low_complexity: scanned.low_complexity,
            buckets_dropped: alloc.dropped,
            seeds_dropped: filled.dropped,
            singleton_buckets: alloc.singletons,
            multi_buckets: alloc.multi,
            table_size: table_size as u64,
        };
        info!(
            "table built in {:.2?}: {} seeds indexed, {} low-complexity, {} dropped",
            started.elapsed(),
            report.seeds_indexed,
            report.low_complexity,
            report.seeds_dropped
        );
        let header =
            IndexHeader::new(self.alphabet, &hasher, filled.good as i64, self.opt.step_size, self.shape.clone());
        Ok(BuiltTable { header, heads, data, report })
    }
}

/// 每个多例桶内先排序再按桶号确定性打乱，结果与线程数无关
fn shuffle_buckets(heads: &[i64], data: &mut [i32]) {
    // 每个桶的 data 区间互不重叠，按偏移切出可变片段并行处理
    let mut spans: Vec<(usize, usize)> = heads
        .iter()
        .enumerate()
        .filter(|(_, &h)| h > 0)
        .map(|(b, &h)| (h as usize, b))
        .collect();
    spans.sort_unstable();

    let mut pieces: Vec<(usize, &mut [i32])> = Vec::with_capacity(spans.len());
    let mut rest: &mut [i32] = data;
    let mut consumed = 0usize;
    for &(off, b) in &spans {
        let tail = std::mem::take(&mut rest);
        let (_, from_off) = tail.split_at_mut(off - consumed);
        let count = from_off[0] as usize;
        let (piece, after) = from_off.split_at_mut(1 + 2 * count);
        consumed = off + 1 + 2 * count;
        rest = after;
        pieces.push((b, piece));
    }

    pieces.into_par_iter().for_each(|(b, piece)| {
        let mut pairs: Vec<RefHit> =
            piece[1..].chunks_exact(2).map(|p| RefHit::new(p[0] as u32, p[1] as u32)).collect();
        pairs.sort_unstable();
        let mut rng = StdRng::seed_from_u64(b as u64);
        pairs.shuffle(&mut rng);
        for (slot, hit) in piece[1..].chunks_exact_mut(2).zip(&pairs) {
            slot[0] = hit.ref_id as i32;
            slot[1] = hit.pos as i32;
        }
    });
}

/// 为每个种子形状构建一张表，依次写为 `dir` 下的表 0..n，返回各表的构建报告
pub fn build_index<R: ReferenceSource + ?Sized>(
    refs: &R,
    shapes: &[SeedShape],
    alphabet: &Alphabet,
    opt: &IndexOpt,
    dir: &Path,
) -> Result<Vec<BuildReport>> {
    if shapes.is_empty() {
        return Err(Error::invalid("at least one seed shape is required"));
    }
    fs::create_dir_all(dir)?;
    // 目录里编号更大的旧表不再属于这个索引
    let stale = format::count_tables(dir);
    for n in shapes.len()..stale {
        fs::remove_file(format::header_path(dir, n))?;
        for path in [format::heads_path(dir, n), format::data_path(dir, n), format::meta_path(dir, n)] {
            if path.is_file() {
                fs::remove_file(path)?;
            }
        }
    }

    let mut reports = Vec::with_capacity(shapes.len());
    for (n, shape) in shapes.iter().enumerate() {
        let builder = HashIndexBuilder::new(alphabet, shape.clone(), opt.clone())?;
        let table = builder.build(refs)?;
        table.write(dir, n)?;
        reports.push(table.report);
    }
    Ok(reports)
}
