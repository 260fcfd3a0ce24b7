use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::matrix::ScoringMatrix;
use super::stats::KarlinAltschul;

/// 半全局模式下的负无穷哨兵，足够小又不会在减去罚分时溢出
pub const NEG_INF: i32 = -100_000_000;

// 回溯码：记录每个状态的值来自哪个前驱状态
const DONE: u8 = 9;
const M_FROM_M: u8 = 1;
const M_FROM_IREF: u8 = 2;
const M_FROM_IQUERY: u8 = 3;
const IREF_FROM_M: u8 = 4;
const IREF_FROM_IREF: u8 = 5;
const IQUERY_FROM_M: u8 = 6;
const IQUERY_FROM_IQUERY: u8 = 7;

// quick_check 的窗口和最少精确匹配数
const QUICK_CHECK_WINDOW: usize = 30;
const QUICK_CHECK_MIN_MATCHES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignmentMode {
    /// Smith–Waterman 式局部比对
    #[default]
    Local,
    /// 查询从头开始，止于查询末尾或参考末尾
    SemiGlobal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwParams {
    /// 第一个空位位置的罚分
    pub gap_open: i32,
    /// 之后每个空位位置的罚分
    pub gap_extend: i32,
    /// 锚点对角线两侧各计算的行数
    pub band_width: usize,
    pub mode: AlignmentMode,
}

/// 一次比对的摘要，可以脱离比对器保存。
/// 坐标为 0 起始、左闭右开。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub raw_score: i32,
    pub bit_score: f64,
    pub expected: f64,
    pub query_start: usize,
    pub query_end: usize,
    pub ref_start: usize,
    pub ref_end: usize,
    pub identities: u32,
    pub mismatches: u32,
    /// 空位位置总数
    pub gaps: u32,
    pub gap_opens: u32,
    /// 比对列数
    pub length: u32,
}

impl Alignment {
    pub fn percent_identity(&self) -> f64 {
        if self.length == 0 {
            0.0
        } else {
            100.0 * self.identities as f64 / self.length as f64
        }
    }
}

/// 回溯结果：摘要加上借用比对器缓冲区的三条轨道，下一次比对前有效
#[derive(Debug)]
pub struct AlignmentView<'a> {
    pub alignment: Alignment,
    pub query_track: &'a [u8],
    /// `|` 相同，`+` 正分错配，空格为其他
    pub mid_track: &'a [u8],
    pub ref_track: &'a [u8],
}

impl AlignmentView<'_> {
    /// 查询为读段视角：`I` 为查询多出的字母，`D` 为参考多出的字母
    pub fn cigar(&self) -> String {
        let ops = self.query_track.iter().zip(self.ref_track).map(|(&q, &r)| match (q, r) {
            (b'-', _) => 'D',
            (_, b'-') => 'I',
            _ => 'M',
        });
        ops_to_cigar(ops)
    }
}

pub fn ops_to_cigar(ops: impl IntoIterator<Item = char>) -> String {
    let mut cigar = String::new();
    let mut ops = ops.into_iter();
    let Some(mut cur) = ops.next() else {
        return cigar;
    };
    let mut len = 1usize;
    for op in ops {
        if op == cur {
            len += 1;
        } else {
            let _ = write!(&mut cigar, "{}{}", len, cur);
            cur = op;
            len = 1;
        }
    }
    let _ = write!(&mut cigar, "{}{}", len, cur);
    cigar
}

/// DP 工作区，按列优先存放 `cols * rows` 个格子：`idx = c * rows + r`。
/// 只增不减，`reuse` 在容量不足时扩容并计数。
#[derive(Debug, Default, Clone)]
pub struct DpArena {
    cols: usize,
    rows: usize,
    m: Vec<i32>,
    iref: Vec<i32>,
    iquery: Vec<i32>,
    tb_m: Vec<u8>,
    tb_iref: Vec<u8>,
    tb_iquery: Vec<u8>,
    query: Vec<u8>,
    reference: Vec<u8>,
    query_track: Vec<u8>,
    mid_track: Vec<u8>,
    ref_track: Vec<u8>,
    growths: usize,
}

impl DpArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为 `cols * rows` 个格子准备矩阵，已有内容不保证保留
    pub fn reuse(&mut self, cols: usize, rows: usize) {
        let cells = cols * rows;
        if cells > self.m.len() {
            self.m.resize(cells, 0);
            self.iref.resize(cells, 0);
            self.iquery.resize(cells, 0);
            self.tb_m.resize(cells, DONE);
            self.tb_iref.resize(cells, DONE);
            self.tb_iquery.resize(cells, DONE);
            self.growths += 1;
        }
        self.cols = cols;
        self.rows = rows;
    }

    /// 矩阵扩容次数
    pub fn growth_count(&self) -> usize {
        self.growths
    }

    /// 当前可容纳的格子数
    pub fn capacity(&self) -> usize {
        self.m.len()
    }

    #[inline]
    fn set(&mut self, idx: usize, m: (i32, u8), iref: (i32, u8), iquery: (i32, u8)) {
        self.m[idx] = m.0;
        self.tb_m[idx] = m.1;
        self.iref[idx] = iref.0;
        self.tb_iref[idx] = iref.1;
        self.iquery[idx] = iquery.0;
        self.tb_iquery[idx] = iquery.1;
    }
}

/// 最近一次 `compute_alignment` 的终点
#[derive(Debug, Clone, Copy)]
struct BestCell {
    col: usize,
    row: usize,
    raw_score: i32,
    query_len: usize,
    ref_offset: isize,
    window_start: usize,
}

#[derive(Clone, Copy)]
enum State {
    Match,
    InsRef,
    InsQuery,
}

/// 带状三状态仿射空位比对器。
///
/// 每个工作线程持有一个实例并串行复用；内部缓冲区在调用之间被原地改写，
/// 因此同一实例不能同时进行两次比对。
#[derive(Debug, Clone)]
pub struct BandedAligner {
    matrix: ScoringMatrix,
    params: SwParams,
    stats: KarlinAltschul,
    db_length: u64,
    arena: DpArena,
    best: Option<BestCell>,
}

impl BandedAligner {
    pub fn new(matrix: ScoringMatrix, params: SwParams, stats: KarlinAltschul, db_length: u64) -> Self {
        Self { matrix, params, stats, db_length, arena: DpArena::new(), best: None }
    }

    pub fn params(&self) -> &SwParams {
        &self.params
    }

    pub fn matrix(&self) -> &ScoringMatrix {
        &self.matrix
    }

    pub fn arena(&self) -> &DpArena {
        &self.arena
    }

    /// 修改带宽，之后的比对生效
    pub fn set_band_width(&mut self, band_width: usize) {
        self.params.band_width = band_width;
    }

    /// 在以 (query_pos, ref_pos) 所在对角线为中心的带内计算比对，返回原始分数；
    /// 0 表示没有比对。
    pub fn compute_alignment(&mut self, query: &[u8], reference: &[u8], query_pos: usize, ref_pos: usize) -> i32 {
        self.best = None;
        let qlen = query.len();
        let rlen = reference.len() as isize;
        if qlen == 0 || rlen == 0 {
            return 0;
        }

        let band = self.params.band_width;
        let rows = 2 * band + 3;
        let cols = qlen + 1;
        let diag = ref_pos as isize - query_pos as isize;
        // 格子 (c, r) 对应参考位置 r + c + ref_offset，锚点对角线在第 band + 1 行
        let ref_offset = diag - band as isize - 2;
        let lo = (2 + ref_offset).max(0);
        let hi = (rows as isize - 2 + qlen as isize + ref_offset).min(rlen - 1);
        if lo > hi {
            return 0;
        }

        let local = self.params.mode == AlignmentMode::Local;
        let go = self.params.gap_open;
        let ge = self.params.gap_extend;
        let out_of_range = if local { (0, DONE) } else { (NEG_INF, DONE) };
        let border = (NEG_INF, DONE);

        let arena = &mut self.arena;
        arena.reuse(cols, rows);
        arena.query.clear();
        arena.query.extend_from_slice(query);
        arena.reference.clear();
        arena.reference.extend_from_slice(&reference[lo as usize..=hi as usize]);

        // 第 0 列：尚未消耗查询字母
        arena.set(0, border, border, border);
        arena.set(rows - 1, border, border, border);
        for r in 1..rows - 1 {
            if local {
                arena.set(r, (0, DONE), (0, DONE), (0, DONE));
            } else {
                arena.set(r, (0, DONE), border, border);
            }
        }

        let mut best: Option<(usize, usize)> = None;
        let mut best_score = 0;
        for c in 1..cols {
            let base = c * rows;
            let prev = base - rows;
            arena.set(base, border, border, border);
            arena.set(base + rows - 1, border, border, border);
            let qc = arena.query[c - 1];
            for r in 1..rows - 1 {
                let idx = base + r;
                let j = r as isize + c as isize + ref_offset;
                if j == -1 && !local {
                    // 半全局：参考起点之前的查询字母可以悬空，与末端 j == rlen - 1 对称
                    arena.set(idx, (0, DONE), border, border);
                    continue;
                }
                if j < 0 || j >= rlen {
                    arena.set(idx, out_of_range, out_of_range, out_of_range);
                    continue;
                }
                let s = self.matrix.score(qc, reference[j as usize]);

                let (pm, pi, pq) = (arena.m[prev + r], arena.iref[prev + r], arena.iquery[prev + r]);
                let (mut m, mut m_code) = if pm >= pi && pm >= pq {
                    (pm + s, M_FROM_M)
                } else if pi >= pq {
                    (pi + s, M_FROM_IREF)
                } else {
                    (pq + s, M_FROM_IQUERY)
                };

                // 悬空起点之后不能紧接参考空位，末端同样只在 M 状态结束
                let open = if j == 0 && !local { NEG_INF } else { arena.m[idx - 1] - go };
                let extend = arena.iref[idx - 1] - ge;
                let (mut ir, mut ir_code) =
                    if open >= extend { (open, IREF_FROM_M) } else { (extend, IREF_FROM_IREF) };

                let open = arena.m[prev + r + 1] - go;
                let extend = arena.iquery[prev + r + 1] - ge;
                let (mut iq, mut iq_code) =
                    if open >= extend { (open, IQUERY_FROM_M) } else { (extend, IQUERY_FROM_IQUERY) };

                if local {
                    for (v, code) in [(&mut m, &mut m_code), (&mut ir, &mut ir_code), (&mut iq, &mut iq_code)] {
                        if *v <= 0 {
                            *v = 0;
                            *code = DONE;
                        }
                    }
                } else {
                    for (v, code) in [(&mut m, &mut m_code), (&mut ir, &mut ir_code), (&mut iq, &mut iq_code)] {
                        if *v <= NEG_INF {
                            *v = NEG_INF;
                            *code = DONE;
                        }
                    }
                }
                arena.set(idx, (m, m_code), (ir, ir_code), (iq, iq_code));

                let candidate = local || c == qlen || j == rlen - 1;
                if candidate && m > best_score {
                    best_score = m;
                    best = Some((c, r));
                }
            }
        }

        let Some((col, row)) = best else {
            return 0;
        };
        self.best = Some(BestCell {
            col,
            row,
            raw_score: best_score,
            query_len: qlen,
            ref_offset,
            window_start: lo as usize,
        });
        best_score
    }

    /// 最近一次比对的原始分数
    pub fn raw_score(&self) -> i32 {
        self.best.map_or(0, |b| b.raw_score)
    }

    pub fn bit_score(&self) -> f64 {
        self.stats.bit_score(self.raw_score())
    }

    pub fn expected(&self) -> f64 {
        self.best.map_or(f64::INFINITY, |b| self.stats.expected(b.raw_score, self.db_length, b.query_len))
    }

    pub fn stats(&self) -> &KarlinAltschul {
        &self.stats
    }

    /// 从最近一次比对的终点回溯出完整比对；没有比对时返回 None
    pub fn alignment_by_traceback(&mut self) -> Option<AlignmentView<'_>> {
        let best = self.best?;
        let bit_score = self.bit_score();
        let expected = self.expected();
        let arena = &mut self.arena;
        let rows = arena.rows;
        arena.query_track.clear();
        arena.mid_track.clear();
        arena.ref_track.clear();

        let (mut c, mut r, mut state) = (best.col, best.row, State::Match);
        let query_end = best.col;
        let ref_end = (best.row as isize + best.col as isize + best.ref_offset) as usize + 1;
        let (mut query_start, mut ref_start) = (query_end, ref_end);
        let (mut identities, mut mismatches, mut gaps, mut gap_opens) = (0u32, 0u32, 0u32, 0u32);

        loop {
            let idx = c * rows + r;
            let code = match state {
                State::Match => arena.tb_m[idx],
                State::InsRef => arena.tb_iref[idx],
                State::InsQuery => arena.tb_iquery[idx],
            };
            if code == DONE {
                break;
            }
            let j = (r as isize + c as isize + best.ref_offset) as usize;
            match state {
                State::Match => {
                    let q = arena.query[c - 1];
                    let t = arena.reference[j - best.window_start];
                    let mid = if q.eq_ignore_ascii_case(&t) {
                        identities += 1;
                        b'|'
                    } else {
                        mismatches += 1;
                        if self.matrix.score(q, t) > 0 {
                            b'+'
                        } else {
                            b' '
                        }
                    };
                    arena.query_track.push(q);
                    arena.mid_track.push(mid);
                    arena.ref_track.push(t);
                    query_start = c - 1;
                    ref_start = j;
                    state = match code {
                        M_FROM_M => State::Match,
                        M_FROM_IREF => State::InsRef,
                        _ => State::InsQuery,
                    };
                    c -= 1;
                }
                State::InsRef => {
                    arena.query_track.push(b'-');
                    arena.mid_track.push(b' ');
                    arena.ref_track.push(arena.reference[j - best.window_start]);
                    gaps += 1;
                    if code == IREF_FROM_M {
                        gap_opens += 1;
                        state = State::Match;
                    }
                    ref_start = j;
                    r -= 1;
                }
                State::InsQuery => {
                    arena.query_track.push(arena.query[c - 1]);
                    arena.mid_track.push(b' ');
                    arena.ref_track.push(b'-');
                    gaps += 1;
                    if code == IQUERY_FROM_M {
                        gap_opens += 1;
                        state = State::Match;
                    }
                    query_start = c - 1;
                    c -= 1;
                    r += 1;
                }
            }
        }

        arena.query_track.reverse();
        arena.mid_track.reverse();
        arena.ref_track.reverse();

        let alignment = Alignment {
            raw_score: best.raw_score,
            bit_score,
            expected,
            query_start,
            query_end,
            ref_start,
            ref_end,
            identities,
            mismatches,
            gaps,
            gap_opens,
            length: arena.query_track.len() as u32,
        };
        Some(AlignmentView {
            alignment,
            query_track: &arena.query_track,
            mid_track: &arena.mid_track,
            ref_track: &arena.ref_track,
        })
    }

    /// 廉价预筛：要求锚点之后 30 个对齐位置中至少 10 个完全相同。
    /// DNA 矩阵下总是通过；剩余位置不足 30 时也通过。
    pub fn quick_check(&self, query: &[u8], reference: &[u8], query_pos: usize, ref_pos: usize) -> bool {
        if self.matrix.is_dna() {
            return true;
        }
        if query_pos + QUICK_CHECK_WINDOW > query.len() || ref_pos + QUICK_CHECK_WINDOW > reference.len() {
            return true;
        }
        let matches = query[query_pos..query_pos + QUICK_CHECK_WINDOW]
            .iter()
            .zip(&reference[ref_pos..ref_pos + QUICK_CHECK_WINDOW])
            .filter(|(a, b)| a.eq_ignore_ascii_case(b))
            .count();
        matches >= QUICK_CHECK_MIN_MATCHES
    }
}
