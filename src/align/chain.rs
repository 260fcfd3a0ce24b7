use std::collections::HashSet;

use super::seed::SeedMatch;

/// 同一参考、同一框上的一串共线锚点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub ref_id: u32,
    pub frame_rank: i8,
    pub matches: Vec<SeedMatch>,
    /// 锚点覆盖的查询字母数
    pub score: u32,
}

impl Chain {
    /// 用作比对锚点的种子：链中间的那个
    pub fn anchor(&self) -> SeedMatch {
        self.matches[self.matches.len() / 2]
    }

    /// 查询上的覆盖区间 [begin, end)
    pub fn query_span(&self) -> (u32, u32) {
        let first = self.matches[0];
        let last = self.matches[self.matches.len() - 1];
        (first.query_offset, last.query_offset + last.seed_length as u32)
    }
}

#[inline]
fn can_precede(prev: &SeedMatch, next: &SeedMatch, max_gap: i64) -> bool {
    if prev.frame_rank != next.frame_rank
        || prev.query_offset >= next.query_offset
        || prev.ref_offset >= next.ref_offset
    {
        return false;
    }
    let gap_q = next.query_offset as i64 - (prev.query_offset as i64 + prev.seed_length as i64);
    let gap_r = next.ref_offset as i64 - (prev.ref_offset as i64 + prev.seed_length as i64);
    gap_q <= max_gap && gap_r <= max_gap && (next.diagonal() - prev.diagonal()).abs() <= max_gap
}

/// 从锚点集合中找出覆盖查询最多的一条链（DP）
pub fn best_chain(ref_id: u32, matches: &[SeedMatch], max_gap: usize) -> Option<Chain> {
    if matches.is_empty() {
        return None;
    }
    let max_gap = max_gap as i64;

    let mut idxs: Vec<usize> = (0..matches.len()).collect();
    idxs.sort_by_key(|&i| {
        let m = &matches[i];
        (m.frame_rank, m.query_offset, m.ref_offset)
    });

    let n = idxs.len();
    let mut dp: Vec<u32> = vec![0; n];
    let mut prev: Vec<Option<usize>> = vec![None; n];
    let mut best_t: Option<usize> = None;

    for (t, &i) in idxs.iter().enumerate() {
        let mi = &matches[i];
        dp[t] = mi.seed_length as u32;

        for (u, &j) in idxs[..t].iter().enumerate() {
            let mj = &matches[j];
            if !can_precede(mj, mi, max_gap) {
                continue;
            }
            // 重叠部分只计一次
            let added = (mi.query_offset - mj.query_offset).min(mi.seed_length as u32);
            let cand = dp[u] + added;
            if cand > dp[t] {
                dp[t] = cand;
                prev[t] = Some(u);
            }
        }

        if best_t.map_or(true, |b| dp[t] > dp[b]) {
            best_t = Some(t);
        }
    }

    let best_t = best_t?;
    let mut chain_idxs = Vec::new();
    let mut cur = Some(best_t);
    while let Some(t) = cur {
        chain_idxs.push(idxs[t]);
        cur = prev[t];
    }
    chain_idxs.reverse();

    let first = matches[chain_idxs[0]];
    Some(Chain {
        ref_id,
        frame_rank: first.frame_rank,
        matches: chain_idxs.into_iter().map(|i| matches[i]).collect(),
        score: dp[best_t],
    })
}

/// 贪心剥离出至多 `max_chains` 条链，按得分从高到低
pub fn chain_matches(ref_id: u32, matches: &[SeedMatch], max_gap: usize, max_chains: usize) -> Vec<Chain> {
    let mut remaining = matches.to_vec();
    let mut chains = Vec::new();
    while chains.len() < max_chains {
        let Some(chain) = best_chain(ref_id, &remaining, max_gap) else {
            break;
        };
        let used: HashSet<SeedMatch> = chain.matches.iter().copied().collect();
        remaining.retain(|m| !used.contains(m));
        chains.push(chain);
    }
    chains.sort_by(|a, b| b.score.cmp(&a.score));
    chains
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(q: u32, r: u32) -> SeedMatch {
        SeedMatch::new(q, r, 1, 5)
    }

    #[test]
    fn co_linear_matches_form_one_chain() {
        let matches = vec![m(0, 100), m(1, 101), m(2, 102), m(20, 121), m(5, 400)];
        let chain = best_chain(7, &matches, 30).unwrap();
        assert_eq!(chain.ref_id, 7);
        assert_eq!(chain.matches, vec![m(0, 100), m(1, 101), m(2, 102), m(20, 121)]);
        // 5 + 1 + 1 + 5
        assert_eq!(chain.score, 12);
        assert_eq!(chain.query_span(), (0, 25));
        assert_eq!(chain.anchor(), m(2, 102));
    }

    #[test]
    fn gaps_and_frames_break_chains() {
        let far = vec![m(0, 100), m(200, 300)];
        assert_eq!(best_chain(0, &far, 50).unwrap().matches.len(), 1);

        let mut other_frame = m(10, 110);
        other_frame.frame_rank = -1;
        let mixed = vec![m(0, 100), other_frame];
        assert_eq!(best_chain(0, &mixed, 50).unwrap().matches.len(), 1);
        assert!(best_chain(0, &[], 50).is_none());
    }

    #[test]
    fn peels_chains_by_score() {
        let matches = vec![m(0, 100), m(6, 106), m(12, 112), m(0, 500), m(30, 900)];
        let chains = chain_matches(3, &matches, 20, 10);
        assert_eq!(chains.len(), 3);
        assert_eq!(chains[0].matches.len(), 3);
        assert_eq!(chains[0].score, 15);
        assert!(chains[1..].iter().all(|c| c.score == 5));
        let total: usize = chains.iter().map(|c| c.matches.len()).sum();
        assert_eq!(total, matches.len());

        assert_eq!(chain_matches(3, &matches, 20, 1).len(), 1);
    }
}
