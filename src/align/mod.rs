//! 查询端的种子扩展：锚点收集、共线成链、带状比对和统计过滤。

pub mod chain;
pub mod matrix;
pub mod seed;
pub mod stats;
pub mod sw;

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::{HashIndexReader, ReferenceSource};
use crate::util::alphabet::SequenceType;
use crate::util::dna;

pub use chain::{chain_matches, Chain};
pub use matrix::ScoringMatrix;
pub use seed::{collect_seed_matches, SeedMatch, SeedMatches};
pub use stats::KarlinAltschul;
pub use sw::{ops_to_cigar, Alignment, AlignmentMode, AlignmentView, BandedAligner, DpArena, SwParams};

/// 比对选项。空位罚分按"第一个空位位置计 gap_open，之后每个位置计 gap_extend"解释，
/// 统计参数查表时也用同一对数值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignOpt {
    pub mode: AlignmentMode,
    pub band_width: usize,
    pub gap_open: i32,
    pub gap_extend: i32,
    /// 打分矩阵名；None 表示用 match/mismatch 的核苷酸打分
    pub matrix: Option<String>,
    pub match_score: i32,
    pub mismatch_score: i32,
    /// 同时给出 lambda 和 K 时不查表
    pub lambda: Option<f64>,
    pub k: Option<f64>,
    /// 数据库长度，0 表示取参考序列总长
    pub db_length: u64,
    pub max_hits_per_seed: usize,
    pub max_chain_gap: usize,
    pub max_chains_per_ref: usize,
    pub min_bit_score: f64,
    pub max_expected: f64,
    pub max_alignments: usize,
    pub quick_check: bool,
}

impl Default for AlignOpt {
    fn default() -> Self {
        Self {
            mode: AlignmentMode::Local,
            band_width: 4,
            gap_open: 5,
            gap_extend: 2,
            matrix: None,
            match_score: 2,
            mismatch_score: -3,
            lambda: None,
            k: None,
            db_length: 0,
            max_hits_per_seed: 100,
            max_chain_gap: 50,
            max_chains_per_ref: 5,
            min_bit_score: 0.0,
            max_expected: 10.0,
            max_alignments: 25,
            quick_check: true,
        }
    }
}

impl AlignOpt {
    /// 蛋白质默认值：BLOSUM62，11/1
    pub fn protein() -> Self {
        Self { matrix: Some("BLOSUM62".to_string()), gap_open: 11, gap_extend: 1, band_width: 8, ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.gap_open < 0 || self.gap_extend < 0 {
            return Err(Error::invalid(format!(
                "gap penalties must be non-negative, got {}/{}",
                self.gap_open, self.gap_extend
            )));
        }
        if self.matrix.is_none() && (self.match_score <= 0 || self.mismatch_score >= 0) {
            return Err(Error::invalid(format!(
                "match score {} must be positive and mismatch score {} negative",
                self.match_score, self.mismatch_score
            )));
        }
        if self.max_hits_per_seed == 0 {
            return Err(Error::invalid("max hits per seed must be positive"));
        }
        if !(self.max_expected > 0.0) {
            return Err(Error::invalid(format!("max expected {} must be positive", self.max_expected)));
        }
        Ok(())
    }

    pub fn scoring_matrix(&self) -> Result<ScoringMatrix> {
        match &self.matrix {
            Some(name) => ScoringMatrix::by_name(name),
            None => Ok(ScoringMatrix::dna(self.match_score, self.mismatch_score)),
        }
    }

    pub fn statistics(&self, matrix: &ScoringMatrix) -> Result<KarlinAltschul> {
        match (self.lambda, self.k) {
            (Some(lambda), Some(k)) => KarlinAltschul::new(lambda, k),
            (None, None) => KarlinAltschul::lookup(matrix.name(), self.gap_open, self.gap_extend),
            _ => Err(Error::invalid("lambda and K must be given together")),
        }
    }

    pub fn sw_params(&self) -> SwParams {
        SwParams {
            gap_open: self.gap_open,
            gap_extend: self.gap_extend,
            band_width: self.band_width,
            mode: self.mode,
        }
    }

    /// 按选项构造比对器；`db_length` 为 0 时取参考总长
    pub fn aligner<R: ReferenceSource + ?Sized>(&self, refs: &R) -> Result<BandedAligner> {
        self.validate()?;
        let matrix = self.scoring_matrix()?;
        let stats = self.statistics(&matrix)?;
        let db_length = if self.db_length > 0 { self.db_length } else { total_length(refs) };
        Ok(BandedAligner::new(matrix, self.sw_params(), stats, db_length))
    }
}

pub fn total_length<R: ReferenceSource + ?Sized>(refs: &R) -> u64 {
    (0..refs.num_references()).map(|id| refs.reference(id).len() as u64).sum()
}

/// 一条被接受的比对。反链（frame_rank = -1）上的查询坐标相对反向互补序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentHit {
    pub ref_id: u32,
    pub frame_rank: i8,
    pub alignment: Alignment,
    pub cigar: String,
}

impl AlignmentHit {
    fn covers(&self, ref_id: u32, anchor: &SeedMatch) -> bool {
        let a = &self.alignment;
        self.ref_id == ref_id
            && self.frame_rank == anchor.frame_rank
            && (a.query_start..a.query_end).contains(&(anchor.query_offset as usize))
            && (a.ref_start..a.ref_end).contains(&(anchor.ref_offset as usize))
    }
}

/// 对一条查询做种子扩展，结果按 bit score 从高到低。
/// DNA 索引下同时搜索正链和反向互补链。
pub fn align_query<R: ReferenceSource + ?Sized>(
    tables: &[HashIndexReader],
    refs: &R,
    aligner: &mut BandedAligner,
    query: &[u8],
    opt: &AlignOpt,
) -> Result<Vec<AlignmentHit>> {
    let Some(first) = tables.first() else {
        return Err(Error::invalid("no index tables to search"));
    };
    let mut frames: Vec<(i8, Vec<u8>)> = vec![(1, query.to_vec())];
    if first.alphabet().seq_type() == SequenceType::Dna {
        frames.push((-1, dna::revcomp(query)));
    }

    let mut matches = SeedMatches::new();
    let mut examined = 0;
    for (rank, seq) in &frames {
        examined += collect_seed_matches(tables, refs, seq, *rank, opt.max_hits_per_seed, &mut matches)?;
    }

    let mut chains: Vec<Chain> = matches
        .iter()
        .flat_map(|(&ref_id, ms)| chain_matches(ref_id, ms, opt.max_chain_gap, opt.max_chains_per_ref))
        .collect();
    chains.sort_by(|a, b| b.score.cmp(&a.score).then(a.ref_id.cmp(&b.ref_id)));

    let mut hits: Vec<AlignmentHit> = Vec::new();
    let (mut extended, mut rejected) = (0usize, 0usize);
    for chain in &chains {
        if hits.len() >= opt.max_alignments {
            break;
        }
        let anchor = chain.anchor();
        if hits.iter().any(|h| h.covers(chain.ref_id, &anchor)) {
            continue;
        }
        let seq = match frames.iter().find(|(rank, _)| *rank == anchor.frame_rank) {
            Some((_, seq)) => seq,
            None => continue,
        };
        let reference = refs.reference(chain.ref_id as usize);
        let (qpos, rpos) = (anchor.query_offset as usize, anchor.ref_offset as usize);
        if opt.quick_check && !aligner.quick_check(seq, reference, qpos, rpos) {
            rejected += 1;
            continue;
        }
        extended += 1;
        if aligner.compute_alignment(seq, reference, qpos, rpos) <= 0 {
            continue;
        }
        if aligner.bit_score() < opt.min_bit_score || aligner.expected() > opt.max_expected {
            continue;
        }
        if let Some(view) = aligner.alignment_by_traceback() {
            hits.push(AlignmentHit {
                ref_id: chain.ref_id,
                frame_rank: anchor.frame_rank,
                cigar: view.cigar(),
                alignment: view.alignment,
            });
        }
    }

    debug!(
        "query of {} letters: {} hits examined, {} chains, {} extended, {} failed quick check, {} alignments",
        query.len(),
        examined,
        chains.len(),
        extended,
        rejected,
        hits.len()
    );
    hits.sort_by(|a, b| {
        b.alignment
            .bit_score
            .total_cmp(&a.alignment.bit_score)
            .then(a.ref_id.cmp(&b.ref_id))
    });
    Ok(hits)
}

/// 并行比对多条查询，每个工作线程持有自己的比对器
pub fn align_queries<R, Q>(
    tables: &[HashIndexReader],
    refs: &R,
    queries: &[Q],
    opt: &AlignOpt,
) -> Result<Vec<Vec<AlignmentHit>>>
where
    R: ReferenceSource + ?Sized,
    Q: AsRef<[u8]> + Sync,
{
    let template = opt.aligner(refs)?;
    queries
        .par_iter()
        .map_init(|| template.clone(), |aligner, q| align_query(tables, refs, aligner, q.as_ref(), opt))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{build_index, IndexOpt, MemoryMode, SeedShape};
    use crate::util::alphabet::Alphabet;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_dna(rng: &mut StdRng, n: usize) -> Vec<u8> {
        (0..n).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
    }

    #[test]
    fn options_build_an_aligner() {
        let refs = vec!["ACGT", "ACGTAC"];
        let al = AlignOpt::default().aligner(&refs).unwrap();
        assert_eq!(al.matrix().name(), "DNA_2_3");
        assert_eq!(al.params().band_width, 4);
        AlignOpt::protein().aligner(&refs).unwrap();
        assert_eq!(total_length(&refs), 10);

        let no_stats = AlignOpt { gap_open: 9, ..AlignOpt::default() };
        assert!(matches!(no_stats.aligner(&refs), Err(Error::StatisticsLookup { .. })));
        let supplied = AlignOpt { gap_open: 9, lambda: Some(0.6), k: Some(0.4), ..AlignOpt::default() };
        supplied.aligner(&refs).unwrap();
        let half = AlignOpt { lambda: Some(0.6), ..AlignOpt::default() };
        assert!(matches!(half.aligner(&refs), Err(Error::InvalidArgument(_))));
        let bad = AlignOpt { mismatch_score: 1, ..AlignOpt::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn finds_both_strands() {
        let mut rng = StdRng::seed_from_u64(5);
        let refs: Vec<Vec<u8>> = (0..3).map(|_| random_dna(&mut rng, 400)).collect();
        let dir = tempfile::tempdir().unwrap();
        let shape: SeedShape = "1101101111".parse().unwrap();
        build_index(&refs, &[shape], &Alphabet::dna(), &IndexOpt::default(), dir.path()).unwrap();
        let tables = HashIndexReader::open_all(dir.path(), MemoryMode::Loaded).unwrap();

        let opt = AlignOpt { max_expected: 1e-6, ..AlignOpt::default() };
        let mut aligner = opt.aligner(&refs).unwrap();

        let mut forward = refs[1][100..180].to_vec();
        forward[40] = if forward[40] == b'A' { b'C' } else { b'A' };
        let hits = align_query(&tables, &refs, &mut aligner, &forward, &opt).unwrap();
        let best = &hits[0];
        assert_eq!((best.ref_id, best.frame_rank), (1, 1));
        assert_eq!((best.alignment.ref_start, best.alignment.ref_end), (100, 180));
        assert_eq!(best.alignment.mismatches, 1);
        assert_eq!(best.cigar, "80M");

        let reverse = dna::revcomp(&refs[2][200..300]);
        let hits = align_query(&tables, &refs, &mut aligner, &reverse, &opt).unwrap();
        let best = &hits[0];
        assert_eq!((best.ref_id, best.frame_rank), (2, -1));
        assert_eq!((best.alignment.ref_start, best.alignment.ref_end), (200, 300));
        assert_eq!(best.alignment.raw_score, 200);

        let unrelated = random_dna(&mut StdRng::seed_from_u64(99), 60);
        assert!(align_query(&tables, &refs, &mut aligner, &unrelated, &opt).unwrap().is_empty());

        let batch = align_queries(&tables, &refs, &[forward, reverse], &opt).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1][0].frame_rank, -1);
    }

    #[test]
    fn protein_search_through_reduced_index() {
        let refs = vec![
            "MKVLAAGIVGLLLAAQPAMAMSTNPKPQRKTKRNTNRRPQDVKFPGGGQIVGGVYLLPRRGPRLGVRATRKTSERSQPRGRRQPIPKARRPEGRTWAQPGYPWPLYGNEGCGWAGWLLSPRGSRPSWGPTDPRRRSRNLGKVIDTLTCGFADLMGYIPLVGAPLGGAARALAHGVRVLEDGVNYATGNLPGCSFSIFLLALLSCLTVPASA",
            "MSTNPKPQRKTKRNTNRRPQDVKFPGGGQIVGGVYLLPRRGPRLGVRATRKTSERSQPRGRRQPIPKARRPEGRSWAQPGYPWPLYGNEGLGWAGWLLSPRGSRPSWGPNDPRRRSRNLGKVIDTLTCGFADLMGYIPLVGAPLGGVARALAHGVRVLEDGVNYATGNLPGCSFSIFLLALLSCLTIPASA",
            "GHWWQQEEPPLLKKIIHHYYWWCCDDEEFFGGHHIIKKLLMMNNPPQQRRSSTTVVWWYY",
        ];
        let dir = tempfile::tempdir().unwrap();
        let alphabet = Alphabet::reduction("DIAMOND_11").unwrap();
        let shapes = SeedShape::protein_shapes(2).unwrap();
        build_index(&refs, &shapes, &alphabet, &IndexOpt::default(), dir.path()).unwrap();
        let tables = HashIndexReader::open_all(dir.path(), MemoryMode::Mapped).unwrap();
        assert_eq!(tables.len(), 2);

        let opt = AlignOpt::protein();
        let mut aligner = opt.aligner(&refs).unwrap();
        let query = &refs[0].as_bytes()[20..120];
        let hits = align_query(&tables, &refs, &mut aligner, query, &opt).unwrap();
        assert!(hits.iter().all(|h| h.frame_rank == 1));
        let best = &hits[0];
        assert_eq!(best.ref_id, 0);
        assert_eq!(best.alignment.identities, 100);
        assert!(hits.iter().any(|h| h.ref_id == 1));
        assert!(hits.windows(2).all(|w| w[0].alignment.bit_score >= w[1].alignment.bit_score));
    }
}
