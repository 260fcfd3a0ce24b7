use std::collections::BTreeSet;
use std::fs;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use seedalign::align::{align_query, AlignOpt, AlignmentMode, BandedAligner, KarlinAltschul, ScoringMatrix, SwParams};
use seedalign::index::shape::SeedCheck;
use seedalign::index::{build_index, format, HashIndexReader, IndexOpt, MemoryMode, RefHit, SeedShape};
use seedalign::util::alphabet::{Alphabet, SequenceType};
use seedalign::util::codec::SequenceCodec;
use seedalign::util::dna;
use seedalign::Error;

const MODES: [MemoryMode; 3] = [MemoryMode::Loaded, MemoryMode::Paged, MemoryMode::Mapped];

/// 约每 200 个字母一个 N
fn random_dna(rng: &mut StdRng, n: usize) -> Vec<u8> {
    (0..n)
        .map(|_| if rng.gen_ratio(1, 200) { b'N' } else { b"ACGT"[rng.gen_range(0..4)] })
        .collect()
}

fn random_acgt(rng: &mut StdRng, n: usize) -> Vec<u8> {
    (0..n).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
}

#[test]
fn every_indexed_seed_is_found_in_every_mode() {
    let mut rng = StdRng::seed_from_u64(2024);
    let refs: Vec<Vec<u8>> = (0..12).map(|i| random_dna(&mut rng, 300 + 40 * i)).collect();
    let alphabet = Alphabet::dna();
    let shape = SeedShape::canonical(SequenceType::Dna);
    let dir = tempfile::tempdir().unwrap();
    let opt = IndexOpt { threads: 3, ..IndexOpt::default() };
    let reports = build_index(&refs, &[shape.clone()], &alphabet, &opt, dir.path()).unwrap();
    assert_eq!(reports[0].references, 12);

    // 期望：每个好种子编码 -> 它出现的所有 (ref, pos)
    let mut expected: std::collections::HashMap<u64, BTreeSet<RefHit>> = Default::default();
    for (id, r) in refs.iter().enumerate() {
        let codes = alphabet.codes(r);
        for pos in 0..=codes.len() - shape.length() {
            if let SeedCheck::Good(code) = shape.check(&codes, pos, &alphabet) {
                expected.entry(code).or_default().insert(RefHit::new(id as u32, pos as u32));
            }
        }
    }
    assert_eq!(reports[0].seeds_indexed as usize, expected.values().map(BTreeSet::len).sum::<usize>());

    for mode in MODES {
        let reader = HashIndexReader::open(dir.path(), 0, mode).unwrap();
        assert_eq!(reader.seed_shape(), &shape);
        assert_eq!(reader.alphabet().seq_type(), SequenceType::Dna);
        for (code, hits) in &expected {
            let found: BTreeSet<RefHit> = reader.lookup(*code).unwrap().into_iter().collect();
            assert!(hits.is_subset(&found), "mode {} code {:x}", mode, code);
        }
        reader.close();
    }
}

#[test]
fn packed_seed_codes_agree_with_the_index() {
    let mut rng = StdRng::seed_from_u64(8);
    let refs: Vec<Vec<u8>> = (0..4).map(|_| random_dna(&mut rng, 500)).collect();
    let alphabet = Alphabet::dna();
    let shape: SeedShape = "1110110111".parse().unwrap();
    let dir = tempfile::tempdir().unwrap();
    build_index(&refs, &[shape.clone()], &alphabet, &IndexOpt::default(), dir.path()).unwrap();
    let reader = HashIndexReader::open(dir.path(), 0, MemoryMode::Paged).unwrap();

    let codec = SequenceCodec::new(&alphabet);
    let enc = codec.encode(&refs[3]);
    assert_eq!(codec.decode(&enc), alphabet.normalize_seq(&refs[3]));
    for pos in 0..=refs[3].len() - shape.length() {
        let codes = alphabet.codes(&refs[3]);
        if let SeedCheck::Good(code) = shape.check(&codes, pos, &alphabet) {
            assert_eq!(codec.seed_code(&shape, &enc, pos, u64::MAX), code);
            assert!(reader.lookup(code).unwrap().contains(&RefHit::new(3, pos as u32)));
        }
    }
}

#[test]
fn over_full_seeds_are_absent_not_truncated() {
    let repeat = b"ACGTTGCAAC".repeat(30);
    let refs = vec![repeat.clone(), repeat];
    let alphabet = Alphabet::dna();
    let dir = tempfile::tempdir().unwrap();
    let opt = IndexOpt { max_hits_per_hash: 10, ..IndexOpt::default() };
    let reports = build_index(&refs, &["11111".parse().unwrap()], &alphabet, &opt, dir.path()).unwrap();
    assert!(reports[0].buckets_dropped > 0);

    for mode in MODES {
        let reader = HashIndexReader::open(dir.path(), 0, mode).unwrap();
        assert!(reader.lookup_letters(b"ACGTT").unwrap().is_empty());
        assert!(reader.lookup_letters(b"TTGCA").unwrap().is_empty());
    }
}

#[test]
fn rebuilds_replace_tables_and_damage_is_detected() {
    let refs = vec!["ACGTTGCAAGCTTACGGATCCTTAGACGTTGCAAGGT"];
    let alphabet = Alphabet::dna();
    let dir = tempfile::tempdir().unwrap();
    let two: Vec<SeedShape> = vec!["11011".parse().unwrap(), "1110111".parse().unwrap()];
    build_index(&refs, &two, &alphabet, &IndexOpt::default(), dir.path()).unwrap();
    assert_eq!(HashIndexReader::open_all(dir.path(), MemoryMode::Loaded).unwrap().len(), 2);

    build_index(&refs, &two[..1], &alphabet, &IndexOpt::default(), dir.path()).unwrap();
    assert_eq!(HashIndexReader::open_all(dir.path(), MemoryMode::Loaded).unwrap().len(), 1);
    assert!(!format::header_path(dir.path(), 1).exists());

    let header = format::header_path(dir.path(), 0);
    let mut bytes = fs::read(&header).unwrap();
    bytes[0] ^= 0xff;
    fs::write(&header, bytes).unwrap();
    assert!(matches!(HashIndexReader::open(dir.path(), 0, MemoryMode::Mapped), Err(Error::Parse(_))));
}

#[test]
fn query_search_in_every_memory_mode() {
    let mut rng = StdRng::seed_from_u64(77);
    let refs: Vec<Vec<u8>> = (0..6).map(|_| random_acgt(&mut rng, 600)).collect();
    let dir = tempfile::tempdir().unwrap();
    let shapes: Vec<SeedShape> = vec!["110110111011".parse().unwrap(), "1111011101".parse().unwrap()];
    build_index(&refs, &shapes, &Alphabet::dna(), &IndexOpt::default(), dir.path()).unwrap();

    let mut read = refs[4][250..370].to_vec();
    read[60] = if read[60] == b'G' { b'T' } else { b'G' };
    read.remove(90);
    let read = dna::revcomp(&read);
    let opt = AlignOpt { band_width: 6, max_expected: 1e-10, ..AlignOpt::default() };

    for mode in MODES {
        let tables = HashIndexReader::open_all(dir.path(), mode).unwrap();
        let mut aligner = opt.aligner(&refs).unwrap();
        let hits = align_query(&tables, &refs, &mut aligner, &read, &opt).unwrap();
        let best = &hits[0];
        assert_eq!((best.ref_id, best.frame_rank), (4, -1), "mode {}", mode);
        assert_eq!(best.alignment.ref_start, 250);
        assert_eq!(best.alignment.ref_end, 370);
        assert_eq!(best.alignment.gaps, 1);
        assert_eq!(best.alignment.length, 120);
    }
}

#[test]
fn documented_alignment_scenarios() {
    let params = SwParams { gap_open: 7, gap_extend: 3, band_width: 4, mode: AlignmentMode::Local };
    let stats = KarlinAltschul::new(0.625, 0.41).unwrap();
    let mut aligner = BandedAligner::new(ScoringMatrix::dna(2, -3), params, stats, 10_000);

    let q = b"ACGTACGTACGT";
    assert_eq!(aligner.compute_alignment(q, q, 0, 0), 24);
    let perfect = aligner.alignment_by_traceback().unwrap().alignment;
    assert_eq!((perfect.gaps, perfect.identities, perfect.length), (0, 12, 12));

    let mut m = q.to_vec();
    m[6] = b'A';
    assert_eq!(aligner.compute_alignment(&m, q, 0, 0), 24 - 5);

    // 半全局在反向互补下得分不变
    let mut semi = BandedAligner::new(
        ScoringMatrix::dna(2, -3),
        SwParams { mode: AlignmentMode::SemiGlobal, ..params },
        stats,
        10_000,
    );
    let reference = b"TTGACCATGCAGGTACCGATGCATGCAAGTCCGATGGATCCAGTT";
    let query = b"GCAGGTACCGTTGCATGCAAGTC";
    let fwd = semi.compute_alignment(query, reference, 0, 8);
    let back = semi.compute_alignment(&dna::revcomp(query), &dna::revcomp(reference), 0, reference.len() - 8 - query.len());
    assert!(fwd > 0);
    assert_eq!(fwd, back);
}
