//! 演示如何在 library 模式下使用 seedalign：建索引、查种子、带状比对。
//!
//! 运行方式：
//! ```bash
//! cargo run --example simple_align
//! ```

use seedalign::align::{self, AlignOpt, AlignmentMode};
use seedalign::index::{build_index, HashIndexReader, IndexOpt, MemoryMode, SeedShape};
use seedalign::util::alphabet::Alphabet;
use seedalign::util::dna;

fn main() -> seedalign::Result<()> {
    // 1. 参考序列
    let refs = vec![
        "ACGTACGTAGCTGATCGTAGCTAGCTAGCTGATCGTAGCTAGCTAGCTGATTTGACCATGCAGGT",
        "TTGACCATGCAGGTACCGATGCATGCAAGTCCGATGGATCCAGTTGACCTAGGCATCGATCGAA",
    ];
    println!("参考序列: {} 条", refs.len());

    // 2. 建索引：一张 DNA 表，间隔种子 11011011011
    let dir = tempfile::tempdir()?;
    let shape: SeedShape = "11011011011".parse()?;
    let reports = build_index(&refs, &[shape], &Alphabet::dna(), &IndexOpt::default(), dir.path())?;
    println!("索引构建完成：\n{}", reports[0]);

    // 3. 种子查找
    let tables = HashIndexReader::open_all(dir.path(), MemoryMode::Mapped)?;
    let window = b"GCATGCAAGTCCGAT";
    let hits = tables[0].lookup_letters(window)?;
    println!("\n种子 '{}' 命中 {} 处", String::from_utf8_lossy(&window[..11]), hits.len());
    for h in &hits {
        println!("  ref={}, pos={}", h.ref_id, h.pos);
    }

    // 4. 单对序列的带状比对
    let opt = AlignOpt { band_width: 8, ..AlignOpt::default() };
    let mut aligner = opt.aligner(&refs)?;
    let query = b"GCTAGCTAGCTGATCGTAGCTTGCTAGCTGAT";
    let raw = aligner.compute_alignment(query, refs[0].as_bytes(), 0, 19);
    println!("\n局部比对：raw={} bits={:.1} E={:.2e}", raw, aligner.bit_score(), aligner.expected());
    if let Some(view) = aligner.alignment_by_traceback() {
        println!("  Query: {}", String::from_utf8_lossy(view.query_track));
        println!("         {}", String::from_utf8_lossy(view.mid_track));
        println!("  Ref:   {}", String::from_utf8_lossy(view.ref_track));
        println!("  CIGAR: {}", view.cigar());
    }

    // 5. 半全局模式
    let semi = AlignOpt { mode: AlignmentMode::SemiGlobal, ..opt.clone() };
    let mut semi_aligner = semi.aligner(&refs)?;
    let raw = semi_aligner.compute_alignment(query, refs[0].as_bytes(), 0, 19);
    println!("半全局比对：raw={}", raw);

    // 6. 完整的种子扩展（两条链）
    let read = dna::revcomp(&refs[1].as_bytes()[10..50]);
    for hit in align::align_query(&tables, &refs, &mut aligner, &read, &opt)? {
        let a = &hit.alignment;
        println!(
            "  ref={} frame={} q=[{}, {}) r=[{}, {}) bits={:.1} cigar={}",
            hit.ref_id, hit.frame_rank, a.query_start, a.query_end, a.ref_start, a.ref_end, a.bit_score, hit.cigar
        );
    }

    println!("\n完成！");
    Ok(())
}
