//! Karlin–Altschul 统计：bit score 与期望值。
//!
//! bit = (λ·S − ln K) / ln 2，E = 库长 · 查询长 · 2^(−bit)

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// (gap_open, gap_extend, λ, K)
type Entry = (i32, i32, f64, f64);

// 带空位参数，取自 NCBI blast_stat.c
const BLOSUM62: &[Entry] = &[
    (11, 2, 0.297, 0.082),
    (10, 2, 0.291, 0.075),
    (9, 2, 0.279, 0.058),
    (8, 2, 0.264, 0.045),
    (7, 2, 0.239, 0.027),
    (6, 2, 0.201, 0.012),
    (13, 1, 0.292, 0.071),
    (12, 1, 0.283, 0.059),
    (11, 1, 0.267, 0.041),
    (10, 1, 0.243, 0.024),
    (9, 1, 0.206, 0.010),
];

const DNA_1_2: &[Entry] = &[(2, 2, 1.33, 0.62), (1, 2, 1.30, 0.52), (0, 2, 1.19, 0.34), (3, 1, 1.32, 0.57), (2, 1, 1.29, 0.49)];

const DNA_1_3: &[Entry] = &[(2, 2, 1.37, 0.70), (1, 2, 1.35, 0.64), (0, 2, 1.25, 0.42), (2, 1, 1.34, 0.60), (1, 1, 1.21, 0.34)];

const DNA_2_3: &[Entry] = &[
    (4, 4, 0.63, 0.42),
    (2, 4, 0.615, 0.37),
    (0, 4, 0.55, 0.21),
    (3, 3, 0.615, 0.37),
    (6, 2, 0.63, 0.42),
    (5, 2, 0.625, 0.41),
    (4, 2, 0.61, 0.35),
    (2, 2, 0.515, 0.14),
];

const TABLES: &[(&str, &[Entry])] = &[
    ("BLOSUM62", BLOSUM62),
    ("DNA_1_2", DNA_1_2),
    ("DNA_1_3", DNA_1_3),
    ("DNA_2_3", DNA_2_3),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KarlinAltschul {
    pub lambda: f64,
    pub k: f64,
}

impl KarlinAltschul {
    pub fn new(lambda: f64, k: f64) -> Result<Self> {
        if !(lambda > 0.0 && k > 0.0) {
            return Err(Error::invalid(format!("lambda {} and K {} must be positive", lambda, k)));
        }
        Ok(Self { lambda, k })
    }

    /// 按矩阵名和两个空位罚分精确查表，查不到时报错而不是退回默认值
    pub fn lookup(matrix: &str, gap_open: i32, gap_extend: i32) -> Result<Self> {
        let upper = matrix.to_ascii_uppercase();
        TABLES
            .iter()
            .find(|(name, _)| *name == upper)
            .and_then(|(_, entries)| entries.iter().find(|e| e.0 == gap_open && e.1 == gap_extend))
            .map(|&(_, _, lambda, k)| Self { lambda, k })
            .ok_or_else(|| Error::StatisticsLookup { matrix: matrix.to_string(), gap_open, gap_extend })
    }

    pub fn bit_score(&self, raw_score: i32) -> f64 {
        (self.lambda * raw_score as f64 - self.k.ln()) / std::f64::consts::LN_2
    }

    /// `bit_score` 的精确反函数
    pub fn raw_score_for_bit_score(&self, bit_score: f64) -> f64 {
        (bit_score * std::f64::consts::LN_2 + self.k.ln()) / self.lambda
    }

    pub fn expected(&self, raw_score: i32, db_length: u64, query_length: usize) -> f64 {
        db_length as f64 * query_length as f64 * (-self.bit_score(raw_score)).exp2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::matrix::ScoringMatrix;

    #[test]
    fn lookup_requires_exact_match() {
        let ka = KarlinAltschul::lookup("blosum62", 11, 1).unwrap();
        assert_eq!(ka, KarlinAltschul { lambda: 0.267, k: 0.041 });
        assert!(KarlinAltschul::lookup("DNA_2_3", 5, 2).is_ok());
        match KarlinAltschul::lookup("BLOSUM62", 11, 3) {
            Err(Error::StatisticsLookup { matrix, gap_open, gap_extend }) => {
                assert_eq!((matrix.as_str(), gap_open, gap_extend), ("BLOSUM62", 11, 3));
            }
            other => panic!("{:?}", other),
        }
        assert!(KarlinAltschul::lookup("NOPE", 11, 1).is_err());
    }

    #[test]
    fn every_table_is_reachable_from_a_matrix() {
        for (name, entries) in TABLES {
            let matrix = match name.strip_prefix("DNA_") {
                Some(pair) => {
                    let (m, mm) = pair.split_once('_').unwrap();
                    ScoringMatrix::dna(m.parse().unwrap(), -mm.parse::<i32>().unwrap())
                }
                None => ScoringMatrix::by_name(name).unwrap(),
            };
            assert_eq!(matrix.name(), *name);
            for &(gap_open, gap_extend, lambda, k) in *entries {
                let ka = KarlinAltschul::lookup(matrix.name(), gap_open, gap_extend).unwrap();
                assert_eq!(ka, KarlinAltschul { lambda, k });
            }
        }
    }

    #[test]
    fn bit_score_inverse() {
        let ka = KarlinAltschul::new(0.267, 0.041).unwrap();
        for raw in [0, 1, 37, 250] {
            let back = ka.raw_score_for_bit_score(ka.bit_score(raw));
            assert!((back - raw as f64).abs() < 1e-9);
        }
        let expected_bits = (0.267 * 100.0 - 0.041f64.ln()) / 2f64.ln();
        assert!((ka.bit_score(100) - expected_bits).abs() < 1e-12);
    }

    #[test]
    fn expected_strictly_decreases_with_score() {
        let ka = KarlinAltschul::new(0.625, 0.41).unwrap();
        let mut last = f64::INFINITY;
        for raw in 0..200 {
            let e = ka.expected(raw, 1_000_000, 150);
            assert!(e < last, "raw {}", raw);
            last = e;
        }
        assert!(KarlinAltschul::new(0.0, 0.1).is_err());
    }
}
