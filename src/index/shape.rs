use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::util::alphabet::{Alphabet, SequenceType, UNDEFINED_CODE};

/// DNA 默认间隔种子（长度 24，权重 20）
pub const CANONICAL_DNA: &str = "111110111011110110111111";
/// 蛋白质默认间隔种子（长度 15，权重 12）
pub const CANONICAL_PROTEIN: &str = "111101101110111";

/// 多种子模式下使用的一组不同权重的蛋白质形状
pub const PROTEIN_SHAPES: &[&str] = &[
    "111101110111",
    "11101100101011",
    "110110010110111",
    "1111001001010111",
];

/// 间隔种子形状：由 0/1 组成的掩码，1 表示该位置参与种子。
///
/// 相同掩码串的两个形状可以互换（`Eq`/`Hash` 只看掩码串）。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeedShape {
    text: String,
    mask: Vec<bool>,
    offsets: Vec<usize>,
    first_gap: usize,
}

/// 单个种子位置的检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedCheck {
    Good(u64),
    /// 含未定义或通配字母，或越过序列末尾
    Undefined,
    /// 不同字母过少
    LowComplexity,
}

impl FromStr for SeedShape {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::parse("empty seed shape"));
        }
        let mut mask = Vec::with_capacity(s.len());
        for (i, ch) in s.bytes().enumerate() {
            match ch {
                b'1' => mask.push(true),
                b'0' => mask.push(false),
                other => {
                    return Err(Error::parse(format!(
                        "seed shape '{}': invalid character '{}' at {}",
                        s,
                        other as char,
                        i
                    )))
                }
            }
        }
        let offsets: Vec<usize> = mask.iter().enumerate().filter(|(_, &m)| m).map(|(i, _)| i).collect();
        if offsets.is_empty() {
            return Err(Error::parse(format!("seed shape '{}' selects no positions", s)));
        }
        let first_gap = mask.iter().position(|&m| !m).unwrap_or(mask.len());
        Ok(Self { text: s.to_string(), mask, offsets, first_gap })
    }
}

impl fmt::Display for SeedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl SeedShape {
    /// 每个字母表类别共用的默认形状
    pub fn canonical(seq_type: SequenceType) -> Self {
        let text = match seq_type {
            SequenceType::Dna => CANONICAL_DNA,
            SequenceType::Protein => CANONICAL_PROTEIN,
        };
        text.parse().unwrap_or_else(|e| unreachable!("built-in seed shape: {}", e))
    }

    /// 前 `count` 个多种子蛋白质形状
    pub fn protein_shapes(count: usize) -> Result<Vec<Self>> {
        if count == 0 || count > PROTEIN_SHAPES.len() {
            return Err(Error::invalid(format!(
                "between 1 and {} protein seed shapes are available, {} requested",
                PROTEIN_SHAPES.len(),
                count
            )));
        }
        PROTEIN_SHAPES[..count].iter().map(|s| s.parse()).collect()
    }

    /// 掩码宽度
    pub fn length(&self) -> usize {
        self.mask.len()
    }

    /// 掩码中 1 的个数
    pub fn weight(&self) -> usize {
        self.offsets.len()
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// 被选中位置相对于种子起点的偏移
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// 第一个 0 的位置；全 1 时等于长度
    pub fn first_gap(&self) -> usize {
        self.first_gap
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    /// 种子编码必须装得进 64 位
    pub fn check_fits(&self, alphabet: &Alphabet) -> Result<()> {
        let bits = self.weight() as u32 * alphabet.bits_per_letter();
        if bits > 64 {
            return Err(Error::capacity(format!(
                "seed shape '{}' needs {} bits with alphabet {}, at most 64 fit in a seed code",
                self.text,
                bits,
                alphabet.name()
            )));
        }
        Ok(())
    }

    /// 在未打包的编码序列上取 `pos` 处的种子编码；遇到未定义编码或越界返回 None
    #[inline]
    pub fn seed_code(&self, codes: &[u8], pos: usize, bits: u32) -> Option<u64> {
        if pos + self.length() > codes.len() {
            return None;
        }
        let window = &codes[pos..];
        let mut code = 0u64;
        for &off in &self.offsets {
            let c = window[off];
            if c == UNDEFINED_CODE {
                return None;
            }
            code = (code << bits) | c as u64;
        }
        Some(code)
    }

    /// 判断 `pos` 处是否为可索引的"好"种子：无未定义/通配字母，且不同字母数足够
    pub fn check(&self, codes: &[u8], pos: usize, alphabet: &Alphabet) -> SeedCheck {
        if pos + self.length() > codes.len() {
            return SeedCheck::Undefined;
        }
        let bits = alphabet.bits_per_letter();
        let window = &codes[pos..];
        let mut code = 0u64;
        let mut seen = 0u32;
        for &off in &self.offsets {
            let c = window[off];
            if c == UNDEFINED_CODE || alphabet.is_wildcard(c) {
                return SeedCheck::Undefined;
            }
            seen |= 1 << c;
            code = (code << bits) | c as u64;
        }
        if seen.count_ones() < alphabet.min_distinct_letters() {
            SeedCheck::LowComplexity
        } else {
            SeedCheck::Good(code)
        }
    }

    /// 直接在字母序列上检查种子，查询端校验候选命中时使用
    pub fn check_letters(&self, letters: &[u8], alphabet: &Alphabet) -> SeedCheck {
        if letters.len() < self.length() {
            return SeedCheck::Undefined;
        }
        let codes: Vec<u8> = letters[..self.length()].iter().map(|&b| alphabet.code(b)).collect();
        self.check(&codes, 0, alphabet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_shape_properties() {
        let s: SeedShape = "1101001".parse().unwrap();
        assert_eq!(s.length(), 7);
        assert_eq!(s.weight(), 4);
        assert_eq!(s.first_gap(), 2);
        assert_eq!(s.offsets(), &[0, 1, 3, 6]);
        assert_eq!(s.to_string(), "1101001");

        let solid: SeedShape = "1111".parse().unwrap();
        assert_eq!(solid.first_gap(), 4);
    }

    #[test]
    fn invalid_shapes_are_parse_errors() {
        for bad in ["", "0000", "11a1", "1 1"] {
            match bad.parse::<SeedShape>() {
                Err(Error::Parse(_)) => {}
                other => panic!("expected parse error for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn identical_strings_are_equal() {
        let a: SeedShape = CANONICAL_DNA.parse().unwrap();
        assert_eq!(a, SeedShape::canonical(SequenceType::Dna));
        assert_ne!(a, SeedShape::canonical(SequenceType::Protein));
        assert_eq!(SeedShape::canonical(SequenceType::Dna).weight(), 20);
        assert_eq!(SeedShape::protein_shapes(4).unwrap().len(), 4);
        assert!(SeedShape::protein_shapes(9).is_err());
    }

    #[test]
    fn canonical_shapes_fit_their_alphabets() {
        SeedShape::canonical(SequenceType::Dna).check_fits(&Alphabet::dna()).unwrap();
        SeedShape::canonical(SequenceType::Protein).check_fits(&Alphabet::protein()).unwrap();
        let wide: SeedShape = "1".repeat(22).parse().unwrap();
        assert!(matches!(wide.check_fits(&Alphabet::dna()), Err(Error::Capacity(_))));
    }

    #[test]
    fn seed_check_classification() {
        let dna = Alphabet::dna();
        let shape: SeedShape = "11011".parse().unwrap();
        let bits = dna.bits_per_letter();

        let codes = dna.codes(b"ACGTA");
        let expected = [1u64, 2, 4, 1].iter().fold(0, |acc, &c| (acc << bits) | c);
        assert_eq!(shape.check(&codes, 0, &dna), SeedCheck::Good(expected));

        assert_eq!(shape.check(&dna.codes(b"AAGAA"), 0, &dna), SeedCheck::LowComplexity);
        // 未选中位置上的 N 不影响
        assert!(matches!(shape.check(&dna.codes(b"ACNTA"), 0, &dna), SeedCheck::Good(_)));
        assert_eq!(shape.check(&dna.codes(b"ANGTA"), 0, &dna), SeedCheck::Undefined);
        assert_eq!(shape.check(&dna.codes(b"ACGT"), 0, &dna), SeedCheck::Undefined);
        assert_eq!(shape.seed_code(&dna.codes(b"ACGTA"), 0, bits), Some(expected));
        assert_eq!(shape.check_letters(b"acgta", &dna), SeedCheck::Good(expected));
    }
}
