use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 0 号编码保留给"未定义/哨兵"字母
pub const UNDEFINED_CODE: u8 = 0;
/// 未定义字母解码后的显示字符
pub const UNDEFINED_LETTER: u8 = b'?';

const DNA_DEFINITION: &str = "A C G T N";
const PROTEIN_DEFINITION: &str = "A R N D C Q E G H I L K M F P S T W Y V X";

/// 内置蛋白质约简字母表（名称，字母分组）
const REDUCTIONS: &[(&str, &str)] = &[
    ("GBMR4", "ADKERNTSQ YFLIVMCWH G P"),
    ("SDM12", "A D KER N TSQ YF LIVM C W H G P"),
    ("HSDM17", "A D KE R N T S Q Y F LIV M C W H G P"),
    ("BLOSUM50_4", "LVIMC AGSTPFYW EDNQ KRH"),
    ("BLOSUM50_8", "LVIMC AG ST P FYW EDNQ KR H"),
    ("BLOSUM50_10", "LVIM C A G ST P FYW EDNQ KR H"),
    ("BLOSUM50_15", "LVIM C A G S T P FY W E D N Q KR H"),
    ("DIAMOND_11", "KREDQN C G H ILV M F Y W P STA"),
];

pub const DEFAULT_REDUCTION: &str = "DIAMOND_11";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequenceType {
    Dna,
    Protein,
}

impl SequenceType {
    /// 索引头中的 int32 标记
    pub fn tag(self) -> i32 {
        match self {
            SequenceType::Dna => 0,
            SequenceType::Protein => 1,
        }
    }

    pub fn from_tag(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(SequenceType::Dna),
            1 => Ok(SequenceType::Protein),
            other => Err(Error::parse(format!("unknown sequence type tag {}", other))),
        }
    }

    /// 一个"好"种子至少需要的不同字母数
    pub fn min_distinct_letters(self) -> u32 {
        match self {
            SequenceType::Dna => 2,
            SequenceType::Protein => 3,
        }
    }
}

/// 不可变字母表：原始字节 -> (显示字母, 编码 1..=size)，0 为未定义。
///
/// 由字母分组定义串构造（空白分隔的组，每组第一个字母作为显示字母），
/// 构造后只读，可在线程间共享。约简字母表额外携带一张从完整蛋白质
/// 字母表编码到本字母表编码的转换表，种子提取时可以直接复用按完整
/// 蛋白质字母表编码的序列。
#[derive(Debug, Clone)]
pub struct Alphabet {
    name: String,
    seq_type: SequenceType,
    groups: Vec<Vec<u8>>,
    code_of: [u8; 256],
    letter_of_code: Vec<u8>,
    wildcard: u8,
    bits_per_letter: u32,
    letters_per_word: u32,
    translation: Option<Vec<u8>>,
}

impl PartialEq for Alphabet {
    fn eq(&self, other: &Self) -> bool {
        self.seq_type == other.seq_type && self.groups == other.groups && self.wildcard == other.wildcard
    }
}

impl Eq for Alphabet {}

impl Alphabet {
    /// 从分组定义构造字母表。
    ///
    /// `aliases` 把额外的输入字母并入已有字母（例如 `U` -> `T`），
    /// `wildcard` 指定通配字母：它有正常编码（不影响打包长度），但不允许出现在好种子中。
    pub fn from_definition(
        name: &str,
        seq_type: SequenceType,
        definition: &str,
        aliases: &[(u8, u8)],
        wildcard: Option<u8>,
    ) -> Result<Self> {
        let groups: Vec<Vec<u8>> = definition
            .split_whitespace()
            .map(|g| g.bytes().map(|b| b.to_ascii_uppercase()).collect())
            .collect();
        if groups.is_empty() {
            return Err(Error::parse(format!("alphabet '{}' has no letter groups", name)));
        }
        if groups.len() > 31 {
            return Err(Error::parse(format!(
                "alphabet '{}' has {} groups, at most 31 are supported",
                name,
                groups.len()
            )));
        }

        let mut code_of = [UNDEFINED_CODE; 256];
        let mut letter_of_code = vec![UNDEFINED_LETTER];
        for (i, group) in groups.iter().enumerate() {
            let code = (i + 1) as u8;
            for &letter in group {
                if !letter.is_ascii_alphabetic() {
                    return Err(Error::parse(format!(
                        "alphabet '{}': invalid letter '{}'",
                        name,
                        letter as char
                    )));
                }
                if code_of[letter as usize] != UNDEFINED_CODE {
                    return Err(Error::parse(format!(
                        "alphabet '{}': letter '{}' appears in more than one group",
                        name,
                        letter as char
                    )));
                }
                code_of[letter as usize] = code;
                code_of[letter.to_ascii_lowercase() as usize] = code;
            }
            letter_of_code.push(group[0]);
        }

        for &(from, to) in aliases {
            let code = code_of[to as usize];
            if code == UNDEFINED_CODE {
                return Err(Error::parse(format!(
                    "alphabet '{}': alias target '{}' is not a letter",
                    name,
                    to as char
                )));
            }
            code_of[from.to_ascii_uppercase() as usize] = code;
            code_of[from.to_ascii_lowercase() as usize] = code;
        }

        let wildcard = match wildcard {
            Some(w) => {
                let code = code_of[w as usize];
                if code == UNDEFINED_CODE {
                    return Err(Error::parse(format!(
                        "alphabet '{}': wildcard '{}' is not a letter",
                        name,
                        w as char
                    )));
                }
                code
            }
            None => UNDEFINED_CODE,
        };

        let size = groups.len() as u32;
        // ceil(log2(size + 1))
        let bits_per_letter = 32 - size.leading_zeros();
        Ok(Self {
            name: name.to_string(),
            seq_type,
            groups,
            code_of,
            letter_of_code,
            wildcard,
            bits_per_letter,
            letters_per_word: 64 / bits_per_letter,
            translation: None,
        })
    }

    /// DNA-5：A C G T 以及通配 N；U 视作 T，IUPAC 简并碱基并入 N
    pub fn dna() -> Self {
        const ALIASES: &[(u8, u8)] = &[
            (b'U', b'T'),
            (b'R', b'N'),
            (b'Y', b'N'),
            (b'K', b'N'),
            (b'M', b'N'),
            (b'S', b'N'),
            (b'W', b'N'),
            (b'B', b'N'),
            (b'D', b'N'),
            (b'H', b'N'),
            (b'V', b'N'),
        ];
        Self::from_definition("DNA5", SequenceType::Dna, DNA_DEFINITION, ALIASES, Some(b'N'))
            .unwrap_or_else(|e| unreachable!("built-in DNA alphabet: {}", e))
    }

    /// 完整蛋白质字母表：20 种氨基酸加通配 X
    pub fn protein() -> Self {
        const ALIASES: &[(u8, u8)] = &[(b'B', b'X'), (b'Z', b'X'), (b'J', b'X'), (b'O', b'X'), (b'U', b'X')];
        Self::from_definition("PROTEIN", SequenceType::Protein, PROTEIN_DEFINITION, ALIASES, Some(b'X'))
            .unwrap_or_else(|e| unreachable!("built-in protein alphabet: {}", e))
    }

    /// 按分组定义构造蛋白质约简字母表，并生成完整蛋白质编码到约简编码的转换表。
    /// 不在任何分组中的字母（包括 X）编码为未定义。
    pub fn reduced(name: &str, definition: &str) -> Result<Self> {
        let mut reduced = Self::from_definition(name, SequenceType::Protein, definition, &[], None)?;
        let full = Self::protein();
        for group in &reduced.groups {
            for &letter in group {
                if full.code(letter) == UNDEFINED_CODE || full.is_wildcard(full.code(letter)) {
                    return Err(Error::parse(format!(
                        "reduction '{}': '{}' is not an amino acid",
                        name,
                        letter as char
                    )));
                }
            }
        }
        let translation = full
            .letter_of_code
            .iter()
            .enumerate()
            .map(|(code, &letter)| if code == 0 { UNDEFINED_CODE } else { reduced.code(letter) })
            .collect();
        reduced.translation = Some(translation);
        Ok(reduced)
    }

    /// 按名称取内置约简；`UNREDUCED` 返回完整蛋白质字母表
    pub fn reduction(name: &str) -> Result<Self> {
        let upper = name.to_ascii_uppercase();
        if upper == "UNREDUCED" {
            return Ok(Self::protein());
        }
        REDUCTIONS
            .iter()
            .find(|(n, _)| *n == upper)
            .map(|(n, def)| Self::reduced(n, def))
            .unwrap_or_else(|| Err(Error::parse(format!("unknown alphabet reduction '{}'", name))))
    }

    /// 根据索引头中保存的约简描述（分组定义）恢复蛋白质字母表
    pub fn protein_from_description(description: &str) -> Result<Self> {
        let normalized = description.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized == PROTEIN_DEFINITION {
            return Ok(Self::protein());
        }
        match REDUCTIONS.iter().find(|(_, def)| *def == normalized) {
            Some((name, def)) => Self::reduced(name, def),
            None => Self::reduced("CUSTOM", &normalized),
        }
    }

    pub fn reduction_names() -> impl Iterator<Item = &'static str> {
        REDUCTIONS.iter().map(|(n, _)| *n)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn seq_type(&self) -> SequenceType {
        self.seq_type
    }

    /// 字母数（不含 0 号未定义编码）
    pub fn size(&self) -> u32 {
        self.groups.len() as u32
    }

    pub fn bits_per_letter(&self) -> u32 {
        self.bits_per_letter
    }

    pub fn letters_per_word(&self) -> u32 {
        self.letters_per_word
    }

    pub fn letter_mask(&self) -> u64 {
        (1u64 << self.bits_per_letter) - 1
    }

    /// 分组定义串，写入索引头用于恢复字母表
    pub fn definition(&self) -> String {
        self.groups
            .iter()
            .map(|g| String::from_utf8_lossy(g).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// 任意字节的编码，未定义字节返回 0（全函数，从不报错）
    #[inline]
    pub fn code(&self, b: u8) -> u8 {
        self.code_of[b as usize]
    }

    /// 编码对应的显示字母
    #[inline]
    pub fn letter(&self, code: u8) -> u8 {
        self.letter_of_code.get(code as usize).copied().unwrap_or(UNDEFINED_LETTER)
    }

    /// 规范化字节：大小写、别名折叠到分组显示字母
    #[inline]
    pub fn normalize(&self, b: u8) -> u8 {
        self.letter(self.code(b))
    }

    pub fn normalize_seq(&self, seq: &[u8]) -> Vec<u8> {
        seq.iter().map(|&b| self.normalize(b)).collect()
    }

    /// 把字节序列映射为编码序列（不打包），写入 `out`
    pub fn codes_into(&self, seq: &[u8], out: &mut Vec<u8>) {
        out.clear();
        out.extend(seq.iter().map(|&b| self.code_of[b as usize]));
    }

    pub fn codes(&self, seq: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(seq.len());
        self.codes_into(seq, &mut out);
        out
    }

    #[inline]
    pub fn is_wildcard(&self, code: u8) -> bool {
        self.wildcard != UNDEFINED_CODE && code == self.wildcard
    }

    pub fn is_reduced(&self) -> bool {
        self.translation.is_some()
    }

    /// 完整蛋白质编码 -> 本字母表编码的转换表（仅约简字母表有）
    pub fn translation(&self) -> Option<&[u8]> {
        self.translation.as_deref()
    }

    pub fn min_distinct_letters(&self) -> u32 {
        self.seq_type.min_distinct_letters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dna_codes_and_bit_widths() {
        let a = Alphabet::dna();
        assert_eq!(a.size(), 5);
        assert_eq!(a.bits_per_letter(), 3);
        assert_eq!(a.letters_per_word(), 21);
        assert_eq!(a.code(b'A'), 1);
        assert_eq!(a.code(b't'), 4);
        assert_eq!(a.code(b'U'), a.code(b'T'));
        assert_eq!(a.normalize(b'r'), b'N');
        assert_eq!(a.code(b'-'), UNDEFINED_CODE);
        assert_eq!(a.normalize(b'*'), UNDEFINED_LETTER);
        assert!(a.is_wildcard(a.code(b'N')));
    }

    #[test]
    fn protein_alphabet_uses_five_bits() {
        let a = Alphabet::protein();
        assert_eq!(a.size(), 21);
        assert_eq!(a.bits_per_letter(), 5);
        assert_eq!(a.letters_per_word(), 12);
        assert_eq!(a.normalize(b'b'), b'X');
        assert_eq!(a.code(b'*'), UNDEFINED_CODE);
    }

    #[test]
    fn reduction_translation_matches_direct_codes() {
        let full = Alphabet::protein();
        let red = Alphabet::reduction("diamond_11").unwrap();
        assert_eq!(red.size(), 11);
        assert_eq!(red.bits_per_letter(), 4);
        let table = red.translation().unwrap();
        for &aa in b"ARNDCQEGHILKMFPSTWYV" {
            assert_eq!(table[full.code(aa) as usize], red.code(aa), "letter {}", aa as char);
        }
        // X 在约简字母表中没有分组
        assert_eq!(table[full.code(b'X') as usize], UNDEFINED_CODE);
        assert_eq!(red.normalize(b'v'), b'I');
    }

    #[test]
    fn description_round_trip() {
        for name in Alphabet::reduction_names() {
            let red = Alphabet::reduction(name).unwrap();
            let back = Alphabet::protein_from_description(&red.definition()).unwrap();
            assert_eq!(back, red);
            assert_eq!(back.name(), name);
        }
        let full = Alphabet::protein_from_description(&Alphabet::protein().definition()).unwrap();
        assert!(!full.is_reduced());
    }

    #[test]
    fn rejects_bad_definitions() {
        assert!(Alphabet::from_definition("x", SequenceType::Dna, "", &[], None).is_err());
        assert!(Alphabet::from_definition("x", SequenceType::Dna, "AC CG", &[], None).is_err());
        assert!(Alphabet::reduced("x", "AB1").is_err());
        assert!(Alphabet::reduction("NOPE").is_err());
    }
}
