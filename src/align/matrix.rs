use std::fmt;

use crate::error::{Error, Result};

const SIZE: usize = 128;

/// NCBI 文本格式的 BLOSUM62
const BLOSUM62_TEXT: &str = "\
#  Matrix made by matblas from blosum62.iij
   A  R  N  D  C  Q  E  G  H  I  L  K  M  F  P  S  T  W  Y  V  B  Z  X  *
A  4 -1 -2 -2  0 -1 -1  0 -2 -1 -1 -1 -1 -2 -1  1  0 -3 -2  0 -2 -1 -1 -4
R -1  5  0 -2 -3  1  0 -2  0 -3 -2  2 -1 -3 -2 -1 -1 -3 -2 -3 -1  0 -1 -4
N -2  0  6  1 -3  0  0  0  1 -3 -3  0 -2 -3 -2  1  0 -4 -2 -3  4  0 -1 -4
D -2 -2  1  6 -3  0  2 -1 -1 -3 -4 -1 -3 -3 -1  0 -1 -4 -3 -3  4  1 -1 -4
C  0 -3 -3 -3  9 -3 -4 -3 -3 -1 -1 -3 -1 -2 -3 -1 -1 -2 -2 -1 -3 -3 -1 -4
Q -1  1  0  0 -3  5  2 -2  0 -3 -2  1  0 -3 -1  0 -1 -2 -1 -2  0  4 -1 -4
E -1  0  0  2 -4  2  5 -2  0 -3 -3  1 -2 -3 -1  0 -1 -3 -2 -2  1  4 -1 -4
G  0 -2  0 -1 -3 -2 -2  6 -2 -4 -4 -2 -3 -3 -2  0 -2 -2 -3 -3 -1 -2 -1 -4
H -2  0  1 -1 -3  0  0 -2  8 -3 -3 -1 -2 -1 -2 -1 -2 -2  2 -3  0  0 -1 -4
I -1 -3 -3 -3 -1 -3 -3 -4 -3  4  2 -3  1  0 -3 -2 -1 -3 -1  3 -3 -3 -1 -4
L -1 -2 -3 -4 -1 -2 -3 -4 -3  2  4 -2  2  0 -3 -2 -1 -2 -1  1 -4 -3 -1 -4
K -1  2  0 -1 -3  1  1 -2 -1 -3 -2  5 -1 -3 -1  0 -1 -3 -2 -2  0  1 -1 -4
M -1 -1 -2 -3 -1  0 -2 -3 -2  1  2 -1  5  0 -2 -1 -1 -1 -1  1 -3 -1 -1 -4
F -2 -3 -3 -3 -2 -3 -3 -3 -1  0  0 -3  0  6 -4 -2 -2  1  3 -1 -3 -3 -1 -4
P -1 -2 -2 -1 -3 -1 -1 -2 -2 -3 -3 -1 -2 -4  7 -1 -1 -4 -3 -2 -2 -1 -1 -4
S  1 -1  1  0 -1  0  0  0 -1 -2 -2  0 -1 -2 -1  4  1 -3 -2 -2  0  0 -1 -4
T  0 -1  0 -1 -1 -1 -1 -2 -2 -1 -1 -1 -1 -2 -1  1  5 -2 -2  0 -1 -1 -1 -4
W -3 -3 -4 -4 -2 -2 -3 -2 -2 -3 -2 -3 -1  1 -4 -3 -2 11  2 -3 -4 -2 -1 -4
Y -2 -2 -2 -3 -2 -1 -2 -3  2 -1 -1 -2 -1  3 -3 -2 -2  2  7 -1 -3 -2 -1 -4
V  0 -3 -3 -3 -1 -2 -2 -3 -3  3  1 -2  1 -1 -2 -2  0 -3 -1  4 -3 -2 -1 -4
B -2 -1  4  4 -3  0  1 -1  0 -3 -4  0 -3 -3 -2  0 -1 -4 -3 -3  4  0 -1 -4
Z -1  0  0  1 -3  4  4 -2  0 -3 -3  1 -1 -3 -1  0 -1 -2 -2 -2  0  4 -1 -4
X -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1 -4
* -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4  1
";

/// 按 ASCII 字节查表的替换打分矩阵（大小写不敏感）
#[derive(Clone)]
pub struct ScoringMatrix {
    name: String,
    scores: Vec<i32>,
    /// 表中最小分，非 ASCII 字节按它打分
    floor: i32,
    /// 核苷酸矩阵时为 (match, mismatch)
    dna: Option<(i32, i32)>,
}

impl fmt::Debug for ScoringMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoringMatrix").field("name", &self.name).field("dna", &self.dna).finish()
    }
}

impl ScoringMatrix {
    /// 核苷酸打分：相同的 ACGT 得 `match_score`，其他（包括 N 与任何字母）得 `mismatch_score`
    pub fn dna(match_score: i32, mismatch_score: i32) -> Self {
        let mut scores = vec![mismatch_score; SIZE * SIZE];
        for &b in b"ACGT" {
            for x in [b, b.to_ascii_lowercase()] {
                for y in [b, b.to_ascii_lowercase()] {
                    scores[x as usize * SIZE + y as usize] = match_score;
                }
            }
        }
        // U 与 T 等价
        for x in [b'T', b't', b'U', b'u'] {
            for y in [b'T', b't', b'U', b'u'] {
                scores[x as usize * SIZE + y as usize] = match_score;
            }
        }
        Self {
            name: Self::dna_name(match_score, mismatch_score),
            scores,
            floor: match_score.min(mismatch_score),
            dna: Some((match_score, mismatch_score)),
        }
    }

    /// 核苷酸矩阵的名字，同时用作统计参数表的键
    pub fn dna_name(match_score: i32, mismatch_score: i32) -> String {
        format!("DNA_{}_{}", match_score, mismatch_score.abs())
    }

    pub fn blosum62() -> Self {
        Self::parse_ncbi("BLOSUM62", BLOSUM62_TEXT).unwrap_or_else(|e| unreachable!("built-in BLOSUM62: {}", e))
    }

    pub fn by_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "BLOSUM62" => Ok(Self::blosum62()),
            other => Err(Error::invalid(format!("no built-in scoring matrix '{}'", other))),
        }
    }

    /// 解析 NCBI 格式矩阵：`#` 开头为注释，第一行非注释行是列字母，
    /// 其后每行以行字母开头。未出现的字母对按矩阵最小值打分。
    pub fn parse_ncbi(name: &str, text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#'));
        let columns: Vec<u8> = match lines.next() {
            Some(header) => header.split_whitespace().map(|t| letter_of(t, name)).collect::<Result<_>>()?,
            None => return Err(Error::parse(format!("matrix {}: no column header", name))),
        };

        let mut entries: Vec<(u8, u8, i32)> = Vec::new();
        let mut rows = 0usize;
        for line in lines {
            let mut fields = line.split_whitespace();
            let row = match fields.next() {
                Some(t) => letter_of(t, name)?,
                None => continue,
            };
            let values: Vec<i32> = fields
                .map(|v| v.parse::<i32>().map_err(|_| Error::parse(format!("matrix {}: bad score '{}'", name, v))))
                .collect::<Result<_>>()?;
            if values.len() != columns.len() {
                return Err(Error::parse(format!(
                    "matrix {}: row {} has {} scores, expected {}",
                    name,
                    row as char,
                    values.len(),
                    columns.len()
                )));
            }
            entries.extend(columns.iter().zip(values).map(|(&col, v)| (row, col, v)));
            rows += 1;
        }
        if rows != columns.len() {
            return Err(Error::parse(format!("matrix {}: {} rows for {} columns", name, rows, columns.len())));
        }

        let min = entries.iter().map(|e| e.2).min().unwrap_or(0);
        let mut scores = vec![min; SIZE * SIZE];
        for (r, c, v) in entries {
            for x in [r, r.to_ascii_lowercase()] {
                for y in [c, c.to_ascii_lowercase()] {
                    scores[x as usize * SIZE + y as usize] = v;
                }
            }
        }
        Ok(Self { name: name.to_ascii_uppercase(), scores, floor: min, dna: None })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dna(&self) -> bool {
        self.dna.is_some()
    }

    #[inline]
    pub fn score(&self, a: u8, b: u8) -> i32 {
        if !(a.is_ascii() && b.is_ascii()) {
            return self.floor;
        }
        self.scores[a as usize * SIZE + b as usize]
    }
}

fn letter_of(token: &str, matrix: &str) -> Result<u8> {
    match token.as_bytes() {
        [b] if b.is_ascii_graphic() => Ok(b.to_ascii_uppercase()),
        _ => Err(Error::parse(format!("matrix {}: '{}' is not a single letter", matrix, token))),
    }
}
