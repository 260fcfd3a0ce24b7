//! 索引文件格式。
//!
//! 每张表 N 对应四个文件（整数一律大端）：
//! - `index<N>.idx`：文件头
//! - `table<N>.idx`：桶头数组，每项 i64
//! - `table<N>.db`：data 数组，每项 i32，0 号字保留
//! - `index<N>.meta`：bincode 序列化的构建报告（可选）
//!
//! 所有文件都先写入同目录的临时文件再改名，文件头最后落盘，
//! 因此一张表有效当且仅当它的文件头存在。

use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::index::hash::SeedHasher;
use crate::index::shape::SeedShape;
use crate::util::alphabet::{Alphabet, SequenceType};

pub const MAGIC: &[u8; 8] = b"SAIDX001";

// 读文件头时的长度上限，防止损坏的长度字段触发巨量分配
const MAX_DESCRIPTION_LEN: i32 = 1 << 16;
const MAX_SHAPE_LEN: i32 = 1 << 12;

pub fn header_path(dir: &Path, table: usize) -> PathBuf {
    dir.join(format!("index{}.idx", table))
}

pub fn heads_path(dir: &Path, table: usize) -> PathBuf {
    dir.join(format!("table{}.idx", table))
}

pub fn data_path(dir: &Path, table: usize) -> PathBuf {
    dir.join(format!("table{}.db", table))
}

pub fn meta_path(dir: &Path, table: usize) -> PathBuf {
    dir.join(format!("index{}.meta", table))
}

/// 目录中已完成的表数（从 0 开始连续编号、文件头存在）
pub fn count_tables(dir: &Path) -> usize {
    (0..).take_while(|&n| header_path(dir, n).is_file()).count()
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexHeader {
    pub seq_type: SequenceType,
    /// 蛋白质索引的字母分组定义，DNA 为 None
    pub reduction: Option<String>,
    pub table_size: u32,
    pub hash_mask: u32,
    pub random_seed: i32,
    /// 已索引的 (ref, pos) 对总数
    pub entry_count: i64,
    pub step_size: u32,
    pub shape: SeedShape,
}

impl IndexHeader {
    pub fn new(alphabet: &Alphabet, hasher: &SeedHasher, entry_count: i64, step_size: u32, shape: SeedShape) -> Self {
        let reduction = match alphabet.seq_type() {
            SequenceType::Dna => None,
            SequenceType::Protein => Some(alphabet.definition()),
        };
        Self {
            seq_type: alphabet.seq_type(),
            reduction,
            table_size: hasher.table_size(),
            hash_mask: hasher.mask(),
            random_seed: hasher.seed(),
            entry_count,
            step_size,
            shape,
        }
    }

    pub fn hasher(&self) -> SeedHasher {
        SeedHasher::new(self.table_size, self.random_seed)
    }

    /// 恢复构建时使用的字母表
    pub fn alphabet(&self) -> Result<Alphabet> {
        match (self.seq_type, &self.reduction) {
            (SequenceType::Dna, _) => Ok(Alphabet::dna()),
            (SequenceType::Protein, Some(desc)) => Alphabet::protein_from_description(desc),
            (SequenceType::Protein, None) => Ok(Alphabet::protein()),
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&self.seq_type.tag().to_be_bytes())?;
        if self.seq_type == SequenceType::Protein {
            let desc = self.reduction.as_deref().unwrap_or_default().as_bytes();
            w.write_all(&(desc.len() as i32).to_be_bytes())?;
            w.write_all(desc)?;
        }
        w.write_all(&(self.table_size as i32).to_be_bytes())?;
        w.write_all(&(self.hash_mask as i32).to_be_bytes())?;
        w.write_all(&self.random_seed.to_be_bytes())?;
        w.write_all(&self.entry_count.to_be_bytes())?;
        w.write_all(&(self.step_size as i32).to_be_bytes())?;
        let shape = self.shape.as_bytes();
        w.write_all(&(shape.len() as i32).to_be_bytes())?;
        w.write_all(shape)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic).map_err(|e| truncated("magic", e))?;
        if &magic != MAGIC {
            return Err(Error::parse(format!(
                "not a seed index header: magic {:?}",
                String::from_utf8_lossy(&magic)
            )));
        }
        let seq_type = SequenceType::from_tag(read_i32(r, "sequence type")?)?;
        let reduction = match seq_type {
            SequenceType::Dna => None,
            SequenceType::Protein => {
                let len = read_len(r, "reduction length", MAX_DESCRIPTION_LEN)?;
                let mut buf = vec![0u8; len];
                r.read_exact(&mut buf).map_err(|e| truncated("reduction", e))?;
                let text = String::from_utf8(buf).map_err(|_| Error::parse("reduction description is not UTF-8"))?;
                Some(text)
            }
        };
        let table_size = read_i32(r, "table size")?;
        if table_size <= 0 {
            return Err(Error::parse(format!("invalid table size {}", table_size)));
        }
        let hash_mask = read_i32(r, "hash mask")?;
        let random_seed = read_i32(r, "random seed")?;
        let entry_count = read_i64(r, "entry count")?;
        if entry_count < 0 {
            return Err(Error::parse(format!("invalid entry count {}", entry_count)));
        }
        let step_size = read_i32(r, "step size")?;
        if step_size <= 0 {
            return Err(Error::parse(format!("invalid step size {}", step_size)));
        }
        let shape_len = read_len(r, "shape length", MAX_SHAPE_LEN)?;
        let mut shape = vec![0u8; shape_len];
        r.read_exact(&mut shape).map_err(|e| truncated("seed shape", e))?;
        let shape: SeedShape = std::str::from_utf8(&shape)
            .map_err(|_| Error::parse("seed shape is not ASCII"))?
            .parse()?;

        let header = Self {
            seq_type,
            reduction,
            table_size: table_size as u32,
            hash_mask: hash_mask as u32,
            random_seed,
            entry_count,
            step_size: step_size as u32,
            shape,
        };
        if header.hasher().mask() != header.hash_mask {
            return Err(Error::parse(format!(
                "hash mask {:#x} does not match table size {}",
                header.hash_mask, header.table_size
            )));
        }
        Ok(header)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut file = fs::File::open(path)?;
        Self::read_from(&mut file)
    }
}

fn truncated(what: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::parse(format!("index header truncated while reading {}", what))
    } else {
        Error::Io(e)
    }
}

fn read_i32<R: Read>(r: &mut R, what: &str) -> Result<i32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(|e| truncated(what, e))?;
    Ok(i32::from_be_bytes(b))
}

fn read_i64<R: Read>(r: &mut R, what: &str) -> Result<i64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(|e| truncated(what, e))?;
    Ok(i64::from_be_bytes(b))
}

fn read_len<R: Read>(r: &mut R, what: &str, max: i32) -> Result<usize> {
    let len = read_i32(r, what)?;
    if !(0..=max).contains(&len) {
        return Err(Error::parse(format!("{} {} out of range", what, len)));
    }
    Ok(len as usize)
}

/// 在目标目录中写临时文件，成功后改名为 `path`。
/// `fill` 出错时临时文件随 drop 删除，目标文件保持原状。
pub fn write_atomically<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<()>,
{
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut w = BufWriter::new(&mut tmp);
        fill(&mut w)?;
        w.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

pub fn write_i64s<W: Write>(w: &mut W, values: impl IntoIterator<Item = i64>) -> Result<()> {
    for v in values {
        w.write_all(&v.to_be_bytes())?;
    }
    Ok(())
}

pub fn write_i32s<W: Write>(w: &mut W, values: impl IntoIterator<Item = i32>) -> Result<()> {
    for v in values {
        w.write_all(&v.to_be_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(alphabet: &Alphabet, shape: &str) -> IndexHeader {
        let hasher = SeedHasher::new(1 << 12, 666);
        IndexHeader::new(alphabet, &hasher, 12345, 2, shape.parse().unwrap())
    }

    #[test]
    fn header_round_trip_dna_and_protein() {
        for (alphabet, shape) in [(Alphabet::dna(), "1101"), (Alphabet::reduction("GBMR4").unwrap(), "111011")] {
            let h = header(&alphabet, shape);
            let mut buf = Vec::new();
            h.write_to(&mut buf).unwrap();
            assert_eq!(&buf[..8], MAGIC);
            let back = IndexHeader::read_from(&mut buf.as_slice()).unwrap();
            assert_eq!(back, h);
            assert_eq!(back.alphabet().unwrap(), alphabet);
        }
    }

    #[test]
    fn header_fields_are_big_endian() {
        let h = header(&Alphabet::dna(), "11");
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        // magic, tag, table size
        assert_eq!(&buf[8..12], &[0, 0, 0, 0]);
        assert_eq!(&buf[12..16], &[0, 0, 0x10, 0]);
        assert_eq!(&buf[buf.len() - 6..], &[0, 0, 0, 2, b'1', b'1']);
    }

    #[test]
    fn bad_magic_and_truncation_are_parse_errors() {
        let h = header(&Alphabet::dna(), "1101");
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();

        let mut bad = buf.clone();
        bad[0] = b'X';
        assert!(matches!(IndexHeader::read_from(&mut bad.as_slice()), Err(Error::Parse(_))));

        let cut = &buf[..buf.len() - 3];
        assert!(matches!(IndexHeader::read_from(&mut &cut[..]), Err(Error::Parse(_))));

        let mut bad_shape = buf.clone();
        let n = bad_shape.len();
        bad_shape[n - 1] = b'2';
        assert!(matches!(IndexHeader::read_from(&mut bad_shape.as_slice()), Err(Error::Parse(_))));
    }

    #[test]
    fn atomic_write_leaves_nothing_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.bin");
        let err = write_atomically(&path, |w| {
            w.write_all(b"partial")?;
            Err(Error::invalid("stop"))
        });
        assert!(err.is_err());
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        write_atomically(&path, |w| write_i32s(w, [1, -1])).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![0, 0, 0, 1, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(count_tables(dir.path()), 0);
    }
}
