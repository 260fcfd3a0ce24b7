//! # seedalign
//!
//! 类 BLAST 比对器的种子扩展核心，面向宏基因组读段分类。
//!
//! 本 crate 提供：
//!
//! - **序列编码**：DNA-5、完整蛋白质及约简蛋白质字母表，定宽位打包
//! - **间隔种子**：0/1 掩码形状与种子编码提取
//! - **哈希索引**：四遍并行构建（计数、分配、填充、打乱），三种内存模式读取
//! - **带状比对**：三状态仿射空位局部/半全局 DP、回溯与 Karlin–Altschul 统计
//!
//! ## 快速示例
//!
//! ```rust,no_run
//! use seedalign::align::{align_query, AlignOpt};
//! use seedalign::index::{build_index, HashIndexReader, IndexOpt, MemoryMode, SeedShape};
//! use seedalign::util::alphabet::Alphabet;
//!
//! # fn main() -> seedalign::Result<()> {
//! let refs = vec!["ACGTTGCAAGCTTACGGATCCTTAGACGTTGCAAGGTACCGATTACA"];
//! let dir = std::path::Path::new("idx");
//! let shape: SeedShape = "11011011".parse()?;
//! build_index(&refs, &[shape], &Alphabet::dna(), &IndexOpt::default(), dir)?;
//!
//! let tables = HashIndexReader::open_all(dir, MemoryMode::Mapped)?;
//! let opt = AlignOpt::default();
//! let mut aligner = opt.aligner(&refs)?;
//! for hit in align_query(&tables, &refs, &mut aligner, b"GCAAGCTTACGGATCCTTAG", &opt)? {
//!     println!("ref {} {} bits {}", hit.ref_id, hit.alignment.bit_score, hit.cigar);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## 模块说明
//!
//! - [`util`]：字母表、位打包编码、反向互补
//! - [`index`]：种子形状、哈希索引构建与读取、磁盘格式
//! - [`align`]：打分矩阵、统计参数、带状比对器、种子收集与成链
//! - [`error`]：错误类型

pub mod align;
pub mod error;
pub mod index;
pub mod util;

pub use error::{Error, Result};
