//! 字母表、位打包编码与核苷酸工具。

pub mod alphabet;
pub mod codec;
pub mod dna;
