//! 错误类型。
//!
//! 可预期的非错误结果（找不到比对、低复杂度种子、桶超限被丢弃）不走这里，
//! 只通过计数器和日志报告。

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 种子形状字符串、索引头、矩阵文本或字母表定义格式错误
    #[error("parse error: {0}")]
    Parse(String),

    /// 表大小、序列编号或位置超出可寻址范围
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// 内置统计表中没有 (matrix, gap_open, gap_extend) 组合
    #[error("no Karlin-Altschul parameters for matrix {matrix} with gap open {gap_open} / extend {gap_extend}")]
    StatisticsLookup {
        matrix: String,
        gap_open: i32,
        gap_extend: i32,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    pub(crate) fn capacity(msg: impl Into<String>) -> Self {
        Error::Capacity(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(io) => Error::Io(io),
            other => Error::Parse(format!("build report: {}", other)),
        }
    }
}
