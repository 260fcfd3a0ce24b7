//! 只读的大端数组文件访问，三种内存模式行为一致，只在内存占用和速度上不同。

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const PAGE_SIZE: usize = 1 << 16;
const PAGE_SLOTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MemoryMode {
    /// 整个文件读入内存
    #[default]
    Loaded,
    /// 按 64KB 页读取，保留固定数量的缓存页
    Paged,
    /// 内存映射
    Mapped,
}

impl FromStr for MemoryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "load" | "loaded" => Ok(MemoryMode::Loaded),
            "page" | "paged" => Ok(MemoryMode::Paged),
            "mmap" | "mapped" => Ok(MemoryMode::Mapped),
            other => Err(Error::invalid(format!("unknown memory mode '{}' (load, page, mmap)", other))),
        }
    }
}

impl fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemoryMode::Loaded => "load",
            MemoryMode::Paged => "page",
            MemoryMode::Mapped => "mmap",
        })
    }
}

struct Page {
    number: u64,
    bytes: Vec<u8>,
}

/// 直接映射的页缓存：页号取模决定槽位
struct PageCache {
    file: File,
    slots: Vec<Option<Page>>,
}

impl PageCache {
    fn page(&mut self, number: u64, file_len: u64) -> Result<&[u8]> {
        let slot = (number % PAGE_SLOTS as u64) as usize;
        let hit = matches!(&self.slots[slot], Some(p) if p.number == number);
        if !hit {
            let start = number * PAGE_SIZE as u64;
            let len = (file_len - start).min(PAGE_SIZE as u64) as usize;
            // 复用被替换页的缓冲区
            let mut bytes = self.slots[slot].take().map(|p| p.bytes).unwrap_or_default();
            bytes.resize(len, 0);
            self.file.seek(SeekFrom::Start(start))?;
            self.file.read_exact(&mut bytes)?;
            self.slots[slot] = Some(Page { number, bytes });
        }
        match &self.slots[slot] {
            Some(p) => Ok(&p.bytes),
            None => unreachable!("page slot filled above"),
        }
    }
}

enum Backing {
    Loaded(Vec<u8>),
    Paged(Mutex<PageCache>),
    Mapped(Mmap),
}

/// 一个大端编码数组文件
pub struct ArrayStorage {
    backing: Backing,
    len: u64,
}

impl fmt::Debug for ArrayStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.backing {
            Backing::Loaded(_) => MemoryMode::Loaded,
            Backing::Paged(_) => MemoryMode::Paged,
            Backing::Mapped(_) => MemoryMode::Mapped,
        };
        f.debug_struct("ArrayStorage").field("mode", &mode).field("len", &self.len).finish()
    }
}

impl ArrayStorage {
    pub fn open(path: &Path, mode: MemoryMode) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let backing = match mode {
            MemoryMode::Loaded => {
                let mut bytes = Vec::with_capacity(len as usize);
                file.read_to_end(&mut bytes)?;
                Backing::Loaded(bytes)
            }
            MemoryMode::Paged => {
                let slots = (0..PAGE_SLOTS).map(|_| None).collect();
                Backing::Paged(Mutex::new(PageCache { file, slots }))
            }
            MemoryMode::Mapped => {
                // 索引文件构建完成后只读，映射期间不会被截断
                #[allow(unsafe_code)]
                let map = unsafe { Mmap::map(&file)? };
                Backing::Mapped(map)
            }
        };
        Ok(Self { backing, len })
    }

    /// 文件字节数
    pub fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset + buf.len() as u64;
        if end > self.len {
            return Err(Error::parse(format!(
                "index array read at byte {} past end of file ({} bytes)",
                offset, self.len
            )));
        }
        match &self.backing {
            Backing::Loaded(bytes) => buf.copy_from_slice(&bytes[offset as usize..end as usize]),
            Backing::Mapped(map) => buf.copy_from_slice(&map[offset as usize..end as usize]),
            Backing::Paged(cache) => {
                let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
                let mut done = 0usize;
                while done < buf.len() {
                    let at = offset + done as u64;
                    let page = cache.page(at / PAGE_SIZE as u64, self.len)?;
                    let within = (at % PAGE_SIZE as u64) as usize;
                    let n = (page.len() - within).min(buf.len() - done);
                    buf[done..done + n].copy_from_slice(&page[within..within + n]);
                    done += n;
                }
            }
        }
        Ok(())
    }

    /// 元素区间 [index, index + count) 的起始字节；越过文件末尾时报错
    fn span(&self, index: u64, count: u64, width: u64) -> Result<u64> {
        match index.checked_add(count).and_then(|end| end.checked_mul(width)) {
            Some(end) if end <= self.len => Ok(index * width),
            _ => Err(Error::parse(format!(
                "index array read of {} elements at {} past end of file ({} bytes)",
                count, index, self.len
            ))),
        }
    }

    #[inline]
    pub fn i64_at(&self, index: u64) -> Result<i64> {
        let mut b = [0u8; 8];
        self.read_bytes(self.span(index, 1, 8)?, &mut b)?;
        Ok(i64::from_be_bytes(b))
    }

    #[inline]
    pub fn i32_at(&self, index: u64) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_bytes(self.span(index, 1, 4)?, &mut b)?;
        Ok(i32::from_be_bytes(b))
    }

    /// 从 `index` 开始读 `count` 个 i32，追加到 `out`。先检查边界再分配缓冲区
    pub fn i32s_into(&self, index: u64, count: usize, out: &mut Vec<i32>) -> Result<()> {
        let offset = self.span(index, count as u64, 4)?;
        let mut bytes = vec![0u8; count * 4];
        self.read_bytes(offset, &mut bytes)?;
        out.extend(bytes.chunks_exact(4).map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]])));
        Ok(())
    }
}
