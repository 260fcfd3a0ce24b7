//! 定宽位打包序列编码。
//!
//! 每个字母编码占 `bits_per_letter` 位，按高位在前的顺序装入 64 位字；
//! 字内剩余的低位和末尾未用的槽位全为 0，逻辑长度不单独存储，
//! 解码时从末尾向前找第一个非零编码恢复。

use crate::index::shape::SeedShape;
use crate::util::alphabet::{Alphabet, UNDEFINED_CODE};

/// 打包后的序列
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedSequence {
    words: Vec<u64>,
}

impl EncodedSequence {
    pub fn words(&self) -> &[u64] {
        &self.words
    }
}

/// 绑定某个字母表的编解码器，可 Copy，线程间共享只读字母表
#[derive(Debug, Clone, Copy)]
pub struct SequenceCodec<'a> {
    alphabet: &'a Alphabet,
    bits: u32,
    per_word: usize,
    mask: u64,
}

impl<'a> SequenceCodec<'a> {
    pub fn new(alphabet: &'a Alphabet) -> Self {
        Self {
            alphabet,
            bits: alphabet.bits_per_letter(),
            per_word: alphabet.letters_per_word() as usize,
            mask: alphabet.letter_mask(),
        }
    }

    pub fn alphabet(&self) -> &'a Alphabet {
        self.alphabet
    }

    #[inline]
    fn top_shift(&self) -> u32 {
        64 - self.bits
    }

    #[inline]
    fn shift_of(&self, slot: usize) -> u32 {
        64 - self.bits * (slot as u32 + 1)
    }

    pub fn encode(&self, seq: &[u8]) -> EncodedSequence {
        let mut words = vec![0u64; (seq.len() + self.per_word - 1) / self.per_word];
        for (i, &b) in seq.iter().enumerate() {
            let code = self.alphabet.code(b) as u64;
            words[i / self.per_word] |= code << self.shift_of(i % self.per_word);
        }
        EncodedSequence { words }
    }

    /// 逻辑长度：最后一个非零编码之后的位置
    pub fn len(&self, enc: &EncodedSequence) -> usize {
        let Some(w) = enc.words.iter().rposition(|&word| word != 0) else {
            return 0;
        };
        let word = enc.words[w];
        let last = (0..self.per_word)
            .rev()
            .find(|&slot| (word >> self.shift_of(slot)) & self.mask != 0)
            .unwrap_or(0);
        w * self.per_word + last + 1
    }

    pub fn decode(&self, enc: &EncodedSequence) -> Vec<u8> {
        self.letters(enc, 0).map(|code| self.alphabet.letter(code)).collect()
    }

    /// 位置 `pos` 的字母编码，越界返回 0
    #[inline]
    pub fn letter_code(&self, enc: &EncodedSequence, pos: usize) -> u8 {
        match enc.words.get(pos / self.per_word) {
            Some(&word) => ((word >> self.shift_of(pos % self.per_word)) & self.mask) as u8,
            None => UNDEFINED_CODE,
        }
    }

    pub fn cursor<'s>(&self, enc: &'s EncodedSequence, pos: usize) -> LetterCursor<'s> {
        let end = self.len(enc);
        let pos = pos.min(end);
        LetterCursor {
            words: &enc.words,
            word: pos / self.per_word,
            shift: self.shift_of(pos % self.per_word),
            pos,
            end,
            bits: self.bits,
            top_shift: self.top_shift(),
            mask: self.mask,
        }
    }

    /// 从 `start` 开始向后的惰性字母迭代器
    pub fn letters<'s>(&self, enc: &'s EncodedSequence, start: usize) -> Letters<'s> {
        Letters(self.cursor(enc, start))
    }

    /// 从 `start`（含）开始向前到 0 的惰性字母迭代器；`start` 超出长度时从最后一个字母开始
    pub fn letters_rev<'s>(&self, enc: &'s EncodedSequence, start: usize) -> RevLetters<'s> {
        RevLetters(self.cursor(enc, start.saturating_add(1)))
    }

    /// 从打包序列中提取 `pos` 处的种子编码。
    /// 遇到未定义编码或越过序列末尾时返回 `fail`。
    pub fn seed_code(&self, shape: &SeedShape, enc: &EncodedSequence, pos: usize, fail: u64) -> u64 {
        let mut cursor = self.cursor(enc, pos);
        if cursor.pos != pos {
            return fail;
        }
        let mut code = 0u64;
        for &selected in shape.mask() {
            let Some(c) = cursor.advance() else {
                return fail;
            };
            if selected {
                if c == UNDEFINED_CODE {
                    return fail;
                }
                code = (code << self.bits) | c as u64;
            }
        }
        code
    }

    /// 同 [`seed_code`](Self::seed_code)，但先经 `target` 约简字母表的转换表把编码翻译过去，
    /// 用于在按完整蛋白质字母表打包的序列上直接提取约简种子。
    pub fn seed_code_translated(
        &self,
        shape: &SeedShape,
        enc: &EncodedSequence,
        pos: usize,
        target: &Alphabet,
        fail: u64,
    ) -> u64 {
        let Some(table) = target.translation() else {
            return self.seed_code(shape, enc, pos, fail);
        };
        let bits = target.bits_per_letter();
        let mut cursor = self.cursor(enc, pos);
        if cursor.pos != pos {
            return fail;
        }
        let mut code = 0u64;
        for &selected in shape.mask() {
            let Some(c) = cursor.advance() else {
                return fail;
            };
            if selected {
                let t = table.get(c as usize).copied().unwrap_or(UNDEFINED_CODE);
                if t == UNDEFINED_CODE {
                    return fail;
                }
                code = (code << bits) | t as u64;
            }
        }
        code
    }
}

/// 打包序列上的显式游标，记录当前字和字内移位。
#[derive(Debug, Clone)]
pub struct LetterCursor<'s> {
    words: &'s [u64],
    word: usize,
    shift: u32,
    pos: usize,
    end: usize,
    bits: u32,
    top_shift: u32,
    mask: u64,
}

impl<'s> LetterCursor<'s> {
    pub fn position(&self) -> usize {
        self.pos
    }

    /// 读出当前位置的编码并前进一格
    pub fn advance(&mut self) -> Option<u8> {
        if self.pos >= self.end {
            return None;
        }
        let code = ((self.words[self.word] >> self.shift) & self.mask) as u8;
        self.pos += 1;
        if self.shift < self.bits {
            self.word += 1;
            self.shift = self.top_shift;
        } else {
            self.shift -= self.bits;
        }
        Some(code)
    }

    /// 后退一格并读出该位置的编码
    pub fn retreat(&mut self) -> Option<u8> {
        if self.pos == 0 {
            return None;
        }
        self.pos -= 1;
        if self.shift == self.top_shift {
            self.word -= 1;
            // 字内最后一个槽位
            let per_word = 64 / self.bits;
            self.shift = 64 - self.bits * per_word;
        } else {
            self.shift += self.bits;
        }
        Some(((self.words[self.word] >> self.shift) & self.mask) as u8)
    }
}

/// 正向字母迭代器
#[derive(Debug, Clone)]
pub struct Letters<'s>(LetterCursor<'s>);

impl Iterator for Letters<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.0.advance()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.end - self.0.pos;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Letters<'_> {}

/// 反向字母迭代器
#[derive(Debug, Clone)]
pub struct RevLetters<'s>(LetterCursor<'s>);

impl Iterator for RevLetters<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.0.retreat()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.0.pos, Some(self.0.pos))
    }
}

impl ExactSizeIterator for RevLetters<'_> {}
