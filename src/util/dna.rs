//! 核苷酸互补与反向互补。

/// 字节级互补表：保留大小写，IUPAC 简并碱基取互补集合，其他字节原样返回
const COMPLEMENT: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = i as u8;
        i += 1;
    }
    let pairs: [(u8, u8); 11] = [
        (b'A', b'T'),
        (b'C', b'G'),
        (b'G', b'C'),
        (b'T', b'A'),
        (b'U', b'A'),
        (b'R', b'Y'),
        (b'Y', b'R'),
        (b'K', b'M'),
        (b'M', b'K'),
        (b'B', b'V'),
        (b'V', b'B'),
    ];
    let mut p = 0;
    while p < pairs.len() {
        let (from, to) = pairs[p];
        table[from as usize] = to;
        table[from.to_ascii_lowercase() as usize] = to.to_ascii_lowercase();
        p += 1;
    }
    table[b'D' as usize] = b'H';
    table[b'd' as usize] = b'h';
    table[b'H' as usize] = b'D';
    table[b'h' as usize] = b'd';
    table
};

#[inline]
pub fn complement(base: u8) -> u8 {
    COMPLEMENT[base as usize]
}

pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(seq.len());
    revcomp_into(seq, &mut out);
    out
}

/// 反向互补写入 `out`，复用调用方的缓冲区
pub fn revcomp_into(seq: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.extend(seq.iter().rev().map(|&b| complement(b)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complement_keeps_case_and_iupac() {
        assert_eq!(complement(b'A'), b'T');
        assert_eq!(complement(b'g'), b'c');
        assert_eq!(complement(b'U'), b'A');
        assert_eq!(complement(b'R'), b'Y');
        assert_eq!(complement(b'd'), b'h');
        assert_eq!(complement(b'N'), b'N');
        assert_eq!(complement(b'S'), b'S');
        assert_eq!(complement(b'-'), b'-');
    }

    #[test]
    fn revcomp_is_an_involution_on_acgt() {
        let seq = b"ACGTTGCAnnAcg";
        assert_eq!(revcomp(seq), b"cgTnnTGCAACGT".to_vec());
        assert_eq!(revcomp(&revcomp(seq)), seq.to_vec());
        let mut buf = vec![b'X'; 3];
        revcomp_into(b"AAC", &mut buf);
        assert_eq!(buf, b"GTT");
    }
}
