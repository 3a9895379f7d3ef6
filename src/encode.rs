//! K-mer encoding: 2-bit mapping, reverse complement, rolling k-mer walker.
//!
//! Conventions
//! - All codes are **LSB-aligned**: a k-mer of `k` bases uses the lower `2k` bits.
//! - The first base of the k-mer occupies the most significant of those bits,
//!   so numeric order equals lexicographic order over `ACGT`.

/// 256-entry LUT: ASCII → 2-bit (A=0, C=1, G=2, T/U=3), 0xFF for ambiguous.
pub static MAP_LUT: [u8; 256] = {
    const X: u8 = 0xFF;
    let mut t = [X; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'c' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'g' as usize] = 2;
    t[b'T' as usize] = 3;
    t[b't' as usize] = 3;
    t[b'U' as usize] = 3;
    t[b'u' as usize] = 3;
    t
};

const BASES: [u8; 4] = *b"ACGT";

/// Largest supported mer size (64 bits of k-mer).
pub const MAX_MER_SIZE: usize = 32;

/// Mask with the low `bits` bits set. `bits` may be 64.
#[inline]
pub fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// 2-bit encoding via LUT: A=00, C=01, G=10, T=11. `None` if ambiguous.
#[inline]
pub fn map_base(b: u8) -> Option<u8> {
    let v = MAP_LUT[b as usize];
    if v <= 3 { Some(v) } else { None }
}

/// Encode a k-mer window to an LSB-aligned `u64`. None if `k>32` or ambiguous.
#[inline]
pub fn encode_kmer(window: &[u8]) -> Option<u64> {
    let k = window.len();
    if k == 0 || k > MAX_MER_SIZE {
        return None;
    }
    let mut code: u64 = 0;
    for &b in window {
        let v = map_base(b)? as u64;
        code = (code << 2) | v;
    }
    Some(code)
}

/// Decode an LSB-aligned code of `k` bases back to ASCII.
pub fn decode_kmer(code: u64, k: usize) -> String {
    debug_assert!(k <= MAX_MER_SIZE);
    (0..k)
        .map(|i| {
            let shift = 2 * (k - 1 - i);
            BASES[((code >> shift) & 0b11) as usize] as char
        })
        .collect()
}

/// Reverse-complement an LSB-aligned code (lower `2k` bits used).
#[inline]
pub fn revcomp(code: u64, k: usize) -> u64 {
    debug_assert!(k <= MAX_MER_SIZE);
    let mut rc: u64 = 0;
    for i in 0..k {
        let base = (code >> (i * 2)) & 0b11;
        let comp = base ^ 0b11;
        let shift = (k - 1 - i) * 2;
        rc |= comp << shift;
    }
    rc
}

/// Smaller of a code and its reverse complement.
#[inline]
pub fn canonical(code: u64, k: usize) -> u64 {
    code.min(revcomp(code, k))
}

/// One k-mer position produced by [`KmerWalker`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KmerAt {
    /// 0-based start of the k-mer in the sequence.
    pub pos: usize,
    /// Forward-strand code.
    pub fwd: u64,
    /// Reverse-complement code.
    pub rev: u64,
}

/// Rolling forward/reverse-complement k-mer iterator over a sequence.
///
/// Windows that contain a non-ACGT base are skipped.
pub struct KmerWalker<'a> {
    seq: &'a [u8],
    k: usize,
    mask: u64,
    next: usize,
    fwd: u64,
    rev: u64,
    len: usize,
}

impl<'a> KmerWalker<'a> {
    pub fn new(seq: &'a [u8], k: usize) -> Self {
        assert!(k > 0 && k <= MAX_MER_SIZE, "k must be 1..=32");
        Self {
            seq,
            k,
            mask: low_mask(2 * k as u32),
            next: 0,
            fwd: 0,
            rev: 0,
            len: 0,
        }
    }
}

impl Iterator for KmerWalker<'_> {
    type Item = KmerAt;

    fn next(&mut self) -> Option<KmerAt> {
        while self.next < self.seq.len() {
            let i = self.next;
            self.next += 1;

            let v_raw = MAP_LUT[self.seq[i] as usize];
            if v_raw > 3 {
                self.fwd = 0;
                self.rev = 0;
                self.len = 0;
                continue;
            }
            let v = v_raw as u64;
            self.fwd = ((self.fwd << 2) | v) & self.mask;
            self.rev = (self.rev >> 2) | ((v ^ 0b11) << (2 * (self.k - 1)));
            self.len += 1;

            if self.len >= self.k {
                return Some(KmerAt {
                    pos: i + 1 - self.k,
                    fwd: self.fwd,
                    rev: self.rev,
                });
            }
        }
        None
    }
}
