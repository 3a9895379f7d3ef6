//! LSD radix sort for `u64` keys with a paired values array.
//! 8-bit digits; only the digits below `key_bits` are visited.

/// Sort `keys` ascending (stable) and permute `vals` the same way.
/// Keys must fit in `key_bits` bits.
pub fn radix_sort_pairs(keys: &mut [u64], vals: &mut [u64], key_bits: u32) {
    debug_assert_eq!(keys.len(), vals.len());
    let n = keys.len();
    if n <= 1 {
        return;
    }

    let mut tmp_keys = vec![0u64; n];
    let mut tmp_vals = vec![0u64; n];

    for pass in 0..key_bits.min(64).div_ceil(8) {
        let shift = pass * 8;
        let mut counts = [0usize; 256];

        for &k in keys.iter() {
            counts[((k >> shift) & 0xFF) as usize] += 1;
        }
        if counts.iter().any(|&c| c == n) {
            // Every key shares this digit.
            continue;
        }

        let mut sum = 0usize;
        for c in counts.iter_mut() {
            let tmp = *c;
            *c = sum;
            sum += tmp;
        }

        for i in 0..n {
            let k = keys[i];
            let b = ((k >> shift) & 0xFF) as usize;
            let pos = counts[b];
            tmp_keys[pos] = k;
            tmp_vals[pos] = vals[i];
            counts[b] = pos + 1;
        }

        keys.copy_from_slice(&tmp_keys);
        vals.copy_from_slice(&tmp_vals);
    }
}
