//! Width-aware array kernels shared by the exchange layer and the adjacency
//! derivation engine.
//!
//! All functions here are pure and allocate their output; `width` is the
//! number of consecutive values that form one logical record, and records are
//! always moved atomically.

use crate::mesh_error::MeshWeaveError;
use crate::types::Lo;

/// Exclusive prefix scan of `counts`, returning offsets of length
/// `counts.len() + 1` with `offsets[0] == 0` and `offsets.last() == total`.
pub fn exclusive_scan(counts: &[Lo]) -> Vec<Lo> {
    let mut offsets = Vec::with_capacity(counts.len() + 1);
    let mut total: Lo = 0;
    offsets.push(0);
    for &c in counts {
        total += c;
        offsets.push(total);
    }
    offsets
}

/// Fan out per-root records to per-item records: item `i` in root `r`'s row
/// (per the CSR `roots2items` offsets) receives a copy of `r`'s record.
pub fn expand<T: Copy>(data: &[T], roots2items: &[Lo], width: usize) -> Vec<T> {
    debug_assert!(!roots2items.is_empty());
    let nitems = *roots2items.last().unwrap() as usize;
    let mut out = Vec::with_capacity(nitems * width);
    for root in 0..roots2items.len() - 1 {
        let begin = roots2items[root] as usize;
        let end = roots2items[root + 1] as usize;
        for _ in begin..end {
            out.extend_from_slice(&data[root * width..(root + 1) * width]);
        }
    }
    out
}

/// Gather: `out[i] = data[index_map[i]]`, record-wise.
pub fn gather<T: Copy>(data: &[T], index_map: &[Lo], width: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(index_map.len() * width);
    for &src in index_map {
        let src = src as usize;
        out.extend_from_slice(&data[src * width..(src + 1) * width]);
    }
    out
}

/// Scatter: `out[index_map[i]] = data[i]`, record-wise. `index_map` must be
/// one-to-one onto `[0, data.len()/width)`.
pub fn permute<T: Copy + Default>(data: &[T], index_map: &[Lo], width: usize) -> Vec<T> {
    let mut out = vec![T::default(); data.len()];
    for (i, &dst) in index_map.iter().enumerate() {
        let dst = dst as usize;
        out[dst * width..(dst + 1) * width].copy_from_slice(&data[i * width..(i + 1) * width]);
    }
    out
}

/// Invert a many-to-one map by stable counting sort.
///
/// `targets[i]` names the root of item `i`; the result is CSR offsets over
/// `nroots` rows plus the item indices grouped by root. Items sharing a root
/// keep their input order (two passes: count, then scatter in order).
pub fn invert_map(targets: &[Lo], nroots: usize) -> (Vec<Lo>, Vec<Lo>) {
    let mut counts = vec![0 as Lo; nroots];
    for &t in targets {
        counts[t as usize] += 1;
    }
    let offsets = exclusive_scan(&counts);
    let mut fill = offsets[..nroots].to_vec();
    let mut items = vec![0 as Lo; targets.len()];
    for (i, &t) in targets.iter().enumerate() {
        let slot = fill[t as usize];
        items[slot as usize] = i as Lo;
        fill[t as usize] = slot + 1;
    }
    (offsets, items)
}

/// Check an array length against an expected record count, for uniform error
/// reporting at exchange boundaries.
pub fn check_len<T>(
    data: &[T],
    records: usize,
    width: usize,
    context: &'static str,
) -> Result<(), MeshWeaveError> {
    if data.len() != records * width {
        return Err(MeshWeaveError::SizeMismatch {
            context,
            expected: records * width,
            got: data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_scan_basic() {
        assert_eq!(exclusive_scan(&[2, 0, 3]), vec![0, 2, 2, 5]);
        assert_eq!(exclusive_scan(&[]), vec![0]);
    }

    #[test]
    fn expand_fans_out_records() {
        // roots 0 and 1 have 2 and 1 items; width 2
        let out = expand(&[10, 11, 20, 21], &[0, 2, 3], 2);
        assert_eq!(out, vec![10, 11, 10, 11, 20, 21]);
    }

    #[test]
    fn gather_and_permute_are_inverse() {
        let data = vec![0, 1, 2, 3, 4, 5];
        let map = vec![2, 0, 1];
        let scattered = permute(&data, &map, 2);
        assert_eq!(scattered, vec![2, 3, 4, 5, 0, 1]);
        assert_eq!(gather(&scattered, &map, 2), data);
    }

    #[test]
    fn invert_map_is_stable() {
        // items 0,1,2,3 target roots 1,0,1,1
        let (offsets, items) = invert_map(&[1, 0, 1, 1], 2);
        assert_eq!(offsets, vec![0, 1, 4]);
        // root 1's items preserve input order
        assert_eq!(items, vec![1, 0, 2, 3]);
    }

    #[test]
    fn invert_map_handles_empty_roots() {
        let (offsets, items) = invert_map(&[2, 2], 4);
        assert_eq!(offsets, vec![0, 0, 0, 2, 2]);
        assert_eq!(items, vec![0, 1]);
    }

    #[test]
    fn check_len_reports_mismatch() {
        let err = check_len(&[1, 2, 3], 2, 2, "test").unwrap_err();
        assert!(matches!(
            err,
            crate::mesh_error::MeshWeaveError::SizeMismatch { expected: 4, got: 3, .. }
        ));
    }
}
