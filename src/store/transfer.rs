use std::ops::Range;

/// Splits `total` entries into consecutive ranges of at most `batch_size`. A non-empty input
/// always yields at least one range; an empty one yields exactly one empty range so an empty map
/// is still announced to the new backup.
pub(crate) fn batch_ranges(total: usize, batch_size: usize) -> Vec<Range<usize>> {
    assert!(batch_size > 0, "batch size must be positive");

    if total <= batch_size {
        return vec![0..total];
    }

    let mut ranges = Vec::with_capacity((total + batch_size - 1) / batch_size);
    let mut start = 0;
    while start < total {
        let end = std::cmp::min(start + batch_size, total);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(total: usize, batch_size: usize) -> Vec<usize> {
        batch_ranges(total, batch_size).iter().map(|r| r.len()).collect()
    }

    #[test]
    fn at_or_below_limit_is_a_single_batch() {
        assert_eq!(sizes(0, 100_000), vec![0]);
        assert_eq!(sizes(1, 100_000), vec![1]);
        assert_eq!(sizes(100_000, 100_000), vec![100_000]);
    }

    #[test]
    fn above_limit_is_chunked_in_order() {
        assert_eq!(sizes(250_000, 100_000), vec![100_000, 100_000, 50_000]);
        assert_eq!(sizes(200_000, 100_000), vec![100_000, 100_000]);
        assert_eq!(sizes(100_001, 100_000), vec![100_000, 1]);

        let ranges = batch_ranges(250_000, 100_000);
        assert_eq!(ranges, vec![0..100_000, 100_000..200_000, 200_000..250_000]);
    }
}
