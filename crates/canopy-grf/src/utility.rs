//! Range partitioning and the thread-pool map shared by training and prediction.

use rayon::ThreadPool;
use rayon::prelude::*;

use crate::error::ForestError;

/// Partition `[start, end]` into `num_parts` contiguous ranges.
///
/// Returns `num_parts + 1` increasing cut points; range `i` is
/// `boundaries[i]..boundaries[i + 1]`. Larger parts come first. When there
/// are more parts than elements every element gets its own range.
#[must_use]
pub fn split_sequence(start: usize, end: usize, num_parts: usize) -> Vec<usize> {
    if end < start || num_parts == 0 {
        return vec![start];
    }
    if num_parts == 1 {
        return vec![start, end + 1];
    }

    let length = end - start + 1;
    if num_parts >= length {
        return (start..=end + 1).collect();
    }

    let short_size = length / num_parts;
    let num_long = length % num_parts;

    let mut boundaries = Vec::with_capacity(num_parts + 1);
    let mut cursor = start;
    boundaries.push(cursor);
    for part in 0..num_parts {
        cursor += if part < num_long { short_size + 1 } else { short_size };
        boundaries.push(cursor);
    }
    boundaries
}

/// Approximate float equality.
#[must_use]
pub fn equal_doubles(first: f64, second: f64, epsilon: f64) -> bool {
    (first - second).abs() < epsilon
}

/// Build a worker pool. Zero threads means all available cores.
pub(crate) fn build_thread_pool(num_threads: usize) -> Result<ThreadPool, ForestError> {
    let num_threads = if num_threads == 0 {
        std::thread::available_parallelism().map_or(1, |n| n.get())
    } else {
        num_threads
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| ForestError::ThreadPool { source: e })
}

/// Run `f(start, end)` over contiguous partitions of `0..num_items`, one task
/// per pool thread, and return the results in partition order.
pub(crate) fn map_ranges<T, F>(pool: &ThreadPool, num_items: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, usize) -> T + Sync,
{
    if num_items == 0 {
        return Vec::new();
    }
    let boundaries = split_sequence(0, num_items - 1, pool.current_num_threads());
    pool.install(|| {
        boundaries
            .par_windows(2)
            .map(|range| f(range[0], range[1]))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sequence_single_part() {
        assert_eq!(split_sequence(1, 1, 1), vec![1, 2]);
        assert_eq!(split_sequence(0, 9, 1), vec![0, 10]);
    }

    #[test]
    fn split_sequence_more_parts_than_elements() {
        assert_eq!(split_sequence(2, 4, 10), vec![2, 3, 4, 5]);
        assert_eq!(split_sequence(0, 2, 3), vec![0, 1, 2, 3]);
    }

    #[test]
    fn split_sequence_even_split() {
        assert_eq!(split_sequence(0, 9, 5), vec![0, 2, 4, 6, 8, 10]);
    }

    #[test]
    fn split_sequence_long_parts_first() {
        assert_eq!(split_sequence(0, 10, 4), vec![0, 3, 6, 9, 11]);
        assert_eq!(split_sequence(5, 11, 3), vec![5, 8, 10, 12]);
    }

    #[test]
    fn equal_doubles_uses_strict_tolerance() {
        assert!(equal_doubles(1.0, 1.0 + 1e-12, 1e-10));
        assert!(!equal_doubles(1.0, 1.1, 1e-10));
    }

    #[test]
    fn map_ranges_preserves_order_and_coverage() {
        let pool = build_thread_pool(3).unwrap();
        let ranges = map_ranges(&pool, 10, |start, end| (start..end).collect::<Vec<_>>());
        let flat: Vec<usize> = ranges.into_iter().flatten().collect();
        assert_eq!(flat, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn map_ranges_empty_input() {
        let pool = build_thread_pool(2).unwrap();
        let out: Vec<usize> = map_ranges(&pool, 0, |start, end| end - start);
        assert!(out.is_empty());
    }
}
