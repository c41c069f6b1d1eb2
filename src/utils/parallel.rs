//! Parallel processing utilities

use rayon::prelude::*;

/// Something that can fan indexed work out over a set of workers
///
/// Results are always returned in index order regardless of which worker
/// produced them.
pub trait ParallelExecutor: Sync {
    /// Number of workers available to `map_indexed`
    fn parallelism(&self) -> usize;

    /// Run `f(0..n)` and collect the results in index order
    fn map_indexed<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send;
}

/// Runs everything on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct Serial;

impl ParallelExecutor for Serial {
    fn parallelism(&self) -> usize {
        1
    }

    fn map_indexed<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        (0..n).map(f).collect()
    }
}

impl ParallelExecutor for rayon::ThreadPool {
    fn parallelism(&self) -> usize {
        self.current_num_threads()
    }

    fn map_indexed<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        self.install(|| (0..n).into_par_iter().map(f).collect())
    }
}

/// Split `0..len` into at most `n_chunks` contiguous, nearly equal ranges
pub fn chunk_ranges(len: usize, n_chunks: usize) -> Vec<std::ops::Range<usize>> {
    let n_chunks = n_chunks.max(1).min(len.max(1));
    let base = len / n_chunks;
    let extra = len % n_chunks;
    let mut ranges = Vec::with_capacity(n_chunks);
    let mut start = 0;
    for i in 0..n_chunks {
        let size = base + usize::from(i < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_map_keeps_order() {
        let out = Serial.map_indexed(5, |i| i * 2);
        assert_eq!(out, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_pool_map_keeps_order() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();
        assert_eq!(pool.parallelism(), 3);
        let out = pool.map_indexed(1000, |i| i + 1);
        assert_eq!(out.len(), 1000);
        assert_eq!(out[0], 1);
        assert_eq!(out[999], 1000);
    }

    #[test]
    fn test_chunk_ranges_cover_everything() {
        let ranges = chunk_ranges(10, 3);
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);

        let ranges = chunk_ranges(2, 4);
        assert_eq!(ranges, vec![0..1, 1..2]);

        let ranges = chunk_ranges(0, 4);
        assert_eq!(ranges, vec![0..0]);
    }
}
