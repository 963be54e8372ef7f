//! Row-parallel helpers for per-pixel kernels.

use rayon::prelude::*;

/// Chunks per rayon thread. More chunks than threads keeps uneven rows balanced.
const CHUNKS_PER_THREAD: usize = 2;

/// Rows per chunk so that `height` splits into roughly `threads * 2` chunks. At least 1.
#[inline]
pub fn rows_per_chunk(height: usize) -> usize {
    let num_chunks = rayon::current_num_threads() * CHUNKS_PER_THREAD;
    (height / num_chunks).max(1)
}

/// Fills `data` in parallel with `f(index)`.
pub fn parallel_chunked<T, F>(data: &mut [T], f: F)
where
    T: Send + Sync,
    F: Fn(usize) -> T + Sync + Send,
{
    if data.is_empty() {
        return;
    }

    let num_chunks = rayon::current_num_threads() * CHUNKS_PER_THREAD;
    let chunk_size = (data.len() / num_chunks).max(1);

    data.par_chunks_mut(chunk_size)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            let start_idx = chunk_idx * chunk_size;
            for (i, val) in chunk.iter_mut().enumerate() {
                *val = f(start_idx + i);
            }
        });
}

/// Calls `f(y, row)` for every row of a row-major buffer, rows processed in parallel chunks.
///
/// # Panics
/// If `row_len` is 0 or does not divide `data.len()`.
pub fn for_each_row<T, F>(data: &mut [T], row_len: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    assert!(row_len > 0, "row_len must be > 0");
    assert_eq!(data.len() % row_len, 0, "buffer is not a whole number of rows");
    if data.is_empty() {
        return;
    }

    let height = data.len() / row_len;
    let rows = rows_per_chunk(height);

    data.par_chunks_mut(rows * row_len)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            let first_row = chunk_idx * rows;
            for (i, row) in chunk.chunks_mut(row_len).enumerate() {
                f(first_row + i, row);
            }
        });
}
