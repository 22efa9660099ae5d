//! Domain decomposition: matrix multiplication split by contiguous row ranges.
//!
//! ```text
//!   rows 0..2  -> Worker-1 ┐
//!   rows 2..4  -> Worker-2 ├─ each writes only its own slice of R
//!   rows 4..7  -> Worker-3 ┘  (remainder rows go to the last worker)
//! ```
//!
//! The output buffer is split into disjoint mutable slices before any worker
//! starts, so the borrow checker proves that no two workers touch the same
//! cell and the output needs no lock.

use std::fmt;
use std::ops::Range;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{ConcurrencyError, Result};
use crate::pool::{WorkItem, WorkerPool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<i64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0; rows * cols],
        }
    }

    pub fn from_rows(rows: Vec<Vec<i64>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);

        for (index, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(ConcurrencyError::RaggedMatrix {
                    row: index,
                    expected: cols,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }

        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    /// Cell (i, j) holds `(i + j + offset) % 10`.
    pub fn patterned(rows: usize, cols: usize, offset: usize) -> Self {
        let data = (0..rows)
            .flat_map(|i| (0..cols).map(move |j| ((i + j + offset) % 10) as i64))
            .collect();
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> i64 {
        self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[i64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn to_rows(&self) -> Vec<Vec<i64>> {
        (0..self.rows).map(|r| self.row(r).to_vec()).collect()
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..self.rows {
            let line: Vec<String> = self.row(r).iter().map(|v| format!("{v:4}")).collect();
            writeln!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

/// Splits `0..rows` into `workers` contiguous ranges.
///
/// The first `workers - 1` ranges hold `rows / workers` rows each and the last
/// one takes whatever is left, so with more workers than rows every range but
/// the last is empty.
pub fn partition_rows(rows: usize, workers: usize) -> Vec<Range<usize>> {
    if workers == 0 {
        return Vec::new();
    }
    let per_worker = rows / workers;
    (0..workers)
        .map(|i| {
            let start = i * per_worker;
            let end = if i == workers - 1 { rows } else { start + per_worker };
            start..end
        })
        .collect()
}

fn check_conformant(a: &Matrix, b: &Matrix) -> Result<()> {
    if a.cols != b.rows {
        return Err(ConcurrencyError::DimensionMismatch {
            left_cols: a.cols,
            right_rows: b.rows,
        });
    }
    Ok(())
}

/// Fills `out` (rows `range` of the product, row-major) with the dot products.
fn multiply_rows(a: &Matrix, b: &Matrix, range: Range<usize>, out: &mut [i64]) {
    for (offset, i) in range.enumerate() {
        for j in 0..b.cols {
            let mut sum = 0;
            for k in 0..a.cols {
                sum += a.get(i, k) * b.get(k, j);
            }
            out[offset * b.cols + j] = sum;
        }
    }
}

/// Reference single-threaded product.
pub fn multiply_sequential(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    check_conformant(a, b)?;
    let mut product = Matrix::zeros(a.rows, b.cols);
    multiply_rows(a, b, 0..a.rows, &mut product.data);
    Ok(product)
}

/// Data-parallel product on the rayon pool, one task per output row.
pub fn par_multiply(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    check_conformant(a, b)?;
    let mut product = Matrix::zeros(a.rows, b.cols);
    if b.cols == 0 {
        return Ok(product);
    }
    product
        .data
        .par_chunks_mut(b.cols)
        .enumerate()
        .for_each(|(i, out)| multiply_rows(a, b, i..i + 1, out));
    Ok(product)
}

#[derive(Debug, Clone)]
pub struct MatrixProduct {
    pub matrix: Matrix,
    pub partitions: Vec<Range<usize>>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct DomainDecompositionEngine {
    workers: usize,
    pool: WorkerPool,
}

impl DomainDecompositionEngine {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(ConcurrencyError::ZeroWorkers);
        }
        Ok(Self {
            workers,
            pool: WorkerPool::new("Worker"),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn multiply(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        self.run(a, b).map(|product| product.matrix)
    }

    /// Multiplies `a` by `b`, one row range per worker, and reports timing.
    ///
    /// Non-conformant operands are rejected before any worker is launched.
    pub fn run(&self, a: &Matrix, b: &Matrix) -> Result<MatrixProduct> {
        check_conformant(a, b)?;

        let partitions = partition_rows(a.rows, self.workers);
        let mut product = Matrix::zeros(a.rows, b.cols);
        let started = Instant::now();

        let mut remaining = product.data.as_mut_slice();
        let mut items: Vec<WorkItem<()>> = Vec::with_capacity(partitions.len());
        for range in partitions.iter().cloned() {
            let (out, rest) = std::mem::take(&mut remaining).split_at_mut(range.len() * b.cols);
            remaining = rest;

            items.push(WorkItem::new(move || {
                if range.is_empty() {
                    debug!("no rows assigned");
                    return Ok(());
                }
                debug!(start = range.start, end = range.end, "computing rows");
                multiply_rows(a, b, range, out);
                Ok(())
            }));
        }

        self.pool.launch_and_join(items).into_values()?;

        let elapsed = started.elapsed();
        info!(
            rows = a.rows,
            cols = b.cols,
            workers = self.workers,
            ?elapsed,
            "matrix product complete"
        );

        Ok(MatrixProduct {
            matrix: product,
            partitions,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Matrix {
        let data = (0..rows)
            .map(|_| (0..cols).map(|_| rng.gen_range(-50..50)).collect())
            .collect();
        Matrix::from_rows(data).unwrap()
    }

    #[test]
    fn test_two_by_two_product_for_any_worker_count() {
        let a = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();
        let b = Matrix::from_rows(vec![vec![5, 6], vec![7, 8]]).unwrap();

        for workers in [1, 2, 4] {
            let engine = DomainDecompositionEngine::new(workers).unwrap();
            let product = engine.multiply(&a, &b).unwrap();
            assert_eq!(product.to_rows(), vec![vec![19, 22], vec![43, 50]]);
        }
    }

    #[test]
    fn test_partitions_cover_every_row_exactly_once() {
        for rows in 1..=24 {
            for workers in 1..=rows {
                let ranges = partition_rows(rows, workers);
                assert_eq!(ranges.len(), workers);

                let mut covered = vec![0u32; rows];
                for range in &ranges {
                    for row in range.clone() {
                        covered[row] += 1;
                    }
                }
                assert!(covered.iter().all(|&c| c == 1), "rows={rows} workers={workers}");

                for pair in ranges.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                }
                let base = rows / workers;
                assert!(ranges[..workers - 1].iter().all(|r| r.len() == base));
                assert_eq!(ranges[workers - 1].len(), rows - base * (workers - 1));
            }
        }
    }

    #[test]
    fn test_more_workers_than_rows() {
        let ranges = partition_rows(3, 5);
        assert_eq!(ranges, vec![0..0, 0..0, 0..0, 0..0, 0..3]);

        let a = Matrix::patterned(3, 4, 1);
        let b = Matrix::patterned(4, 2, 2);
        let engine = DomainDecompositionEngine::new(5).unwrap();
        let product = engine.run(&a, &b).unwrap();
        assert_eq!(product.matrix, multiply_sequential(&a, &b).unwrap());
        assert_eq!(product.partitions.len(), 5);
    }

    #[test]
    fn test_random_products_match_sequential() {
        let mut rng = StdRng::seed_from_u64(7);
        for (rows, inner, cols) in [(1, 1, 1), (5, 3, 7), (17, 9, 4), (32, 32, 32)] {
            let a = random_matrix(&mut rng, rows, inner);
            let b = random_matrix(&mut rng, inner, cols);
            let expected = multiply_sequential(&a, &b).unwrap();

            for workers in [1, 2, 3, 8] {
                let engine = DomainDecompositionEngine::new(workers).unwrap();
                assert_eq!(engine.multiply(&a, &b).unwrap(), expected);
            }
            assert_eq!(par_multiply(&a, &b).unwrap(), expected);
        }
    }

    #[test]
    fn test_non_conformant_operands_fail_fast() {
        let a = Matrix::patterned(2, 3, 0);
        let b = Matrix::patterned(2, 2, 0);
        let engine = DomainDecompositionEngine::new(2).unwrap();

        assert_eq!(
            engine.multiply(&a, &b).unwrap_err(),
            ConcurrencyError::DimensionMismatch {
                left_cols: 3,
                right_rows: 2
            }
        );
        assert!(par_multiply(&a, &b).is_err());
        assert!(multiply_sequential(&a, &b).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert_eq!(
            DomainDecompositionEngine::new(0).unwrap_err(),
            ConcurrencyError::ZeroWorkers
        );
        assert!(partition_rows(4, 0).is_empty());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = Matrix::from_rows(vec![vec![1, 2], vec![3]]).unwrap_err();
        assert_eq!(
            err,
            ConcurrencyError::RaggedMatrix {
                row: 1,
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_patterned_values_and_display() {
        let m = Matrix::patterned(2, 3, 8);
        assert_eq!(m.to_rows(), vec![vec![8, 9, 0], vec![9, 0, 1]]);
        assert_eq!(m.to_string(), "   8    9    0\n   9    0    1\n");
    }

    #[test]
    fn test_empty_dimensions() {
        let a = Matrix::zeros(3, 0);
        let b = Matrix::zeros(0, 2);
        let engine = DomainDecompositionEngine::new(2).unwrap();
        assert_eq!(engine.multiply(&a, &b).unwrap(), Matrix::zeros(3, 2));

        let c = Matrix::zeros(2, 0);
        assert_eq!(par_multiply(&b, &c).unwrap(), Matrix::zeros(0, 0));
    }
}
