//! Row-parallel helpers.
//!
//! Every per-pixel stage writes whole output rows from read-only inputs, so
//! the scheduling policy can be swapped between a rayon pool and a plain loop
//! without touching the stage code.

use ndarray::{ArrayViewMut2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Minimum row count before work is handed to rayon.
/// Below this the fork/join overhead dominates.
const PARALLEL_ROW_THRESHOLD: usize = 64;

/// Scheduling policy for per-row work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Execution {
    Sequential,
    #[default]
    Parallel,
}

impl Execution {
    fn use_pool(self, rows: usize) -> bool {
        self == Execution::Parallel && rows >= PARALLEL_ROW_THRESHOLD
    }
}

/// Fill every row of `output` with `kernel(row_index, row_slice)`.
///
/// The kernel must only read shared state; rows are independent.
pub fn fill_rows<T, K>(mut output: ArrayViewMut2<T>, execution: Execution, kernel: K)
where
    T: Send + Clone + Default,
    K: Fn(usize, &mut [T]) + Sync,
{
    let rows = output.nrows();
    if rows == 0 || output.ncols() == 0 {
        return;
    }

    if execution.use_pool(rows) {
        let output_rows: Vec<_> = output.axis_iter_mut(Axis(0)).collect();
        output_rows
            .into_par_iter()
            .enumerate()
            .for_each(|(r, mut row)| match row.as_slice_mut() {
                Some(slice) => kernel(r, slice),
                None => {
                    let mut buffer = row.to_vec();
                    kernel(r, &mut buffer);
                    row.iter_mut().zip(buffer).for_each(|(dst, v)| *dst = v);
                }
            });
    } else {
        let mut buffer = vec![T::default(); output.ncols()];
        for (r, mut row) in output.axis_iter_mut(Axis(0)).enumerate() {
            match row.as_slice_mut() {
                Some(slice) => kernel(r, slice),
                None => {
                    buffer.iter_mut().zip(row.iter()).for_each(|(b, v)| *b = v.clone());
                    kernel(r, &mut buffer);
                    row.iter_mut()
                        .zip(buffer.iter())
                        .for_each(|(dst, v)| *dst = v.clone());
                }
            }
        }
    }
}

/// Map every row index to a partial result and fold them together.
pub fn reduce_rows<A, M, R>(rows: usize, execution: Execution, identity: A, map: M, reduce: R) -> A
where
    A: Send + Sync + Clone,
    M: Fn(usize) -> A + Sync + Send,
    R: Fn(A, A) -> A + Sync + Send,
{
    if execution.use_pool(rows) {
        (0..rows)
            .into_par_iter()
            .map(&map)
            .reduce(|| identity.clone(), &reduce)
    } else {
        (0..rows).map(map).fold(identity, reduce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_fill_rows_policies_agree() {
        let mut seq = Array2::<f32>::zeros((200, 7));
        let mut par = Array2::<f32>::zeros((200, 7));
        let kernel = |r: usize, row: &mut [f32]| {
            for (c, v) in row.iter_mut().enumerate() {
                *v = (r * 10 + c) as f32;
            }
        };

        fill_rows(seq.view_mut(), Execution::Sequential, kernel);
        fill_rows(par.view_mut(), Execution::Parallel, kernel);

        assert_eq!(seq, par);
        assert_eq!(seq[[199, 6]], 1996.0);
    }

    #[test]
    fn test_fill_rows_non_contiguous_view() {
        let mut data = Array2::<f64>::zeros((4, 6));
        let transposed = data.view_mut().reversed_axes();
        fill_rows(transposed, Execution::Sequential, |r, row| {
            row.iter_mut().for_each(|v| *v = r as f64);
        });
        // Rows of the transposed view are columns of the original.
        assert_eq!(data[[3, 5]], 5.0);
        assert_eq!(data[[0, 2]], 2.0);
    }

    fn fill_transposed<F: crate::float_trait::NlfFloat>() -> Array2<F> {
        let mut data = Array2::<F>::zeros((3, 5));
        fill_rows(data.view_mut().reversed_axes(), Execution::Sequential, |r, row| {
            row.iter_mut().for_each(|v| *v = F::from_f64_c(r as f64 * 0.5));
        });
        data
    }

    #[test]
    fn test_fill_rows_generic_pixel_types() {
        assert_eq!(fill_transposed::<f32>()[[2, 4]], 2.0f32);
        assert_eq!(fill_transposed::<f64>()[[0, 3]], 1.5f64);
    }

    #[test]
    fn test_reduce_rows_sum() {
        for execution in [Execution::Sequential, Execution::Parallel] {
            let total = reduce_rows(1000, execution, 0usize, |r| r, |a, b| a + b);
            assert_eq!(total, 999 * 1000 / 2);
        }
    }

    #[test]
    fn test_execution_serde() {
        let json = serde_json::to_string(&Execution::Sequential).unwrap();
        assert_eq!(json, "\"sequential\"");
        let back: Execution = serde_json::from_str("\"parallel\"").unwrap();
        assert_eq!(back, Execution::Parallel);
    }
}
