//! Dense linear-algebra kernels over row-major `f32` matrices.
//!
//! Pure Rust, no BLAS/LAPACK. Provides what the co-occurrence SVD model needs:
//! - [`orthonormalize_columns`]: modified Gram-Schmidt QR (only Q is kept)
//! - [`svd_full`]: Golub-Reinsch bidiagonalization + implicit-shift QR
//! - [`svd_topk`]: randomized top-k SVD (Halko, Martinsson & Tropp, 2011)

#![allow(clippy::needless_range_loop)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::cast_precision_loss)]

use embed_core::{AllocError, checked_len, zeroed};
use thiserror::Error;

mod svd;

pub use svd::{
    DEFAULT_MAX_ITERATIONS, DEFAULT_POWER_ITERATIONS, Svd, TopK, svd_full, svd_full_with,
    svd_topk, svd_topk_with,
};

/// Errors from linear-algebra operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinalgError {
    #[error("matrix {rows}x{cols} has fewer rows than columns")]
    FewerRowsThanColumns { rows: usize, cols: usize },
    #[error("rank {rank} needs 2*rank < min({rows}, {cols})")]
    RankTooLarge { rank: usize, rows: usize, cols: usize },
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("invalid shape: product {product} does not match length {length}")]
    InvalidShape { product: usize, length: usize },
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

/// A matrix stored in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub data: Vec<f32>,
    pub rows: usize,
    pub cols: usize,
}

impl Matrix {
    pub fn new(data: Vec<f32>, rows: usize, cols: usize) -> Result<Self, LinalgError> {
        let product = checked_len(rows, cols)?;
        if data.len() != product {
            return Err(LinalgError::InvalidShape {
                product,
                length: data.len(),
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// A zero matrix; the allocation is overflow-checked and fallible.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self, AllocError> {
        Ok(Self {
            data: zeroed(checked_len(rows, cols)?)?,
            rows,
            cols,
        })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn transpose(&self) -> Result<Self, AllocError> {
        let mut result = Self::zeros(self.cols, self.rows)?;
        for i in 0..self.rows {
            for j in 0..self.cols {
                result.set(j, i, self.get(i, j));
            }
        }
        Ok(result)
    }

    pub fn frobenius_norm(&self) -> f32 {
        self.data.iter().map(|x| x * x).sum::<f32>().sqrt()
    }
}

/// Matrix multiplication: C = A * B
pub fn matmul(a: &Matrix, b: &Matrix) -> Result<Matrix, LinalgError> {
    if a.cols != b.rows {
        return Err(LinalgError::DimensionMismatch {
            expected: a.cols,
            got: b.rows,
        });
    }

    let mut c = Matrix::zeros(a.rows, b.cols)?;
    let mut acc = vec![0.0f64; b.cols];
    for i in 0..a.rows {
        acc.fill(0.0);
        for k in 0..a.cols {
            let aik = f64::from(a.get(i, k));
            if aik == 0.0 {
                continue;
            }
            for (sum, &bkj) in acc.iter_mut().zip(b.row(k)) {
                *sum += aik * f64::from(bkj);
            }
        }
        for (j, &sum) in acc.iter().enumerate() {
            c.set(i, j, sum as f32);
        }
    }
    Ok(c)
}

/// Transposed-left multiplication: C = A' * B, without materializing A'.
pub fn matmul_tn(a: &Matrix, b: &Matrix) -> Result<Matrix, LinalgError> {
    if a.rows != b.rows {
        return Err(LinalgError::DimensionMismatch {
            expected: a.rows,
            got: b.rows,
        });
    }

    let mut acc = vec![0.0f64; checked_len(a.cols, b.cols)?];
    for k in 0..a.rows {
        let bk = b.row(k);
        for (i, &aki) in a.row(k).iter().enumerate() {
            if aki == 0.0 {
                continue;
            }
            let aki = f64::from(aki);
            let out = &mut acc[i * b.cols..(i + 1) * b.cols];
            for (sum, &bkj) in out.iter_mut().zip(bk) {
                *sum += aki * f64::from(bkj);
            }
        }
    }
    Matrix::new(acc.into_iter().map(|x| x as f32).collect(), a.cols, b.cols)
}

/// Orthonormalize the columns of `q` in place with modified Gram-Schmidt.
///
/// This is the Q factor of a QR decomposition; R is not needed by any caller
/// and is discarded. A column that is (numerically) dependent on the ones
/// before it is zeroed instead of being normalized.
pub fn orthonormalize_columns(q: &mut Matrix) {
    let (m, n) = (q.rows, q.cols);
    let mut col = vec![0.0f64; m];
    let mut basis = vec![0.0f64; m];

    for k in 0..n {
        for j in 0..m {
            col[j] = f64::from(q.data[j * n + k]);
        }
        let original = col.iter().map(|x| x * x).sum::<f64>().sqrt();

        for i in 0..k {
            for j in 0..m {
                basis[j] = f64::from(q.data[j * n + i]);
            }
            let r: f64 = basis.iter().zip(&col).map(|(b, c)| b * c).sum();
            for (c, b) in col.iter_mut().zip(&basis) {
                *c -= r * b;
            }
        }

        let norm = col.iter().map(|x| x * x).sum::<f64>().sqrt();
        let keep = norm > 1e-6 * original.max(f64::MIN_POSITIVE);
        for j in 0..m {
            q.data[j * n + k] = if keep { (col[j] / norm) as f32 } else { 0.0 };
        }
    }
}
