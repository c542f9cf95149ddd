//! Full and randomized truncated singular value decomposition.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::{LinalgError, Matrix, matmul, matmul_tn, orthonormalize_columns};

/// Sweep limit per singular value in [`svd_full`].
pub const DEFAULT_MAX_ITERATIONS: usize = 50;

/// Power iterations used by [`svd_topk`].
pub const DEFAULT_POWER_ITERATIONS: usize = 2;

/// Result of a full SVD: `A = U * diag(s) * V'`.
///
/// `u` is `m x n`, `s` has `n` entries and `v` is `n x n`. The singular
/// values are non-negative but **not** sorted.
#[derive(Debug, Clone)]
pub struct Svd {
    pub u: Matrix,
    pub s: Vec<f32>,
    pub v: Matrix,
    /// False when some singular value hit the sweep limit; the factors are
    /// then the best approximation reached.
    pub converged: bool,
}

/// Result of a truncated SVD: the `k` leading left singular vectors and
/// their singular values, in descending order.
#[derive(Debug, Clone)]
pub struct TopK {
    pub u: Matrix,
    pub s: Vec<f32>,
}

fn pythag(a: f64, b: f64) -> f64 {
    let (mut x, mut y) = (a.abs(), b.abs());
    if x < y {
        std::mem::swap(&mut x, &mut y);
    }
    if x == 0.0 {
        0.0
    } else {
        x * (1.0 + (y * y) / (x * x)).sqrt()
    }
}

/// Golub-Reinsch SVD of an `m x n` matrix with `m >= n`.
pub fn svd_full(a: &Matrix) -> Result<Svd, LinalgError> {
    svd_full_with(a, DEFAULT_MAX_ITERATIONS)
}

/// [`svd_full`] with an explicit sweep limit.
///
/// Householder bidiagonalization followed by implicitly shifted QR sweeps.
/// Computed in `f64` and rounded to `f32` at the end.
pub fn svd_full_with(a: &Matrix, max_iter: usize) -> Result<Svd, LinalgError> {
    let (m, n) = (a.rows, a.cols);
    if m < n {
        return Err(LinalgError::FewerRowsThanColumns { rows: m, cols: n });
    }

    let mut u: Vec<f64> = a.data.iter().map(|&x| f64::from(x)).collect();
    let mut v = vec![0.0f64; n * n];
    let mut p = vec![0.0f64; n]; // superdiagonal
    let mut q = vec![0.0f64; n]; // diagonal

    let mut eps = 1e-15f64;
    let tol = 1e-64 / eps;

    let mut g = 0.0f64;
    let mut x = 0.0f64;
    let mut l = 0usize;

    // Householder reduction to bidiagonal form.
    for i in 0..n {
        p[i] = g;
        l = i + 1;

        let mut s: f64 = (i..m).map(|j| u[j * n + i] * u[j * n + i]).sum();
        if s <= tol {
            g = 0.0;
        } else {
            let f = u[i * n + i];
            g = if f < 0.0 { s.sqrt() } else { -s.sqrt() };
            let d = f * g - s;
            u[i * n + i] = f - g;
            for j in l..n {
                s = (i..m).map(|k| u[k * n + i] * u[k * n + j]).sum();
                let f = s / d;
                for k in i..m {
                    u[k * n + j] += f * u[k * n + i];
                }
            }
        }
        q[i] = g;

        s = (l..n).map(|j| u[i * n + j] * u[i * n + j]).sum();
        if s <= tol {
            g = 0.0;
        } else {
            let f = u[i * n + i + 1];
            g = if f < 0.0 { s.sqrt() } else { -s.sqrt() };
            let d = f * g - s;
            u[i * n + i + 1] = f - g;
            for j in l..n {
                p[j] = u[i * n + j] / d;
            }
            for j in l..m {
                s = (l..n).map(|k| u[j * n + k] * u[i * n + k]).sum();
                for k in l..n {
                    u[j * n + k] += s * p[k];
                }
            }
        }

        x = x.max(q[i].abs() + p[i].abs());
    }

    // Accumulate right-hand transformations.
    for i in (0..n).rev() {
        if g != 0.0 {
            let d = g * u[i * n + i + 1];
            for j in l..n {
                v[j * n + i] = u[i * n + j] / d;
            }
            for j in l..n {
                let s: f64 = (l..n).map(|k| u[i * n + k] * v[k * n + j]).sum();
                for k in l..n {
                    v[k * n + j] += s * v[k * n + i];
                }
            }
        }
        for j in l..n {
            v[i * n + j] = 0.0;
            v[j * n + i] = 0.0;
        }
        v[i * n + i] = 1.0;
        g = p[i];
        l = i;
    }

    // Accumulate left-hand transformations.
    for i in (0..n).rev() {
        let l = i + 1;
        let g = q[i];
        for j in l..n {
            u[i * n + j] = 0.0;
        }
        if g != 0.0 {
            let d = u[i * n + i] * g;
            for j in l..n {
                let s: f64 = (l..m).map(|k| u[k * n + i] * u[k * n + j]).sum();
                let f = s / d;
                for k in i..m {
                    u[k * n + j] += f * u[k * n + i];
                }
            }
            for j in i..m {
                u[j * n + i] /= g;
            }
        } else {
            for j in i..m {
                u[j * n + i] = 0.0;
            }
        }
        u[i * n + i] += 1.0;
    }

    // Diagonalize the bidiagonal form.
    eps *= x;
    let mut converged = true;
    for k in (0..n).rev() {
        let mut settled = false;
        for iteration in 0..max_iter {
            // Test for splitting.
            let mut l = k;
            let mut split;
            loop {
                split = p[l].abs() <= eps;
                if split {
                    break;
                }
                if l == 0 {
                    split = true;
                    break;
                }
                if q[l - 1].abs() <= eps {
                    break;
                }
                l -= 1;
            }

            // Cancel p[l] when q[l-1] is negligible.
            if !split {
                let h = l - 1;
                let (mut e, mut s) = (0.0f64, 1.0f64);
                for i in l..=k {
                    let f = s * p[i];
                    p[i] *= e;
                    if f.abs() <= eps {
                        break;
                    }
                    let g = q[i];
                    let d = pythag(f, g);
                    q[i] = d;
                    e = g / d;
                    s = -f / d;
                    for j in 0..m {
                        let y = u[j * n + h];
                        let z = u[j * n + i];
                        u[j * n + h] = y * e + z * s;
                        u[j * n + i] = -y * s + z * e;
                    }
                }
            }

            let z = q[k];
            if l == k {
                settled = true;
                break;
            }
            if iteration + 1 >= max_iter {
                break;
            }

            // Shift from the bottom 2x2 minor.
            let mut x = q[l];
            let mut y = q[k - 1];
            let mut g = p[k - 1];
            let mut d = p[k];
            let mut f = ((y - z) * (y + z) + (g - d) * (g + d)) / (2.0 * d * y);
            g = pythag(f, 1.0);
            f = if f < 0.0 {
                ((x - z) * (x + z) + d * (y / (f - g) - d)) / x
            } else {
                ((x - z) * (x + z) + d * (y / (f + g) - d)) / x
            };

            // QR sweep.
            let (mut e, mut s) = (1.0f64, 1.0f64);
            for i in l + 1..=k {
                g = p[i];
                y = q[i];
                d = s * g;
                g *= e;
                let mut z = pythag(f, d);
                p[i - 1] = z;
                e = f / z;
                s = d / z;
                f = x * e + g * s;
                g = -x * s + g * e;
                d = y * s;
                y *= e;
                for j in 0..n {
                    let vx = v[j * n + i - 1];
                    let vz = v[j * n + i];
                    v[j * n + i - 1] = vx * e + vz * s;
                    v[j * n + i] = -vx * s + vz * e;
                }
                z = pythag(f, d);
                q[i - 1] = z;
                e = f / z;
                s = d / z;
                f = e * g + s * y;
                x = -s * g + e * y;
                for j in 0..m {
                    let uy = u[j * n + i - 1];
                    let uz = u[j * n + i];
                    u[j * n + i - 1] = uy * e + uz * s;
                    u[j * n + i] = -uy * s + uz * e;
                }
            }
            p[l] = 0.0;
            p[k] = f;
            q[k] = x;
        }

        if !settled {
            converged = false;
            tracing::debug!(index = k, max_iter, "svd did not converge");
        }
        // Keep s non-negative, converged or not.
        if q[k] < 0.0 {
            q[k] = -q[k];
            for j in 0..n {
                v[j * n + k] = -v[j * n + k];
            }
        }
    }

    let narrow = |values: Vec<f64>| values.into_iter().map(|x| x as f32).collect::<Vec<_>>();
    Ok(Svd {
        u: Matrix::new(narrow(u), m, n)?,
        s: narrow(q),
        v: Matrix::new(narrow(v), n, n)?,
        converged,
    })
}

/// Randomized rank-`k` SVD of `a`, returning the `k` leading left singular
/// vectors (`m x k`).
///
/// Requires `k >= 1` and `2k < min(m, n)`.
pub fn svd_topk<R: Rng + ?Sized>(a: &Matrix, k: usize, rng: &mut R) -> Result<TopK, LinalgError> {
    svd_topk_with(a, k, DEFAULT_POWER_ITERATIONS, rng)
}

/// [`svd_topk`] with an explicit number of power iterations.
pub fn svd_topk_with<R: Rng + ?Sized>(
    a: &Matrix,
    k: usize,
    power_iterations: usize,
    rng: &mut R,
) -> Result<TopK, LinalgError> {
    let (m, n) = (a.rows, a.cols);
    let l = k.saturating_mul(2);
    if k == 0 || l >= m.min(n) {
        return Err(LinalgError::RankTooLarge {
            rank: k,
            rows: m,
            cols: n,
        });
    }

    // Gaussian sketch of the range of A.
    let mut omega = Matrix::zeros(n, l)?;
    for x in &mut omega.data {
        *x = rng.sample(StandardNormal);
    }
    let mut q = matmul(a, &omega)?;
    orthonormalize_columns(&mut q);

    for _ in 0..power_iterations {
        let mut y = matmul_tn(a, &q)?;
        orthonormalize_columns(&mut y);
        q = matmul(a, &y)?;
        orthonormalize_columns(&mut q);
    }

    // B = Q'A is l x n; factor B' (n x l) so that B = V_b S U_b'.
    let bt = matmul_tn(&q, a)?.transpose()?;
    let small = svd_full(&bt)?;

    let mut order: Vec<usize> = (0..l).collect();
    order.sort_by(|&i, &j| small.s[j].abs().total_cmp(&small.s[i].abs()));
    order.truncate(k);

    let mut vk = Matrix::zeros(l, k)?;
    for i in 0..l {
        for (j, &col) in order.iter().enumerate() {
            vk.set(i, j, small.v.get(i, col));
        }
    }

    Ok(TopK {
        u: matmul(&q, &vk)?,
        s: order.iter().map(|&i| small.s[i]).collect(),
    })
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    const M: usize = 11;
    const N: usize = 5;

    #[rustfmt::skip]
    const A: [f32; M * N] = [
         0.75120, -1.60768, -0.39993,  0.64517, -0.11946,
         1.05911,  1.07633,  0.37630,  1.29926,  0.36433,
         0.05262, -0.03317, -0.71406,  0.51052, -0.13106,
         0.43550, -0.95293, -0.13295, -0.90264, -0.00450,
         0.45933, -0.79411, -0.59319, -0.26540, -0.92404,
         0.36340,  0.83518,  0.71027,  0.87006, -0.12123,
         1.04111, -1.45347, -1.01267, -1.18121,  0.24258,
         0.79377, -1.46045,  0.03335, -1.99452, -0.73553,
         0.44600, -2.07440,  0.47107,  1.02838, -0.16369,
        -0.35393,  1.26356, -0.91869,  0.55792, -0.11723,
         0.02603, -1.10818,  0.85291,  0.16045,  0.40942,
    ];

    #[rustfmt::skip]
    const U: [f32; M * N] = [
        -0.28031,  0.41322,  0.34954, -0.06638,  0.03357,
         0.27951,  0.33712,  0.20785,  0.72423,  0.10907,
         0.02264,  0.06977,  0.39958, -0.17323, -0.01172,
        -0.28556, -0.09634, -0.03057,  0.13056,  0.13344,
        -0.22884, -0.01907,  0.34352, -0.01519, -0.58377,
         0.22669,  0.22046, -0.08254,  0.38917, -0.31535,
        -0.44717, -0.14222,  0.37297,  0.24387,  0.54053,
        -0.51652, -0.30451, -0.15696,  0.36146, -0.39174,
        -0.29500,  0.65146, -0.03221, -0.21751, -0.15453,
         0.27997, -0.15046,  0.46675, -0.17688, -0.04636,
        -0.15916,  0.30414, -0.40814, -0.06017,  0.23905,
    ];

    const S: [f32; N] = [4.66593, 2.97433, 2.03381, 1.59874, 1.19392];

    #[rustfmt::skip]
    const V: [f32; N * N] = [
        -0.25092,  0.22273,  0.34012,  0.87832,  0.01758,
         0.84448, -0.41684,  0.06486,  0.32318, -0.06667,
         0.09420,  0.31296, -0.87532,  0.29063, -0.20623,
         0.44906,  0.81841,  0.29426, -0.19175, -0.07210,
         0.11560,  0.09436, -0.16535,  0.05364,  0.97340,
    ];

    fn close_abs(a: f32, b: f32) -> bool {
        (a.abs() - b.abs()).abs() < 1e-3
    }

    fn descending(s: &[f32]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..s.len()).collect();
        order.sort_by(|&i, &j| s[j].total_cmp(&s[i]));
        order
    }

    // --- svd_full ---

    #[test]
    fn full_matches_reference_decomposition() {
        let a = Matrix::new(A.to_vec(), M, N).unwrap();
        let svd = svd_full(&a).unwrap();
        assert!(svd.converged);
        assert_eq!((svd.u.rows, svd.u.cols), (M, N));
        assert_eq!((svd.v.rows, svd.v.cols), (N, N));

        // Compare column by column after putting S in descending order;
        // each singular vector is only defined up to sign.
        let order = descending(&svd.s);
        for (j, &col) in order.iter().enumerate() {
            assert!(
                close_abs(S[j], svd.s[col]),
                "s[{j}]: expected {}, got {}",
                S[j],
                svd.s[col]
            );
            for i in 0..M {
                assert!(
                    close_abs(U[i * N + j], svd.u.get(i, col)),
                    "u[{i},{j}]: expected {}, got {}",
                    U[i * N + j],
                    svd.u.get(i, col)
                );
            }
            for i in 0..N {
                assert!(
                    close_abs(V[i * N + j], svd.v.get(i, col)),
                    "v[{i},{j}]: expected {}, got {}",
                    V[i * N + j],
                    svd.v.get(i, col)
                );
            }
        }
    }

    #[test]
    fn full_reconstructs_input() {
        let a = Matrix::new(A.to_vec(), M, N).unwrap();
        let svd = svd_full(&a).unwrap();
        for i in 0..M {
            for j in 0..N {
                let x: f32 = (0..N)
                    .map(|k| svd.u.get(i, k) * svd.s[k] * svd.v.get(j, k))
                    .sum();
                assert!((x - a.get(i, j)).abs() < 1e-4, "a[{i},{j}]");
            }
        }
    }

    #[test]
    fn full_singular_values_are_non_negative() {
        let a = Matrix::new(vec![-3.0, 0.0, 0.0, -2.0, 0.0, 0.0], 3, 2).unwrap();
        let svd = svd_full(&a).unwrap();
        let mut s = svd.s.clone();
        s.sort_by(|x, y| y.total_cmp(x));
        assert!((s[0] - 3.0).abs() < 1e-6);
        assert!((s[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn full_returns_partial_result_at_sweep_limit() {
        let a = Matrix::new(A.to_vec(), M, N).unwrap();
        for max_iter in [0, 1] {
            let svd = svd_full_with(&a, max_iter).unwrap();
            assert!(!svd.converged, "max_iter {max_iter}");
            assert_eq!(svd.s.len(), N);
            assert!(
                svd.s.iter().all(|&x| x >= 0.0 && x.is_finite()),
                "max_iter {max_iter}: {:?}",
                svd.s
            );
        }
    }

    #[test]
    fn full_rejects_wide_matrix() {
        let a = Matrix::zeros(2, 3).unwrap();
        assert!(matches!(
            svd_full(&a),
            Err(LinalgError::FewerRowsThanColumns { rows: 2, cols: 3 })
        ));
    }

    #[test]
    fn full_handles_zero_matrix() {
        let a = Matrix::zeros(4, 3).unwrap();
        let svd = svd_full(&a).unwrap();
        assert!(svd.s.iter().all(|&x| x == 0.0));
    }

    // --- svd_topk ---

    #[test]
    fn topk_rejects_rank_too_large() {
        let a = Matrix::new(A.to_vec(), M, N).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        // 2k = 6 >= min(11, 5)
        assert!(matches!(
            svd_topk(&a, 3, &mut rng),
            Err(LinalgError::RankTooLarge { rank: 3, .. })
        ));
        assert!(matches!(
            svd_topk(&a, 0, &mut rng),
            Err(LinalgError::RankTooLarge { rank: 0, .. })
        ));
    }

    #[test]
    fn topk_recovers_leading_singular_vector() {
        // k = 2 sketches l = 4 columns of a rank-5 matrix; with power
        // iterations the dominant direction (4.67 vs 2.97) is recovered.
        let a = Matrix::new(A.to_vec(), M, N).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let top = svd_topk(&a, 2, &mut rng).unwrap();
        assert_eq!((top.u.rows, top.u.cols), (M, 2));
        assert!(top.s[0] >= top.s[1]);
        assert!((top.s[0] - S[0]).abs() < 0.05, "s0 = {}", top.s[0]);

        let dot: f32 = (0..M).map(|i| top.u.get(i, 0) * U[i * N]).sum();
        assert!(dot.abs() > 0.99, "alignment {dot}");
    }

    #[test]
    fn topk_ranks_by_magnitude() {
        // The dominant direction has a negative entry.
        let diag = [-10.0f32, 5.0, 4.0, 3.0, 2.0, 1.0, 0.5, 0.25];
        let mut a = Matrix::zeros(12, 8).unwrap();
        for (i, &d) in diag.iter().enumerate() {
            a.set(i, i, d);
        }
        let mut rng = SmallRng::seed_from_u64(3);
        let top = svd_topk(&a, 2, &mut rng).unwrap();
        assert!((top.s[0] - 10.0).abs() < 0.05, "s = {:?}", top.s);
        assert!(top.s.iter().all(|&x| x >= 0.0));
        assert!(top.u.get(0, 0).abs() > 0.99);
    }

    #[test]
    fn topk_columns_are_orthonormal() {
        let mut data = Vec::new();
        for i in 0..20 {
            for j in 0..12 {
                data.push(((i * 7 + j * 3) % 11) as f32 - 5.0 + (i as f32) * 0.1);
            }
        }
        let a = Matrix::new(data, 20, 12).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        let top = svd_topk(&a, 3, &mut rng).unwrap();
        let gram = matmul_tn(&top.u, &top.u).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram.get(i, j) - expected).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn topk_is_deterministic_for_a_seed() {
        let a = Matrix::new(A.to_vec(), M, N).unwrap();
        let x = svd_topk(&a, 2, &mut SmallRng::seed_from_u64(3)).unwrap();
        let y = svd_topk(&a, 2, &mut SmallRng::seed_from_u64(3)).unwrap();
        assert_eq!(x.u, y.u);
    }
}
