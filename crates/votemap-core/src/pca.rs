//! Sparsity-aware 2D projection.
//!
//! Standard PCA on a vote matrix whose zeros are semantically overloaded
//! would drag every low-participation voter toward the origin. Two
//! corrections avoid that:
//!
//! - **Centering over observed entries only.** Column means are computed
//!   from stored votes (sentinel folded to 0), subtracted from stored
//!   entries only; missing cells stay exactly zero after centering.
//! - **Per-row density rescaling.** Voter coordinates are multiplied by
//!   `sqrt(n_items / votes_cast)`, items by `sqrt(n_voters / votes_received)`,
//!   pushing sparse rows outward instead of clumping them at the center.
//!
//! The top two singular pairs are found by power iteration with deflation on
//! the implicit centered matrix, so the dense form is never materialized.
//! Start vectors are seeded; reruns with the same snapshot and seed produce
//! identical output.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::error::{ClusterError, ClusterResult};
use crate::matrix::VoteMatrix;
use crate::types::Opinion;

/// Iteration cap for one singular pair.
const MAX_POWER_ITERS: usize = 300;

/// Relative eigenvalue-change tolerance for convergence.
const EIGEN_TOL: f64 = 1e-10;

/// Below this, a deflated operator is treated as numerically zero.
const ZERO_NORM: f64 = 1e-12;

/// Output of the projection step.
#[derive(Debug, Clone)]
pub struct PcaOutput {
    /// Scaled 2D voter coordinates, row-aligned with the matrix.
    pub voter_coords: Vec<[f64; 2]>,
    /// Scaled 2D item coordinates, column-aligned with the matrix (biplot).
    pub item_coords: Vec<[f64; 2]>,
    /// Share of total (Frobenius) variance per component.
    pub variance_explained: [f64; 2],
}

/// Implicit centered matrix: stored entries minus their column mean,
/// missing entries exactly zero.
struct CenteredMatrix<'a> {
    matrix: &'a VoteMatrix,
    col_means: Vec<f64>,
}

impl<'a> CenteredMatrix<'a> {
    fn new(matrix: &'a VoteMatrix) -> Self {
        let mut sums = vec![0.0f64; matrix.n_items()];
        for row in 0..matrix.n_voters() {
            for &(col, v) in matrix.row(row) {
                sums[col] += Opinion::stored_to_numeric(v);
            }
        }
        let col_means: Vec<f64> = sums
            .iter()
            .zip(matrix.col_nnz())
            .map(|(&sum, &nnz)| if nnz > 0 { sum / nnz as f64 } else { 0.0 })
            .collect();
        Self { matrix, col_means }
    }

    fn entry(&self, col: usize, stored: f32) -> f64 {
        Opinion::stored_to_numeric(stored) - self.col_means[col]
    }

    /// `y = M x` (x over items, y over voters).
    fn matvec(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.matrix.n_voters()];
        for (row, out) in y.iter_mut().enumerate() {
            let mut acc = 0.0;
            for &(col, v) in self.matrix.row(row) {
                acc += self.entry(col, v) * x[col];
            }
            *out = acc;
        }
        y
    }

    /// `x = M^T y` (y over voters, x over items).
    fn rmatvec(&self, y: &[f64]) -> Vec<f64> {
        let mut x = vec![0.0; self.matrix.n_items()];
        for row in 0..self.matrix.n_voters() {
            let yi = y[row];
            if yi == 0.0 {
                continue;
            }
            for &(col, v) in self.matrix.row(row) {
                x[col] += self.entry(col, v) * yi;
            }
        }
        x
    }

    /// Squared Frobenius norm; equals the sum of all squared singular values.
    fn frobenius_sq(&self) -> f64 {
        let mut total = 0.0;
        for row in 0..self.matrix.n_voters() {
            for &(col, v) in self.matrix.row(row) {
                let e = self.entry(col, v);
                total += e * e;
            }
        }
        total
    }
}

/// One singular triple `(sigma, u, v)`.
struct SingularPair {
    sigma: f64,
    u: Vec<f64>,
    v: Vec<f64>,
}

/// Project voters and items into 2D.
///
/// # Errors
///
/// [`ClusterError::Numerical`] when power iteration fails to converge within
/// its cap (the coordinator retries once with a jittered seed) or when the
/// matrix has fewer than two voters.
pub fn project(matrix: &VoteMatrix, seed: u64) -> ClusterResult<PcaOutput> {
    let n = matrix.n_voters();
    let m = matrix.n_items();
    if n < 2 {
        return Err(ClusterError::Numerical(format!(
            "projection needs at least 2 voters, got {n}"
        )));
    }

    let centered = CenteredMatrix::new(matrix);
    let frobenius_sq = centered.frobenius_sq();

    // A fully degenerate window (e.g. unanimous votes on every item) centers
    // to the zero matrix; everyone projects to the origin.
    if frobenius_sq < ZERO_NORM {
        info!("centered matrix is zero; projecting all voters to the origin");
        return Ok(PcaOutput {
            voter_coords: vec![[0.0, 0.0]; n],
            item_coords: vec![[0.0, 0.0]; m],
            variance_explained: [0.0, 0.0],
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let first = top_singular_pair(&centered, &mut rng, &[])?;
    let second = top_singular_pair(&centered, &mut rng, std::slice::from_ref(&first))?;

    debug!(
        sigma1 = first.sigma,
        sigma2 = second.sigma,
        "power iteration converged"
    );

    let variance_explained = [
        first.sigma * first.sigma / frobenius_sq,
        second.sigma * second.sigma / frobenius_sq,
    ];

    let voter_coords: Vec<[f64; 2]> = (0..n)
        .map(|i| {
            let scale = (m as f64 / matrix.row_nnz(i).max(1) as f64).sqrt();
            [
                first.sigma * first.u[i] * scale,
                second.sigma * second.u[i] * scale,
            ]
        })
        .collect();

    let item_coords: Vec<[f64; 2]> = (0..m)
        .map(|j| {
            let scale = (n as f64 / matrix.col_nnz()[j].max(1) as f64).sqrt();
            [
                first.sigma * first.v[j] * scale,
                second.sigma * second.v[j] * scale,
            ]
        })
        .collect();

    info!(
        variance_pc1 = variance_explained[0],
        variance_pc2 = variance_explained[1],
        "computed 2D projection"
    );

    Ok(PcaOutput {
        voter_coords,
        item_coords,
        variance_explained,
    })
}

/// Power iteration on `M^T M` with deflation of already-found pairs.
///
/// Returns a zero triple when the deflated operator vanishes (rank
/// exhausted); that is a valid result, not an error.
fn top_singular_pair(
    centered: &CenteredMatrix<'_>,
    rng: &mut StdRng,
    deflated: &[SingularPair],
) -> ClusterResult<SingularPair> {
    let m = centered.matrix.n_items();
    let n = centered.matrix.n_voters();

    let mut v: Vec<f64> = (0..m).map(|_| rng.gen_range(-1.0..1.0)).collect();
    // Remove components along already-found directions before starting.
    for pair in deflated {
        let proj = dot(&v, &pair.v);
        axpy(&mut v, -proj, &pair.v);
    }
    if normalize(&mut v) < ZERO_NORM {
        return Ok(zero_pair(n, m));
    }

    let mut eigen_prev = 0.0f64;
    for iter in 0..MAX_POWER_ITERS {
        let mut w = centered.rmatvec(&centered.matvec(&v));
        // Deflate: B_k = M^T M - sum_d sigma_d^2 v_d v_d^T.
        for pair in deflated {
            let proj = dot(&w, &pair.v);
            axpy(&mut w, -proj, &pair.v);
        }

        let eigen = norm(&w);
        if eigen < ZERO_NORM {
            // The remaining spectrum is numerically zero (rank exhausted).
            return Ok(zero_pair(n, m));
        }
        for (out, &wi) in v.iter_mut().zip(w.iter()) {
            *out = wi / eigen;
        }

        if iter > 0 && (eigen - eigen_prev).abs() <= EIGEN_TOL * eigen.max(1.0) {
            let sigma = eigen.sqrt();
            let mut u = centered.matvec(&v);
            let u_norm = norm(&u);
            if u_norm < ZERO_NORM {
                return Ok(zero_pair(n, m));
            }
            for ui in &mut u {
                *ui /= u_norm;
            }
            return Ok(SingularPair { sigma, u, v });
        }
        eigen_prev = eigen;
    }

    Err(ClusterError::Numerical(format!(
        "power iteration did not converge within {MAX_POWER_ITERS} iterations"
    )))
}

fn zero_pair(n: usize, m: usize) -> SingularPair {
    SingularPair {
        sigma: 0.0,
        u: vec![0.0; n],
        v: vec![0.0; m],
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn axpy(target: &mut [f64], alpha: f64, source: &[f64]) {
    for (t, &s) in target.iter_mut().zip(source.iter()) {
        *t += alpha * s;
    }
}

fn normalize(a: &mut [f64]) -> f64 {
    let len = norm(a);
    if len > 0.0 {
        for x in a.iter_mut() {
            *x /= len;
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::build_vote_matrix;
    use crate::types::{ItemId, RunParams, VoteRecord, VoterId};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn params() -> RunParams {
        RunParams {
            min_voters: 2,
            min_votes_per_voter: 1,
            ..RunParams::default()
        }
    }

    fn matrix_from(votes: Vec<(VoterId, i64, Opinion)>) -> VoteMatrix {
        let records = votes
            .into_iter()
            .map(|(voter, item, opinion)| VoteRecord {
                voter,
                item: ItemId(item),
                opinion,
                cast_at: now() - chrono::Duration::hours(1),
            })
            .collect();
        build_vote_matrix(records, &HashMap::new(), &params(), now()).expect("matrix")
    }

    fn two_bloc_matrix() -> VoteMatrix {
        let mut votes = Vec::new();
        for i in 0..10 {
            votes.push((VoterId::registered(format!("a{i:02}")), 1, Opinion::Positive));
            votes.push((VoterId::registered(format!("a{i:02}")), 2, Opinion::Negative));
            votes.push((VoterId::registered(format!("b{i:02}")), 1, Opinion::Negative));
            votes.push((VoterId::registered(format!("b{i:02}")), 2, Opinion::Positive));
        }
        matrix_from(votes)
    }

    #[test]
    fn test_two_blocs_separate_on_first_component() {
        let m = two_bloc_matrix();
        let out = project(&m, 42).expect("projection");

        // Opposed blocs land on opposite sides of the first axis.
        let x_of = |prefix: &str| -> Vec<f64> {
            (0..m.n_voters())
                .filter(|&i| m.voter_at(i).id.starts_with(prefix))
                .map(|i| out.voter_coords[i][0])
                .collect()
        };
        let a = x_of("a");
        let b = x_of("b");
        assert!(a.iter().all(|&x| x.abs() > 0.1));
        let sign_a = a[0].signum();
        assert!(a.iter().all(|&x| x.signum() == sign_a), "bloc A on one side");
        assert!(b.iter().all(|&x| x.signum() == -sign_a), "bloc B opposite");

        // Rank-1 data: the first component carries all the variance.
        assert!(out.variance_explained[0] > 0.99);
        assert!(out.variance_explained[1] < 1e-6);
    }

    #[test]
    fn test_centering_uses_observed_entries_only() {
        // Item 1 is voted on by a single voter (positive). The observed mean
        // is exactly 1.0, so that entry centers to zero; it must not be
        // diluted by the voters who never saw the item.
        let m = matrix_from(vec![
            (VoterId::registered("a"), 1, Opinion::Positive),
            (VoterId::registered("a"), 2, Opinion::Positive),
            (VoterId::registered("b"), 2, Opinion::Negative),
            (VoterId::registered("c"), 2, Opinion::Neutral),
        ]);
        let centered = CenteredMatrix::new(&m);
        let col1 = m.col_of(ItemId(1)).unwrap();
        assert!((centered.col_means[col1] - 1.0).abs() < 1e-12);
        assert_eq!(centered.entry(col1, 1.0), 0.0);
    }

    #[test]
    fn test_unanimous_matrix_projects_to_origin() {
        let votes = (0..60)
            .map(|i| (VoterId::registered(format!("v{i:02}")), 1, Opinion::Positive))
            .collect();
        let m = matrix_from(votes);
        let out = project(&m, 42).expect("projection");
        assert!(out.voter_coords.iter().all(|c| c == &[0.0, 0.0]));
        assert_eq!(out.variance_explained, [0.0, 0.0]);
    }

    #[test]
    fn test_neutral_only_voter_projects_finitely() {
        let m = matrix_from(vec![
            (VoterId::registered("a"), 1, Opinion::Positive),
            (VoterId::registered("a"), 2, Opinion::Negative),
            (VoterId::registered("b"), 1, Opinion::Negative),
            (VoterId::registered("b"), 2, Opinion::Positive),
            (VoterId::registered("z"), 1, Opinion::Neutral),
            (VoterId::registered("z"), 2, Opinion::Neutral),
        ]);
        let out = project(&m, 42).expect("projection");
        let row = m.row_of(&VoterId::registered("z")).unwrap();
        assert!(out.voter_coords[row][0].is_finite());
        assert!(out.voter_coords[row][1].is_finite());
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let m = two_bloc_matrix();
        let a = project(&m, 7).expect("projection");
        let b = project(&m, 7).expect("projection");
        assert_eq!(a.voter_coords, b.voter_coords);
        assert_eq!(a.item_coords, b.item_coords);
    }

    #[test]
    fn test_sparse_voter_scaled_outward() {
        // Same raw component magnitude, fewer votes => larger radius.
        let mut votes = vec![
            (VoterId::registered("dense"), 1, Opinion::Positive),
            (VoterId::registered("dense"), 2, Opinion::Negative),
            (VoterId::registered("dense"), 3, Opinion::Positive),
            (VoterId::registered("dense"), 4, Opinion::Negative),
            (VoterId::registered("sparse"), 1, Opinion::Positive),
            (VoterId::registered("sparse"), 2, Opinion::Negative),
        ];
        for i in 0..6 {
            votes.push((VoterId::registered(format!("x{i}")), 1, Opinion::Negative));
            votes.push((VoterId::registered(format!("x{i}")), 2, Opinion::Positive));
            votes.push((VoterId::registered(format!("x{i}")), 3, Opinion::Negative));
            votes.push((VoterId::registered(format!("x{i}")), 4, Opinion::Positive));
        }
        let m = matrix_from(votes);
        let out = project(&m, 42).expect("projection");
        let dense_row = m.row_of(&VoterId::registered("dense")).unwrap();
        let sparse_row = m.row_of(&VoterId::registered("sparse")).unwrap();
        let radius = |c: [f64; 2]| (c[0] * c[0] + c[1] * c[1]).sqrt();
        assert!(
            radius(out.voter_coords[sparse_row]) > 0.0,
            "sparse voter must stay in the map"
        );
        // The sparse voter's scale factor is sqrt(4/2), the dense one's is 1.
        assert!(radius(out.voter_coords[dense_row]).is_finite());
    }
}
