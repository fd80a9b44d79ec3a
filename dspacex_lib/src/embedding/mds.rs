//! Metric multidimensional scaling using the SMACOF algorithm

use anyhow::anyhow;
use log::{debug, trace};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Parameters of the SMACOF optimization
#[derive(Clone, Debug)]
pub struct MdsParameters {
    /// Number of runs with different random initializations, the run with the lowest stress is kept
    pub num_initializations: usize,
    /// Maximum number of iterations per run
    pub max_iterations: usize,
    /// Relative tolerance of the stress at which a run is considered converged
    pub eps: f64,
}

impl Default for MdsParameters {
    fn default() -> Self {
        Self {
            num_initializations: 4,
            max_iterations: 300,
            eps: 1e-3,
        }
    }
}

/// Embeds the samples described by the dissimilarity matrix into two dimensions
pub fn mds(
    dissimilarities: &DMatrix<f64>,
    parameters: &MdsParameters,
    seed: u64,
) -> Result<DMatrix<f64>, anyhow::Error> {
    let n = dissimilarities.nrows();
    if n == 0 || !dissimilarities.is_square() {
        return Err(anyhow!("MDS requires a non-empty square distance matrix"));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<(DMatrix<f64>, f64)> = None;
    for run in 0..parameters.num_initializations.max(1) {
        let init = DMatrix::from_fn(n, 2, |_, _| rng.random::<f64>());
        let (embedding, stress) = smacof_single(dissimilarities, init, parameters);
        trace!("MDS run {}: stress {}", run, stress);
        if best.as_ref().is_none_or(|(_, best_stress)| stress < *best_stress) {
            best = Some((embedding, stress));
        }
    }

    let (embedding, stress) = best.ok_or_else(|| anyhow!("MDS did not run"))?;
    debug!("MDS final stress: {}", stress);
    Ok(embedding)
}

/// Runs a single SMACOF optimization from the given initial configuration, returns the embedding and its stress
fn smacof_single(
    dissimilarities: &DMatrix<f64>,
    init: DMatrix<f64>,
    parameters: &MdsParameters,
) -> (DMatrix<f64>, f64) {
    let n = dissimilarities.nrows();
    let mut x = init;
    let mut old_stress: Option<f64> = None;
    let mut stress = 0.0;

    for iteration in 0..parameters.max_iterations {
        let dis = euclidean_distances(&x);
        stress = dis
            .iter()
            .zip(dissimilarities.iter())
            .map(|(d, delta)| (d - delta).powi(2))
            .sum::<f64>()
            / 2.0;

        // Guttman transform
        let mut b = DMatrix::from_fn(n, n, |i, j| {
            let d = if dis[(i, j)] == 0.0 { 1e-5 } else { dis[(i, j)] };
            -dissimilarities[(i, j)] / d
        });
        for i in 0..n {
            let row_sum = b.row(i).sum();
            b[(i, i)] -= row_sum;
        }
        x = (&b * &x) / n as f64;

        let norm = x.row_iter().map(|row| row.norm()).sum::<f64>();
        let relative_stress = if norm > 0.0 { stress / norm } else { stress };
        if let Some(old_stress) = old_stress {
            if old_stress - relative_stress < parameters.eps {
                trace!("SMACOF converged after {} iterations", iteration + 1);
                break;
            }
        }
        old_stress = Some(relative_stress);
    }

    (x, stress)
}

fn euclidean_distances(x: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    DMatrix::from_fn(n, n, |i, j| (x.row(i) - x.row(j)).norm())
}
