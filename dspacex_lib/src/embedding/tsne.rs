//! Exact t-distributed stochastic neighbor embedding of a precomputed distance matrix

use anyhow::anyhow;
use log::{debug, trace};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const MACHINE_EPSILON: f64 = f64::EPSILON;
const MIN_SUM_P: f64 = 1e-8;
const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const PERPLEXITY_STEPS: usize = 100;

/// Parameters of the t-SNE optimization
#[derive(Clone, Debug)]
pub struct TsneParameters {
    /// Target perplexity, clamped to `(n - 1) / 3` for small sample counts
    pub perplexity: f64,
    /// Factor applied to the joint probabilities in the exploration phase
    pub early_exaggeration: f64,
    /// Number of iterations of the exploration phase
    pub exploration_iterations: usize,
    /// Total number of gradient descent iterations
    pub max_iterations: usize,
    /// Learning rate, `None` selects `max(n / early_exaggeration / 4, 50)`
    pub learning_rate: Option<f64>,
    /// Optimization stops when the gradient norm falls below this value
    pub min_grad_norm: f64,
}

impl Default for TsneParameters {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            early_exaggeration: 12.0,
            exploration_iterations: 250,
            max_iterations: 1000,
            learning_rate: None,
            min_grad_norm: 1e-7,
        }
    }
}

/// Embeds the samples described by the distance matrix into two dimensions
pub fn tsne(
    distance: &DMatrix<f64>,
    parameters: &TsneParameters,
    seed: u64,
) -> Result<DMatrix<f64>, anyhow::Error> {
    let n = distance.nrows();
    if n == 0 || !distance.is_square() {
        return Err(anyhow!("t-SNE requires a non-empty square distance matrix"));
    }
    if n == 1 {
        return Ok(DMatrix::zeros(1, 2));
    }

    let perplexity = parameters.perplexity.min((n - 1) as f64 / 3.0).max(1.0);
    if perplexity != parameters.perplexity {
        debug!(
            "Perplexity reduced from {} to {} for {} samples",
            parameters.perplexity, perplexity, n
        );
    }
    let mut p = joint_probabilities(distance, perplexity);

    let learning_rate = parameters
        .learning_rate
        .unwrap_or_else(|| (n as f64 / parameters.early_exaggeration / 4.0).max(50.0));

    let mut rng = StdRng::seed_from_u64(seed);
    let mut y = DMatrix::from_fn(n, 2, |_, _| 1e-4 * rng.sample::<f64, _>(StandardNormal));
    let mut update = DMatrix::<f64>::zeros(n, 2);
    let mut gains = DMatrix::<f64>::from_element(n, 2, 1.0);

    p *= parameters.early_exaggeration;
    let mut momentum = 0.5;
    for iteration in 0..parameters.max_iterations {
        if iteration == parameters.exploration_iterations {
            p /= parameters.early_exaggeration;
            momentum = 0.8;
        }

        let mut grad = kl_divergence_gradient(&p, &y);
        for ((g, u), gain) in grad.iter_mut().zip(update.iter()).zip(gains.iter_mut()) {
            if *u * *g < 0.0 {
                *gain += 0.2;
            } else {
                *gain *= 0.8;
            }
            *gain = gain.max(0.01);
            *g *= *gain;
        }

        update = &update * momentum - &grad * learning_rate;
        y += &update;

        let grad_norm = grad.norm();
        if iteration % 50 == 0 {
            trace!("t-SNE iteration {}: gradient norm {}", iteration, grad_norm);
        }
        if iteration > parameters.exploration_iterations && grad_norm < parameters.min_grad_norm {
            debug!("t-SNE converged after {} iterations", iteration + 1);
            break;
        }
    }

    Ok(y)
}

/// Computes the symmetric joint probabilities with a per-sample bandwidth matching the perplexity
fn joint_probabilities(distance: &DMatrix<f64>, perplexity: f64) -> DMatrix<f64> {
    let n = distance.nrows();
    let target_entropy = perplexity.ln();
    let mut conditional = DMatrix::<f64>::zeros(n, n);
    let mut row = vec![0.0; n];

    for i in 0..n {
        let mut beta = 1.0;
        let mut beta_min = f64::NEG_INFINITY;
        let mut beta_max = f64::INFINITY;

        for _ in 0..PERPLEXITY_STEPS {
            for j in 0..n {
                row[j] = if i == j {
                    0.0
                } else {
                    (-distance[(i, j)] * beta).exp()
                };
            }
            let mut sum_p = row.iter().sum::<f64>();
            if sum_p == 0.0 {
                sum_p = MIN_SUM_P;
            }

            let mut sum_dist_p = 0.0;
            for j in 0..n {
                row[j] /= sum_p;
                sum_dist_p += distance[(i, j)] * row[j];
            }

            let entropy = sum_p.ln() + beta * sum_dist_p;
            let entropy_diff = entropy - target_entropy;
            if entropy_diff.abs() <= PERPLEXITY_TOLERANCE {
                break;
            }

            if entropy_diff > 0.0 {
                beta_min = beta;
                beta = if beta_max == f64::INFINITY {
                    beta * 2.0
                } else {
                    (beta + beta_max) / 2.0
                };
            } else {
                beta_max = beta;
                beta = if beta_min == f64::NEG_INFINITY {
                    beta / 2.0
                } else {
                    (beta + beta_min) / 2.0
                };
            }
        }

        for j in 0..n {
            conditional[(i, j)] = row[j];
        }
    }

    let mut joint = &conditional + conditional.transpose();
    let sum = joint.sum().max(MACHINE_EPSILON);
    joint.apply(|v| *v = (*v / sum).max(MACHINE_EPSILON));
    for i in 0..n {
        joint[(i, i)] = 0.0;
    }
    joint
}

/// Gradient of the Kullback-Leibler divergence between `p` and the Student-t similarities of `y`
fn kl_divergence_gradient(p: &DMatrix<f64>, y: &DMatrix<f64>) -> DMatrix<f64> {
    let n = y.nrows();
    let mut numerator = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = y[(i, 0)] - y[(j, 0)];
            let dy = y[(i, 1)] - y[(j, 1)];
            let value = 1.0 / (1.0 + dx * dx + dy * dy);
            numerator[(i, j)] = value;
            numerator[(j, i)] = value;
        }
    }
    let sum = numerator.sum().max(MACHINE_EPSILON);

    let mut grad = DMatrix::<f64>::zeros(n, 2);
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let q = (numerator[(i, j)] / sum).max(MACHINE_EPSILON);
            let factor = 4.0 * (p[(i, j)] - q) * numerator[(i, j)];
            grad[(i, 0)] += factor * (y[(i, 0)] - y[(j, 0)]);
            grad[(i, 1)] += factor * (y[(i, 1)] - y[(j, 1)]);
        }
    }
    grad
}
