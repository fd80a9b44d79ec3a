//! Pairwise distances between shapes and the distance stage of the preprocessing pipeline

use crate::config::{DistanceSource, JobConfig, UnsupportedOptionError};
use crate::io::csv_format;
use crate::manifest::DistancesEntry;
use crate::{profile, shapes};
use anyhow::{Context, anyhow};
use log::{info, warn};
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;

/// Named metrics for computing distances between flattened shape feature vectors
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Metric {
    Cityblock,
    Cosine,
    Euclidean,
    L1,
    L2,
    Manhattan,
    BrayCurtis,
    Canberra,
    Chebyshev,
    Correlation,
    Dice,
    Hamming,
    Jaccard,
    Kulsinski,
    Mahalanobis,
    Minkowski,
    RogersTanimoto,
    RussellRao,
    SEuclidean,
    SokalMichener,
    SokalSneath,
    SqEuclidean,
    Yule,
}

impl Metric {
    /// All supported metrics
    pub const ALL: [Metric; 23] = [
        Metric::Cityblock,
        Metric::Cosine,
        Metric::Euclidean,
        Metric::L1,
        Metric::L2,
        Metric::Manhattan,
        Metric::BrayCurtis,
        Metric::Canberra,
        Metric::Chebyshev,
        Metric::Correlation,
        Metric::Dice,
        Metric::Hamming,
        Metric::Jaccard,
        Metric::Kulsinski,
        Metric::Mahalanobis,
        Metric::Minkowski,
        Metric::RogersTanimoto,
        Metric::RussellRao,
        Metric::SEuclidean,
        Metric::SokalMichener,
        Metric::SokalSneath,
        Metric::SqEuclidean,
        Metric::Yule,
    ];

    /// Returns the lowercase tag of the metric as used in job configurations and manifests
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Cityblock => "cityblock",
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::L1 => "l1",
            Metric::L2 => "l2",
            Metric::Manhattan => "manhattan",
            Metric::BrayCurtis => "braycurtis",
            Metric::Canberra => "canberra",
            Metric::Chebyshev => "chebyshev",
            Metric::Correlation => "correlation",
            Metric::Dice => "dice",
            Metric::Hamming => "hamming",
            Metric::Jaccard => "jaccard",
            Metric::Kulsinski => "kulsinski",
            Metric::Mahalanobis => "mahalanobis",
            Metric::Minkowski => "minkowski",
            Metric::RogersTanimoto => "rogerstanimoto",
            Metric::RussellRao => "russellrao",
            Metric::SEuclidean => "seuclidean",
            Metric::SokalMichener => "sokalmichener",
            Metric::SokalSneath => "sokalsneath",
            Metric::SqEuclidean => "sqeuclidean",
            Metric::Yule => "yule",
        }
    }

    /// Returns whether the metric operates on boolean vectors (non-zero components are `true`)
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            Metric::Dice
                | Metric::Hamming
                | Metric::Jaccard
                | Metric::Kulsinski
                | Metric::RogersTanimoto
                | Metric::RussellRao
                | Metric::SokalMichener
                | Metric::SokalSneath
                | Metric::Yule
        )
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = UnsupportedOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_lowercase();
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == tag)
            .ok_or_else(|| UnsupportedOptionError::DistanceType(s.to_string()))
    }
}

/// Parameters for the computation of pairwise distances
#[derive(Clone, Debug)]
pub struct DistanceParameters {
    /// Order `p` of the Minkowski metric
    pub minkowski_p: f64,
    /// Whether rows of the distance matrix are computed in parallel on the rayon thread pool
    pub enable_multi_threading: bool,
}

impl Default for DistanceParameters {
    fn default() -> Self {
        Self {
            minkowski_p: 2.0,
            enable_multi_threading: false,
        }
    }
}

/// Runs the distance stage: obtains the distance matrix from the configured source and writes `<dataset>_distance.csv`
pub fn calculate_distance(
    config: &JobConfig,
    parameters: &DistanceParameters,
) -> Result<(DistancesEntry, DMatrix<f64>), anyhow::Error> {
    profile!("calculate distance");

    let (distance, metric_tag) = match &config.distance {
        DistanceSource::Precomputed(file) => {
            info!("Loading precomputed distance from \"{}\"...", file.display());
            let distance = csv_format::matrix_from_csv(file)?;
            if !distance.is_square() {
                return Err(anyhow!(
                    "Precomputed distance matrix has to be square, got {}x{}",
                    distance.nrows(),
                    distance.ncols()
                ));
            }
            (distance, "precomputed".to_string())
        }
        DistanceSource::Script(script) => {
            info!("Script for distance provided, calling script...");
            let distance = script.run().context("Distance script failed")?;
            (distance, "script".to_string())
        }
        DistanceSource::Metric(metric) => {
            info!("Calculating {} distance...", metric);
            let samples =
                shapes::load_shape_features(&config.shape_directory, config.shape_format)?;
            let distance = pairwise_distances(&samples, *metric, parameters)?;
            (distance, metric.name().to_string())
        }
    };

    if distance.nrows() != config.number_samples {
        warn!(
            "Distance matrix has {} rows but the configured number of samples is {}",
            distance.nrows(),
            config.number_samples
        );
    }

    let file = format!("{}_distance.csv", config.dataset_name);
    csv_format::matrix_to_csv(&distance, config.output_directory.join(&file))?;
    info!("Distance matrix written to \"{}\"", file);

    Ok((
        DistancesEntry {
            format: "csv".to_string(),
            file,
            metric: metric_tag,
        },
        distance,
    ))
}

/// Computes the symmetric matrix of pairwise distances between the given feature vectors
///
/// All vectors need to have the same non-zero length. The diagonal of the result is zero.
pub fn pairwise_distances(
    samples: &[Vec<f64>],
    metric: Metric,
    parameters: &DistanceParameters,
) -> Result<DMatrix<f64>, anyhow::Error> {
    let n = samples.len();
    let dim = samples.first().map(|s| s.len()).unwrap_or(0);
    if n == 0 {
        return Err(anyhow!("No samples to compute distances between"));
    }
    if dim == 0 {
        return Err(anyhow!("Feature vectors are empty"));
    }
    if let Some((i, s)) = samples.iter().enumerate().find(|(_, s)| s.len() != dim) {
        return Err(anyhow!(
            "Feature vector of sample {} has length {}, expected {} (all shapes need the same resolution)",
            i,
            s.len(),
            dim
        ));
    }

    let parallel = parameters.enable_multi_threading;
    let distance = match metric {
        Metric::Euclidean | Metric::L2 => compute_pairwise(n, parallel, |i, j| {
            squared_euclidean(&samples[i], &samples[j]).sqrt()
        }),
        Metric::SqEuclidean => compute_pairwise(n, parallel, |i, j| {
            squared_euclidean(&samples[i], &samples[j])
        }),
        Metric::Cityblock | Metric::L1 | Metric::Manhattan => {
            compute_pairwise(n, parallel, |i, j| {
                component_pairs(&samples[i], &samples[j])
                    .map(|(u, v)| (u - v).abs())
                    .sum()
            })
        }
        Metric::Chebyshev => compute_pairwise(n, parallel, |i, j| {
            component_pairs(&samples[i], &samples[j])
                .map(|(u, v)| (u - v).abs())
                .fold(0.0, f64::max)
        }),
        Metric::Minkowski => {
            let p = parameters.minkowski_p;
            if !(p > 0.0) {
                return Err(anyhow!("Minkowski order p has to be positive, got {}", p));
            }
            compute_pairwise(n, parallel, |i, j| {
                component_pairs(&samples[i], &samples[j])
                    .map(|(u, v)| (u - v).abs().powf(p))
                    .sum::<f64>()
                    .powf(1.0 / p)
            })
        }
        Metric::BrayCurtis => compute_pairwise(n, parallel, |i, j| {
            let (diff, total) = component_pairs(&samples[i], &samples[j])
                .fold((0.0, 0.0), |(diff, total), (u, v)| {
                    (diff + (u - v).abs(), total + (u + v).abs())
                });
            if total > 0.0 { diff / total } else { 0.0 }
        }),
        Metric::Canberra => compute_pairwise(n, parallel, |i, j| {
            component_pairs(&samples[i], &samples[j])
                .map(|(u, v)| {
                    let denominator = u.abs() + v.abs();
                    if denominator > 0.0 {
                        (u - v).abs() / denominator
                    } else {
                        0.0
                    }
                })
                .sum()
        }),
        Metric::Cosine => compute_pairwise(n, parallel, |i, j| {
            cosine_distance(&samples[i], &samples[j])
        }),
        Metric::Correlation => {
            let centered = samples
                .iter()
                .map(|s| {
                    let mean = s.iter().sum::<f64>() / dim as f64;
                    s.iter().map(|v| v - mean).collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();
            compute_pairwise(n, parallel, |i, j| {
                cosine_distance(&centered[i], &centered[j])
            })
        }
        Metric::SEuclidean => {
            let variances = component_variances(samples);
            compute_pairwise(n, parallel, |i, j| {
                component_pairs(&samples[i], &samples[j])
                    .zip(&variances)
                    .filter(|(_, var)| **var > 0.0)
                    .map(|((u, v), var)| (u - v) * (u - v) / var)
                    .sum::<f64>()
                    .sqrt()
            })
        }
        Metric::Mahalanobis => mahalanobis_distances(samples),
        _ => {
            debug_assert!(metric.is_boolean());
            let bools = samples
                .iter()
                .map(|s| s.iter().map(|v| *v != 0.0).collect::<Vec<_>>())
                .collect::<Vec<_>>();
            compute_pairwise(n, parallel, |i, j| {
                boolean_distance(metric, &BooleanCounts::new(&bools[i], &bools[j]))
            })
        }
    };

    Ok(distance)
}

fn component_pairs<'a>(u: &'a [f64], v: &'a [f64]) -> impl Iterator<Item = (f64, f64)> + 'a {
    u.iter().copied().zip(v.iter().copied())
}

fn squared_euclidean(u: &[f64], v: &[f64]) -> f64 {
    component_pairs(u, v).map(|(u, v)| (u - v) * (u - v)).sum()
}

/// Cosine distance, vectors with zero norm have distance one to every other vector
fn cosine_distance(u: &[f64], v: &[f64]) -> f64 {
    let (dot, norm_u, norm_v) = component_pairs(u, v).fold(
        (0.0, 0.0, 0.0),
        |(dot, norm_u, norm_v), (u, v)| (dot + u * v, norm_u + u * u, norm_v + v * v),
    );
    let norm = (norm_u * norm_v).sqrt();
    if norm > 0.0 {
        (1.0 - dot / norm).clamp(0.0, 2.0)
    } else {
        1.0
    }
}

/// Unbiased variance of every component over all samples
fn component_variances(samples: &[Vec<f64>]) -> Vec<f64> {
    let n = samples.len();
    let dim = samples[0].len();
    if n < 2 {
        return vec![0.0; dim];
    }

    (0..dim)
        .map(|k| {
            let mean = samples.iter().map(|s| s[k]).sum::<f64>() / n as f64;
            samples.iter().map(|s| (s[k] - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        })
        .collect()
}

/// Mahalanobis distances with respect to the (pseudo-inverse of the) sample covariance
///
/// Computed in sample space using the eigendecomposition of the Gram matrix of the centered
/// samples, which also works when there are fewer samples than feature dimensions.
fn mahalanobis_distances(samples: &[Vec<f64>]) -> DMatrix<f64> {
    let n = samples.len();
    let dim = samples[0].len();
    if n < 2 {
        return DMatrix::zeros(n, n);
    }

    let mut centered = DMatrix::from_fn(n, dim, |i, k| samples[i][k]);
    for k in 0..dim {
        let mean = centered.column(k).mean();
        centered.column_mut(k).add_scalar_mut(-mean);
    }

    let gram = &centered * centered.transpose();
    let eigen = gram.symmetric_eigen();
    let max_eigenvalue = eigen.eigenvalues.iter().copied().fold(0.0, f64::max);
    let retained = (0..n)
        .filter(|&c| eigen.eigenvalues[c] > 1e-10 * max_eigenvalue)
        .collect::<Vec<_>>();

    let scale = (n - 1) as f64;
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            return 0.0;
        }
        let squared = retained
            .iter()
            .map(|&c| (eigen.eigenvectors[(i, c)] - eigen.eigenvectors[(j, c)]).powi(2))
            .sum::<f64>();
        (scale * squared).sqrt()
    })
}

/// Number of component pairs (true/true, true/false, false/true, false/false) of two boolean vectors
#[derive(Copy, Clone, Debug, Default, PartialEq)]
struct BooleanCounts {
    tt: f64,
    tf: f64,
    ft: f64,
    ff: f64,
}

impl BooleanCounts {
    fn new(u: &[bool], v: &[bool]) -> Self {
        let mut counts = Self::default();
        for (&u, &v) in u.iter().zip(v) {
            match (u, v) {
                (true, true) => counts.tt += 1.0,
                (true, false) => counts.tf += 1.0,
                (false, true) => counts.ft += 1.0,
                (false, false) => counts.ff += 1.0,
            }
        }
        counts
    }

    fn len(&self) -> f64 {
        self.tt + self.tf + self.ft + self.ff
    }
}

fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator != 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn boolean_distance(metric: Metric, c: &BooleanCounts) -> f64 {
    let n = c.len();
    let not_equal = c.tf + c.ft;
    match metric {
        Metric::Dice => ratio_or_zero(not_equal, 2.0 * c.tt + not_equal),
        Metric::Hamming => ratio_or_zero(not_equal, n),
        Metric::Jaccard => ratio_or_zero(not_equal, c.tt + not_equal),
        Metric::Kulsinski => ratio_or_zero(not_equal - c.tt + n, not_equal + n),
        Metric::RogersTanimoto | Metric::SokalMichener => {
            let r = 2.0 * not_equal;
            ratio_or_zero(r, c.tt + c.ff + r)
        }
        Metric::RussellRao => ratio_or_zero(n - c.tt, n),
        Metric::SokalSneath => {
            let r = 2.0 * not_equal;
            ratio_or_zero(r, c.tt + r)
        }
        Metric::Yule => {
            let half_r = c.tf * c.ft;
            if half_r == 0.0 {
                0.0
            } else {
                2.0 * half_r / (c.tt * c.ff + half_r)
            }
        }
        _ => unreachable!("{} is not a boolean metric", metric),
    }
}

/// Fills the symmetric distance matrix from the distances of its upper triangle
fn compute_pairwise<F>(n: usize, parallel: bool, distance: F) -> DMatrix<f64>
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    let upper_row = |i: usize| ((i + 1)..n).map(|j| distance(i, j)).collect::<Vec<_>>();
    let rows = if parallel {
        (0..n).into_par_iter().map(upper_row).collect::<Vec<_>>()
    } else {
        (0..n).map(upper_row).collect::<Vec<_>>()
    };

    let mut matrix = DMatrix::zeros(n, n);
    for (i, row) in rows.into_iter().enumerate() {
        for (offset, d) in row.into_iter().enumerate() {
            let j = i + 1 + offset;
            matrix[(i, j)] = d;
            matrix[(j, i)] = d;
        }
    }
    matrix
}
