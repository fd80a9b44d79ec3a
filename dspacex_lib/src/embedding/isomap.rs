//! Isomap embedding: geodesic distances on a nearest neighbor graph followed by kernel PCA

use anyhow::anyhow;
use log::{debug, warn};
use nalgebra::DMatrix;
use std::cmp::Ordering;

/// Parameters of the Isomap embedding
#[derive(Clone, Debug)]
pub struct IsomapParameters {
    /// Number of nearest neighbors connected to each sample
    pub num_neighbors: usize,
}

impl Default for IsomapParameters {
    fn default() -> Self {
        Self { num_neighbors: 5 }
    }
}

/// Embeds the samples described by the distance matrix into two dimensions
pub fn isomap(
    distance: &DMatrix<f64>,
    parameters: &IsomapParameters,
) -> Result<DMatrix<f64>, anyhow::Error> {
    let n = distance.nrows();
    if n == 0 || !distance.is_square() {
        return Err(anyhow!("Isomap requires a non-empty square distance matrix"));
    }
    if n == 1 {
        return Ok(DMatrix::zeros(1, 2));
    }

    let k = parameters.num_neighbors.clamp(1, n - 1);
    let mut graph = nearest_neighbor_graph(distance, k);

    let components = connected_components(&graph);
    let num_components = components.iter().max().map_or(0, |c| c + 1);
    if num_components > 1 {
        warn!(
            "The {}-nearest neighbor graph has {} connected components, connecting them by their closest samples",
            k, num_components
        );
        connect_components(&mut graph, distance, &components, num_components);
    }

    let geodesic = shortest_paths(graph);
    Ok(kernel_pca(&geodesic))
}

/// Undirected graph connecting every sample to its `k` nearest neighbors, missing edges are infinite
fn nearest_neighbor_graph(distance: &DMatrix<f64>, k: usize) -> DMatrix<f64> {
    let n = distance.nrows();
    let mut graph = DMatrix::from_element(n, n, f64::INFINITY);
    graph.fill_diagonal(0.0);

    for i in 0..n {
        let mut neighbors = (0..n).filter(|&j| j != i).collect::<Vec<_>>();
        neighbors.sort_by(|&a, &b| {
            distance[(i, a)]
                .partial_cmp(&distance[(i, b)])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });

        for &j in neighbors.iter().take(k) {
            let d = distance[(i, j)];
            if d < graph[(i, j)] {
                graph[(i, j)] = d;
                graph[(j, i)] = d;
            }
        }
    }
    graph
}

/// Returns the component label of every node of the graph, labels are numbered in order of their first node
fn connected_components(graph: &DMatrix<f64>) -> Vec<usize> {
    let n = graph.nrows();
    let mut labels = vec![usize::MAX; n];
    let mut next_label = 0;

    for start in 0..n {
        if labels[start] != usize::MAX {
            continue;
        }
        let mut stack = vec![start];
        labels[start] = next_label;
        while let Some(node) = stack.pop() {
            for neighbor in 0..n {
                if labels[neighbor] == usize::MAX && graph[(node, neighbor)].is_finite() {
                    labels[neighbor] = next_label;
                    stack.push(neighbor);
                }
            }
        }
        next_label += 1;
    }
    labels
}

/// Adds an edge between the closest pair of samples of every pair of components
fn connect_components(
    graph: &mut DMatrix<f64>,
    distance: &DMatrix<f64>,
    components: &[usize],
    num_components: usize,
) {
    let n = graph.nrows();
    for a in 0..num_components {
        for b in (a + 1)..num_components {
            let closest = (0..n)
                .filter(|&i| components[i] == a)
                .flat_map(|i| {
                    (0..n)
                        .filter(move |&j| components[j] == b)
                        .map(move |j| (i, j))
                })
                .min_by(|&(i1, j1), &(i2, j2)| {
                    distance[(i1, j1)]
                        .partial_cmp(&distance[(i2, j2)])
                        .unwrap_or(Ordering::Equal)
                });

            if let Some((i, j)) = closest {
                graph[(i, j)] = distance[(i, j)];
                graph[(j, i)] = distance[(i, j)];
            }
        }
    }
}

/// All pairs shortest path lengths (Floyd-Warshall)
fn shortest_paths(mut graph: DMatrix<f64>) -> DMatrix<f64> {
    let n = graph.nrows();
    for via in 0..n {
        for i in 0..n {
            let d_iv = graph[(i, via)];
            if !d_iv.is_finite() {
                continue;
            }
            for j in 0..n {
                let candidate = d_iv + graph[(via, j)];
                if candidate < graph[(i, j)] {
                    graph[(i, j)] = candidate;
                }
            }
        }
    }
    graph
}

/// Projects onto the two leading components of the double centered kernel `-0.5 * G^2`
fn kernel_pca(geodesic: &DMatrix<f64>) -> DMatrix<f64> {
    let n = geodesic.nrows();
    let squared = geodesic.map(|d| d * d);
    let row_means = (0..n)
        .map(|i| squared.row(i).mean())
        .collect::<Vec<_>>();
    let col_means = (0..n)
        .map(|j| squared.column(j).mean())
        .collect::<Vec<_>>();
    let total_mean = squared.mean();

    let kernel = DMatrix::from_fn(n, n, |i, j| {
        -0.5 * (squared[(i, j)] - row_means[i] - col_means[j] + total_mean)
    });
    // Enforce exact symmetry for the eigensolver
    let kernel = (&kernel + kernel.transpose()) * 0.5;

    let eigen = kernel.symmetric_eigen();
    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(Ordering::Equal)
    });
    debug!(
        "Isomap leading kernel eigenvalues: {:?}",
        order
            .iter()
            .take(2)
            .map(|&c| eigen.eigenvalues[c])
            .collect::<Vec<_>>()
    );

    let mut embedding = DMatrix::zeros(n, 2);
    for (component, &c) in order.iter().take(2).enumerate() {
        let vector = eigen.eigenvectors.column(c);
        let scale = eigen.eigenvalues[c].max(0.0).sqrt();
        // Deterministic sign: the entry with the largest magnitude is positive
        let sign = vector
            .iter()
            .copied()
            .max_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap_or(Ordering::Equal))
            .map_or(1.0, |v| if v < 0.0 { -1.0 } else { 1.0 });
        for i in 0..n {
            embedding[(i, component)] = sign * scale * vector[i];
        }
    }
    embedding
}
