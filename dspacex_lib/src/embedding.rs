//! Two dimensional embeddings of the distance matrix and the embedding stage of the pipeline
//!
//! The three default embeddings (t-SNE, MDS and Isomap) are always computed from the distance
//! matrix, followed by the user embeddings of the job in configuration order.

use crate::config::{EmbeddingSource, JobConfig};
use crate::io::csv_format;
use crate::manifest::{EmbeddingEntry, ManifestFragment};
use crate::profile;
use anyhow::Context;
use log::{info, warn};
use nalgebra::DMatrix;

pub mod isomap;
pub mod mds;
pub mod tsne;

pub use isomap::IsomapParameters;
pub use mds::MdsParameters;
pub use tsne::TsneParameters;

/// Seed used for the random initializations if none is specified
pub const DEFAULT_SEED: u64 = 0;

/// Parameters of the default embeddings
#[derive(Clone, Debug)]
pub struct EmbeddingParameters {
    /// Seed of the random initializations of t-SNE and MDS
    pub seed: u64,
    pub tsne: TsneParameters,
    pub mds: MdsParameters,
    pub isomap: IsomapParameters,
}

impl Default for EmbeddingParameters {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            tsne: TsneParameters::default(),
            mds: MdsParameters::default(),
            isomap: IsomapParameters::default(),
        }
    }
}

/// A default embedding technique with its manifest name and file suffix
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DefaultEmbedding {
    Tsne,
    Mds,
    Isomap,
}

impl DefaultEmbedding {
    pub const ALL: [DefaultEmbedding; 3] = [
        DefaultEmbedding::Tsne,
        DefaultEmbedding::Mds,
        DefaultEmbedding::Isomap,
    ];

    /// Name of the embedding in the manifest
    pub fn name(&self) -> &'static str {
        match self {
            DefaultEmbedding::Tsne => "t-SNE",
            DefaultEmbedding::Mds => "MDS",
            DefaultEmbedding::Isomap => "Isomap",
        }
    }

    /// Suffix of the embedding file name
    pub fn file_suffix(&self) -> &'static str {
        match self {
            DefaultEmbedding::Tsne => "tsne",
            DefaultEmbedding::Mds => "mds",
            DefaultEmbedding::Isomap => "isomap",
        }
    }

    /// Computes the embedding of the given distance matrix
    pub fn compute(
        &self,
        distance: &DMatrix<f64>,
        parameters: &EmbeddingParameters,
    ) -> Result<DMatrix<f64>, anyhow::Error> {
        match self {
            DefaultEmbedding::Tsne => {
                profile!("t-SNE");
                tsne::tsne(distance, &parameters.tsne, parameters.seed)
            }
            DefaultEmbedding::Mds => {
                profile!("MDS");
                mds::mds(distance, &parameters.mds, parameters.seed)
            }
            DefaultEmbedding::Isomap => {
                profile!("Isomap");
                isomap::isomap(distance, &parameters.isomap)
            }
        }
    }
}

/// Returns the file name of an embedding of the dataset
pub fn embedding_file_name(dataset_name: &str, suffix: &str) -> String {
    format!("{}_{}.csv", dataset_name, suffix)
}

/// Runs the embedding stage: computes the default embeddings and the user embeddings and writes one CSV file each
pub fn calculate_embeddings(
    distance: &DMatrix<f64>,
    config: &JobConfig,
    parameters: &EmbeddingParameters,
) -> Result<ManifestFragment, anyhow::Error> {
    profile!("calculate embeddings");

    let mut entries = Vec::new();

    info!("Calculating default 2D embeddings for entire dataset...");
    for technique in DefaultEmbedding::ALL {
        info!("Calculating {} embedding...", technique.name());
        let embedding = technique
            .compute(distance, parameters)
            .with_context(|| format!("Failed to compute {} embedding", technique.name()))?;
        let file = embedding_file_name(&config.dataset_name, technique.file_suffix());
        csv_format::matrix_to_csv(&embedding, config.output_directory.join(&file))?;
        entries.push(EmbeddingEntry::csv(technique.name(), file));
    }

    if !config.embeddings.is_empty() {
        info!("Calculating user defined 2D embeddings for entire dataset...");
    }
    for request in &config.embeddings {
        let embedding = match &request.source {
            EmbeddingSource::Precomputed(file) => {
                info!(
                    "Precomputed embedding \"{}\", loading from \"{}\"...",
                    request.name,
                    file.display()
                );
                csv_format::matrix_from_csv(file)?
            }
            EmbeddingSource::Script(script) => {
                info!(
                    "Script for embedding \"{}\" provided, calling script...",
                    request.name
                );
                script
                    .run()
                    .with_context(|| format!("Script of embedding \"{}\" failed", request.name))?
            }
        };

        if embedding.nrows() != distance.nrows() {
            warn!(
                "Embedding \"{}\" has {} rows but the distance matrix has {}",
                request.name,
                embedding.nrows(),
                distance.nrows()
            );
        }

        let file = embedding_file_name(&config.dataset_name, &request.name);
        csv_format::matrix_to_csv(&embedding, config.output_directory.join(&file))?;
        entries.push(EmbeddingEntry::csv(request.name.clone(), file));
    }

    Ok(ManifestFragment::Embeddings(entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_embedding_names() {
        let names = DefaultEmbedding::ALL
            .iter()
            .map(|e| (e.name(), embedding_file_name("shapes", e.file_suffix())))
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                ("t-SNE", "shapes_tsne.csv".to_string()),
                ("MDS", "shapes_mds.csv".to_string()),
                ("Isomap", "shapes_isomap.csv".to_string()),
            ]
        );
    }

    #[test]
    fn test_default_embeddings_have_two_columns() {
        let distance = DMatrix::from_fn(6, 6, |i, j| (i as f64 - j as f64).abs());
        let parameters = EmbeddingParameters::default();
        for technique in DefaultEmbedding::ALL {
            let embedding = technique.compute(&distance, &parameters).unwrap();
            assert_eq!(embedding.shape(), (6, 2), "{}", technique.name());
            assert!(embedding.iter().all(|v| v.is_finite()));
        }
    }
}
