//! The `config.yaml` manifest describing all artifacts of a processed dataset
//!
//! Every pipeline stage returns a [`ManifestFragment`]. The fragments are merged by the
//! [`ManifestBuilder`] and the manifest is serialized once at the end of a run. The key order of
//! the YAML document follows the field order of [`Manifest`].

use anyhow::Context;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the manifest inside of the output directory
pub const MANIFEST_FILE_NAME: &str = "config.yaml";

/// Manifest of a processed dataset
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub samples: SamplesEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<TableEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qois: Option<TableEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnails: Option<ThumbnailsEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distances: Option<DistancesEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeddings: Vec<EmbeddingEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplesEntry {
    pub count: usize,
}

/// Entry of a republished parameters or QoI table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub format: String,
    pub file: String,
}

/// Entry describing the thumbnail images, `files` is a pattern where `?` is replaced by the sample ID
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailsEntry {
    pub format: String,
    pub files: String,
    pub offset: u32,
    pub pad_zeros: bool,
}

impl Default for ThumbnailsEntry {
    fn default() -> Self {
        Self {
            format: "png".to_string(),
            files: "images/?.png".to_string(),
            offset: 1,
            pad_zeros: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistancesEntry {
    pub format: String,
    pub file: String,
    pub metric: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub name: String,
    pub format: String,
    pub file: String,
}

impl EmbeddingEntry {
    /// Entry of an embedding stored as CSV file
    pub fn csv<S: Into<String>, F: Into<String>>(name: S, file: F) -> Self {
        Self {
            name: name.into(),
            format: "csv".to_string(),
            file: file.into(),
        }
    }
}

/// Part of the manifest produced by a single pipeline stage
#[derive(Clone, Debug, PartialEq)]
pub enum ManifestFragment {
    Parameters(TableEntry),
    Qois(TableEntry),
    Thumbnails(ThumbnailsEntry),
    Distances(DistancesEntry),
    Embeddings(Vec<EmbeddingEntry>),
}

/// Collects the fragments of all stages into a [`Manifest`]
#[derive(Clone, Debug)]
pub struct ManifestBuilder {
    manifest: Manifest,
}

impl ManifestBuilder {
    pub fn new<S: Into<String>>(name: S, sample_count: usize) -> Self {
        Self {
            manifest: Manifest {
                name: name.into(),
                samples: SamplesEntry {
                    count: sample_count,
                },
                parameters: None,
                qois: None,
                thumbnails: None,
                distances: None,
                embeddings: Vec::new(),
            },
        }
    }

    /// Adds a fragment, entries replace previous ones while embeddings are appended
    pub fn merge(mut self, fragment: ManifestFragment) -> Self {
        let manifest = &mut self.manifest;
        match fragment {
            ManifestFragment::Parameters(entry) => manifest.parameters = Some(entry),
            ManifestFragment::Qois(entry) => manifest.qois = Some(entry),
            ManifestFragment::Thumbnails(entry) => manifest.thumbnails = Some(entry),
            ManifestFragment::Distances(entry) => manifest.distances = Some(entry),
            ManifestFragment::Embeddings(entries) => manifest.embeddings.extend(entries),
        }
        self
    }

    pub fn build(self) -> Manifest {
        self.manifest
    }
}

impl Manifest {
    /// Serializes the manifest to a block style YAML document
    pub fn to_yaml_string(&self) -> Result<String, anyhow::Error> {
        serde_yaml::to_string(self).context("Failed to serialize manifest")
    }

    /// Reads a manifest from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read manifest \"{}\"", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid manifest \"{}\"", path.display()))
    }

    /// Writes the manifest as `config.yaml` into the given directory and returns the path of the file
    pub fn write_to_dir<P: AsRef<Path>>(&self, output_directory: P) -> Result<PathBuf, anyhow::Error> {
        let path = output_directory.as_ref().join(MANIFEST_FILE_NAME);
        info!("Generating {} for dataset...", MANIFEST_FILE_NAME);
        std::fs::write(&path, self.to_yaml_string()?)
            .with_context(|| format!("Unable to write manifest \"{}\"", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(file: &str) -> TableEntry {
        TableEntry {
            format: "csv".to_string(),
            file: file.to_string(),
        }
    }

    #[test]
    fn test_yaml_key_order() {
        // Fragments are merged out of order, the document order is fixed
        let manifest = ManifestBuilder::new("shapes", 5)
            .merge(ManifestFragment::Embeddings(vec![EmbeddingEntry::csv(
                "t-SNE",
                "shapes_tsne.csv",
            )]))
            .merge(ManifestFragment::Distances(DistancesEntry {
                format: "csv".to_string(),
                file: "shapes_distance.csv".to_string(),
                metric: "euclidean".to_string(),
            }))
            .merge(ManifestFragment::Thumbnails(ThumbnailsEntry::default()))
            .merge(ManifestFragment::Qois(table("shapes_QoIs.csv")))
            .merge(ManifestFragment::Parameters(table("shapes_Parameters.csv")))
            .merge(ManifestFragment::Embeddings(vec![EmbeddingEntry::csv(
                "MDS",
                "shapes_mds.csv",
            )]))
            .build();

        let yaml = manifest.to_yaml_string().unwrap();
        let top_level_keys = yaml
            .lines()
            .filter(|l| !l.starts_with(' ') && !l.starts_with('-'))
            .map(|l| l.split(':').next().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            top_level_keys,
            vec![
                "name",
                "samples",
                "parameters",
                "qois",
                "thumbnails",
                "distances",
                "embeddings"
            ]
        );
        assert!(yaml.contains("padZeros: false"));
        assert!(yaml.contains("files: images/?.png"));

        let names = manifest
            .embeddings
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["t-SNE", "MDS"]);
    }

    #[test]
    fn test_written_manifest_can_be_read() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ManifestBuilder::new("volumes", 3)
            .merge(ManifestFragment::Parameters(table("volumes_Parameters.csv")))
            .build();

        let path = manifest.write_to_dir(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("config.yaml"));
        assert_eq!(Manifest::from_file(&path).unwrap(), manifest);
    }
}
