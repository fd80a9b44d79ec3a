//!
//! Library for preprocessing design space datasets for the dSpaceX viewer.
//!
//! A preprocessing job turns a parameter table, a QoI table and a directory of shape files into a
//! dataset package: republished tables, one thumbnail per sample, a pairwise distance matrix, 2D
//! embeddings of that matrix and a `config.yaml` manifest describing all artifacts. The stages are
//! exposed as separate functions that are run in order by the command line tool:
//!
//!  1. [`config::JobConfig::resolve`]
//!  2. [`table::ingest_tables`]
//!  3. [`thumbnails::generate_thumbnails`]
//!  4. [`distance::calculate_distance`]
//!  5. [`embedding::calculate_embeddings`]
//!  6. [`manifest::Manifest::write_to_dir`]
//!

/// Re-export the version of nalgebra used by this crate
pub use nalgebra;

#[doc(hidden)]
pub mod profiling;
#[doc(hidden)]
pub mod profiling_macro;

/// Job configuration documents and their resolved form
pub mod config;
/// Pairwise distance metrics and the distance stage
pub mod distance;
/// Default and user supplied 2D embeddings
pub mod embedding;
/// File formats for tables, matrices, images and volumes
pub mod io;
/// Manifest of a processed dataset
pub mod manifest;
/// External distance and embedding scripts
pub mod script;
/// Discovery and loading of shape files
pub mod shapes;
/// Parameter and QoI tables
pub mod table;
/// Thumbnail generation
pub mod thumbnails;

pub use config::{JobConfig, JobDocument, UnsupportedOptionError};
pub use distance::{DistanceParameters, Metric};
pub use embedding::EmbeddingParameters;
pub use manifest::{Manifest, ManifestBuilder, ManifestFragment};
pub use script::{ExternalScript, ScriptError};

/// Initializes the global thread pool used by this library with the given number of threads.
///
/// As per default `rayon` automatically selects the number of threads to use. This is only
/// relevant if multi threading of the distance computation is enabled. The global thread pool
/// can only be initialized once, calling this function a second time returns an error.
pub fn initialize_thread_pool(num_threads: usize) -> Result<(), anyhow::Error> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;
    Ok(())
}
