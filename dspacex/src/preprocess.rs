//! The preprocessing job runner: executes all stages of a job and rolls back on unsupported options

use crate::logging;
use anyhow::Context;
use dspacex_lib::config::JobDocument;
use dspacex_lib::manifest::ManifestFragment;
use dspacex_lib::{
    DistanceParameters, EmbeddingParameters, JobConfig, Manifest, ManifestBuilder,
    UnsupportedOptionError, distance, embedding, profile, table, thumbnails,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::path::{Path, PathBuf};

/// Options of a preprocessing run that are not part of the job configuration
#[derive(Clone, Debug, Default)]
pub struct RunnerParameters {
    /// Compute the pairwise distances of the shapes in parallel
    pub parallelize_distance: bool,
    /// Size of the global thread pool, `None` lets rayon decide
    pub num_threads: Option<usize>,
    /// Seed of the random initializations of the default embeddings
    pub seed: u64,
}

/// Result of a successful preprocessing job
#[derive(Clone, Debug)]
pub struct PipelineResult {
    /// Directory containing all artifacts of the dataset
    pub output_directory: PathBuf,
    /// Path of the written `config.yaml`
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
}

/// Runs the preprocessing job described by the given configuration file
///
/// If the job requests an option that is not supported, the output directory of the job is
/// removed including everything that was already written to it.
pub fn preprocess_job<P: AsRef<Path>>(
    config_file: P,
    parameters: &RunnerParameters,
) -> Result<PipelineResult, anyhow::Error> {
    let config_file = config_file.as_ref();
    info!("Loading job configuration \"{}\"...", config_file.display());
    let document = JobDocument::from_file(config_file)?;
    let output_directory = document.output_directory.clone();

    if let Some(num_threads) = parameters.num_threads {
        dspacex_lib::initialize_thread_pool(num_threads)?;
    }

    let result = preprocessing_pipeline(document, parameters);
    if let Err(err) = &result {
        if err.downcast_ref::<UnsupportedOptionError>().is_some() {
            rollback(&output_directory);
        }
    }

    result
}

/// Returns the message printed after a successful job, including the data path for the dSpaceX server
pub fn completion_summary(result: &PipelineResult) -> String {
    format!(
        "Data processing complete.\nRun the dSpaceX server with: --datapath {}\nHappy Exploring!",
        result.output_directory.display()
    )
}

/// Runs all stages of the job in order and writes the manifest
pub fn preprocessing_pipeline(
    document: JobDocument,
    parameters: &RunnerParameters,
) -> Result<PipelineResult, anyhow::Error> {
    profile!("preprocessing");

    let config = JobConfig::resolve(document)?;
    info!(
        "Processing dataset \"{}\" with {} samples into \"{}\"",
        config.dataset_name,
        config.number_samples,
        config.output_directory.display()
    );

    let mut builder = ManifestBuilder::new(&config.dataset_name, config.number_samples);
    for fragment in table::ingest_tables(&config)? {
        builder = builder.merge(fragment);
    }

    builder = builder.merge(thumbnails_with_progress(&config)?);

    let distance_parameters = DistanceParameters {
        minkowski_p: config.minkowski_p,
        enable_multi_threading: parameters.parallelize_distance,
    };
    let (distances, distance_matrix) =
        distance::calculate_distance(&config, &distance_parameters)?;
    builder = builder.merge(ManifestFragment::Distances(distances));

    let embedding_parameters = EmbeddingParameters {
        seed: parameters.seed,
        ..Default::default()
    };
    builder = builder.merge(embedding::calculate_embeddings(
        &distance_matrix,
        &config,
        &embedding_parameters,
    )?);

    let manifest = builder.build();
    let manifest_path = manifest.write_to_dir(&config.output_directory)?;
    info!("Manifest written to \"{}\"", manifest_path.display());

    Ok(PipelineResult {
        output_directory: config.output_directory,
        manifest_path,
        manifest,
    })
}

/// Runs the thumbnail stage with a progress bar that is suspended by log output
fn thumbnails_with_progress(config: &JobConfig) -> Result<ManifestFragment, anyhow::Error> {
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40}] {pos}/{len} thumbnails ({percent}%) - remaining: [{eta_precise}]",
    )
    .context("Invalid progress bar template")?
    .progress_chars("=> ");

    let mut progress: Option<ProgressBar> = None;
    let result = thumbnails::generate_thumbnails(config, |done, total| {
        let pb = progress.get_or_insert_with(|| {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(style.clone());
            logging::set_progress_bar(Some(pb.downgrade()));
            pb
        });
        pb.set_position(done as u64);
    });

    if let Some(pb) = progress {
        pb.finish();
        logging::set_progress_bar(None);
    }

    result
}

fn rollback(output_directory: &Path) {
    if !output_directory.exists() {
        return;
    }
    info!(
        "Removing output directory \"{}\"",
        output_directory.display()
    );
    if let Err(err) = std::fs::remove_dir_all(output_directory) {
        error!(
            "Unable to remove output directory \"{}\": {}",
            output_directory.display(),
            err
        );
    }
}
