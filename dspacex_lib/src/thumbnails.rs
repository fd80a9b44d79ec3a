//! Generation of the per-sample thumbnail images

use crate::config::{JobConfig, NanoGenerator, ThumbnailMode};
use crate::io::{nrrd_format, png_format};
use crate::manifest::{ManifestFragment, ThumbnailsEntry};
use crate::profile;
use crate::shapes::{ShapeFile, collect_shape_files};
use anyhow::{Context, anyhow};
use image::{DynamicImage, GrayImage};
use image::imageops::{self, FilterType};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Name of the directory inside of the output directory containing the thumbnails
pub const IMAGES_DIRECTORY: &str = "images";

/// Ratio of the volume thumbnail size to the size of the projected volume inside of it
pub const VOLUME_FRAME_SCALE: f64 = 1.25;

/// Returns the path of the thumbnail of the given sample
pub fn thumbnail_path<P: AsRef<Path>>(output_directory: P, sample_id: u64) -> PathBuf {
    output_directory
        .as_ref()
        .join(IMAGES_DIRECTORY)
        .join(format!("{}.png", sample_id))
}

/// Runs the thumbnail stage and writes one `images/<sampleID>.png` per sample
///
/// The callback is invoked with the number of finished and the total number of thumbnails.
/// The external nanoparticle generator does not report progress.
pub fn generate_thumbnails<F: FnMut(usize, usize)>(
    config: &JobConfig,
    mut on_progress: F,
) -> Result<ManifestFragment, anyhow::Error> {
    profile!("generate thumbnails");

    let images_directory = config.output_directory.join(IMAGES_DIRECTORY);
    std::fs::create_dir_all(&images_directory).with_context(|| {
        format!(
            "Unable to create thumbnail directory \"{}\"",
            images_directory.display()
        )
    })?;

    match &config.thumbnails {
        ThumbnailMode::Nano(generator) => {
            info!("Generating nanoparticle thumbnails...");
            let parameters_file = config
                .output_directory
                .join(format!("{}_Parameters.csv", config.dataset_name));
            run_nano_generator(generator, &parameters_file, &images_directory)?;
        }
        ThumbnailMode::Png => {
            info!("Generating png thumbnails...");
            let files = collect_shape_files(&config.shape_directory, "png")?;
            for_each_shape(config, &files, &mut on_progress, |file| {
                png_format::resave_as_png(&file.path, thumbnail_path(&config.output_directory, file.id))
            })?;
        }
        ThumbnailMode::Volume => {
            info!("Generating volume thumbnails...");
            let files = collect_shape_files(&config.shape_directory, "nrrd")?;
            let [width, height] = config.thumbnail_resolution;
            for_each_shape(config, &files, &mut on_progress, |file| {
                let image = render_volume_thumbnail(&file.path, width, height)?;
                png_format::save_png(&image, thumbnail_path(&config.output_directory, file.id))
            })?;
        }
    }

    Ok(ManifestFragment::Thumbnails(ThumbnailsEntry::default()))
}

fn for_each_shape<F, P>(
    config: &JobConfig,
    files: &[ShapeFile],
    on_progress: &mut P,
    mut process: F,
) -> Result<(), anyhow::Error>
where
    F: FnMut(&ShapeFile) -> Result<(), anyhow::Error>,
    P: FnMut(usize, usize),
{
    if files.len() != config.number_samples {
        warn!(
            "Found {} shape files but the configured number of samples is {}",
            files.len(),
            config.number_samples
        );
    }

    on_progress(0, files.len());
    for (index, file) in files.iter().enumerate() {
        debug!(
            "Generating thumbnail {} of {} from \"{}\"",
            index + 1,
            files.len(),
            file.path.display()
        );
        process(file).with_context(|| {
            format!(
                "Failed to generate thumbnail for \"{}\"",
                file.path.display()
            )
        })?;
        on_progress(index + 1, files.len());
    }
    Ok(())
}

/// Renders the maximum-intensity projection of a NRRD volume as grayscale image with the given resolution
pub fn render_volume_thumbnail<P: AsRef<Path>>(
    nrrd_file: P,
    width: u32,
    height: u32,
) -> Result<DynamicImage, anyhow::Error> {
    let volume = nrrd_format::volume_from_nrrd(nrrd_file)?;
    let (projection_width, projection_height, projection) = volume.maximum_intensity_projection()?;
    let projection = png_format::normalized_gray_image(
        u32::try_from(projection_width)?,
        u32::try_from(projection_height)?,
        &projection,
    )?;

    // The projection is framed by a black margin
    let inner_width = ((width as f64 / VOLUME_FRAME_SCALE).round() as u32).clamp(1, width.max(1));
    let inner_height =
        ((height as f64 / VOLUME_FRAME_SCALE).round() as u32).clamp(1, height.max(1));
    let resized = imageops::resize(&projection, inner_width, inner_height, FilterType::Triangle);

    let mut framed = GrayImage::new(width, height);
    imageops::overlay(
        &mut framed,
        &resized,
        i64::from(width.saturating_sub(inner_width) / 2),
        i64::from(height.saturating_sub(inner_height) / 2),
    );
    Ok(DynamicImage::ImageLuma8(framed))
}

fn run_nano_generator(
    generator: &NanoGenerator,
    parameters_file: &Path,
    images_directory: &Path,
) -> Result<(), anyhow::Error> {
    let mut command = match &generator.interpreter {
        Some(interpreter) => {
            let mut command = Command::new(interpreter);
            command.arg(&generator.program);
            command
        }
        None => Command::new(&generator.program),
    };
    command
        .arg("--parameters")
        .arg(parameters_file)
        .arg("--output")
        .arg(images_directory)
        .arg("--no-slices");

    debug!("Running nanoparticle thumbnail generator: {:?}", command);
    let output = command.output().with_context(|| {
        format!(
            "Failed to start nanoparticle thumbnail generator \"{}\"",
            generator.program.display()
        )
    })?;

    if !output.status.success() {
        return Err(anyhow!(
            "Nanoparticle thumbnail generator exited with {}, stderr:\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}
