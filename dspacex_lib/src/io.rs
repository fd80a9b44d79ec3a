//! Readers and writers for the file formats consumed and produced by the preprocessor

use anyhow::anyhow;
use log::trace;
use std::path::Path;

pub mod csv_format;
pub mod io_utils;
pub mod nrrd_format;
pub mod png_format;

/// Loads a shape file and flattens it into a feature vector, automatically detects the file format
///
/// PNG images are converted to luma values in `[0, 1]`, NRRD volumes yield their raw voxel values.
pub fn read_shape_features<P: AsRef<Path>>(shape_file: P) -> Result<Vec<f64>, anyhow::Error> {
    let shape_file = shape_file.as_ref();
    trace!("Reading shape from \"{}\"...", shape_file.display());

    let extension = shape_file
        .extension()
        .ok_or(anyhow!(
            "Unable to detect file format of shape file \"{}\" (file name has to end with supported extension)",
            shape_file.display()
        ))?
        .to_str()
        .ok_or(anyhow!("Invalid extension of shape file"))?;

    match extension.to_lowercase().as_str() {
        "png" => png_format::luma_features_from_png(shape_file),
        "nrrd" | "nhdr" => Ok(nrrd_format::volume_from_nrrd(shape_file)?.data),
        _ => Err(anyhow!(
            "Unsupported file format extension \"{}\" for reading shapes",
            extension
        )),
    }
}
