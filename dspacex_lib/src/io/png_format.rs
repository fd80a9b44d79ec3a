//! Helper functions for PNG shape images and thumbnails

use anyhow::{Context, anyhow};
use image::{DynamicImage, GrayImage, ImageFormat, ImageReader};
use itertools::{Itertools, MinMaxResult};
use std::path::Path;

/// Loads an image from the given path, the format is detected from the file content
pub fn image_from_file<P: AsRef<Path>>(image_file: P) -> Result<DynamicImage, anyhow::Error> {
    let path = image_file.as_ref();
    ImageReader::open(path)
        .with_context(|| format!("Unable to open image file \"{}\"", path.display()))?
        .with_guessed_format()
        .context("Unable to detect image format")?
        .decode()
        .with_context(|| format!("Failed to decode image file \"{}\"", path.display()))
}

/// Loads a PNG image and returns its luma values in `[0, 1]` in row-major order
pub fn luma_features_from_png<P: AsRef<Path>>(png_file: P) -> Result<Vec<f64>, anyhow::Error> {
    let image = image_from_file(png_file)?;
    Ok(image
        .to_luma32f()
        .into_raw()
        .into_iter()
        .map(f64::from)
        .collect())
}

/// Decodes the image at `input_file` and saves it as PNG at `output_file`
pub fn resave_as_png<P: AsRef<Path>, Q: AsRef<Path>>(
    input_file: P,
    output_file: Q,
) -> Result<(), anyhow::Error> {
    let image = image_from_file(input_file)?;
    save_png(&image, output_file)
}

/// Saves the image as PNG to the given path
pub fn save_png<P: AsRef<Path>>(image: &DynamicImage, png_file: P) -> Result<(), anyhow::Error> {
    let path = png_file.as_ref();
    image
        .save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("Failed to write PNG file \"{}\"", path.display()))
}

/// Converts scalar values in row-major order to an 8 bit grayscale image, linearly mapping `[min, max]` to `[0, 255]`
pub fn normalized_gray_image(
    width: u32,
    height: u32,
    values: &[f64],
) -> Result<GrayImage, anyhow::Error> {
    if values.len() != width as usize * height as usize {
        return Err(anyhow!(
            "Expected {} values for a {}x{} image, got {}",
            width as usize * height as usize,
            width,
            height,
            values.len()
        ));
    }

    let (min, range) = match values.iter().copied().filter(|v| v.is_finite()).minmax() {
        MinMaxResult::MinMax(min, max) => (min, max - min),
        MinMaxResult::OneElement(v) => (v, 0.0),
        MinMaxResult::NoElements => (0.0, 0.0),
    };

    let pixels = values
        .iter()
        .map(|&v| {
            if range > 0.0 && v.is_finite() {
                (((v - min) / range) * 255.0).round() as u8
            } else {
                0
            }
        })
        .collect::<Vec<_>>();

    GrayImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("Failed to create {}x{} image buffer", width, height))
}
