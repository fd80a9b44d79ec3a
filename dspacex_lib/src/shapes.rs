//! Discovery and loading of the shape files of a dataset

use crate::config::ShapeFormat;
use crate::io;
use anyhow::{Context, anyhow};
use log::{debug, info, warn};
use regex::Regex;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error as ThisError;
use walkdir::WalkDir;

static SAMPLE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("expected a valid regex"));

/// A shape file together with the sample ID encoded in its file name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShapeFile {
    pub id: u64,
    pub path: PathBuf,
}

/// Error types that can occur while extracting the sample ID from a shape file name
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum SampleIdError {
    #[error("no sample ID in the file name")]
    Missing,
    #[error("sample ID \"{token}\" is not a valid 64 bit ID ({source})")]
    Invalid {
        token: String,
        source: ParseIntError,
    },
}

/// Returns the last integer token of the file name (without extension), e.g. `12` for `design_3_12.png`
pub fn extract_sample_id(file_name: &str) -> Result<u64, SampleIdError> {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    let token = SAMPLE_ID_RE
        .find_iter(&stem)
        .last()
        .ok_or(SampleIdError::Missing)?
        .as_str();
    token.parse().map_err(|source| SampleIdError::Invalid {
        token: token.to_string(),
        source,
    })
}

/// Collects all files with the given extension (case-insensitive) directly inside of the directory, sorted by sample ID
///
/// Files without a valid integer token in their name are skipped with a warning. Duplicate IDs are
/// reported but kept.
pub fn collect_shape_files<P: AsRef<Path>>(
    shape_directory: P,
    extension: &str,
) -> Result<Vec<ShapeFile>, anyhow::Error> {
    let shape_directory = shape_directory.as_ref();
    if !shape_directory.is_dir() {
        return Err(anyhow!(
            "Shape directory \"{}\" does not exist",
            shape_directory.display()
        ));
    }
    info!(
        "Looking for .{} shape files in \"{}\"",
        extension,
        shape_directory.display()
    );

    let mut files = Vec::new();
    for entry in WalkDir::new(shape_directory)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let matches_extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if !matches_extension {
            continue;
        }

        let entry_name = entry.file_name().to_string_lossy();
        match extract_sample_id(&entry_name) {
            Ok(id) => files.push(ShapeFile {
                id,
                path: path.to_path_buf(),
            }),
            Err(err) => warn!("Skipping shape file \"{}\": {}", entry_name, err),
        }
    }

    files.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.path.cmp(&b.path)));
    for pair in files.windows(2) {
        if pair[0].id == pair[1].id {
            warn!(
                "Shape files \"{}\" and \"{}\" have the same sample ID {}",
                pair[0].path.display(),
                pair[1].path.display(),
                pair[0].id
            );
        }
    }

    debug!("Found {} shape files", files.len());
    Ok(files)
}

/// Loads all shapes of the given format in sample ID order and flattens each into a feature vector
pub fn load_shape_features<P: AsRef<Path>>(
    shape_directory: P,
    format: ShapeFormat,
) -> Result<Vec<Vec<f64>>, anyhow::Error> {
    let files = collect_shape_files(shape_directory, format.extension())?;
    if files.is_empty() {
        return Err(anyhow!(
            "No .{} shape files found in the shape directory",
            format.extension()
        ));
    }

    files
        .iter()
        .map(|file| {
            io::read_shape_features(&file.path)
                .with_context(|| format!("Failed to load shape of sample {}", file.id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_sample_id() {
        assert_eq!(extract_sample_id("12.png"), Ok(12));
        assert_eq!(extract_sample_id("design_3_0042.nrrd"), Ok(42));
        assert_eq!(extract_sample_id("shape7b.png"), Ok(7));
        assert_eq!(extract_sample_id("image.png"), Err(SampleIdError::Missing));
    }

    #[test]
    fn test_sample_id_out_of_range() {
        let err = extract_sample_id("shape_99999999999999999999999.png").unwrap_err();
        match &err {
            SampleIdError::Invalid { token, .. } => {
                assert_eq!(token, "99999999999999999999999")
            }
            SampleIdError::Missing => panic!("expected an invalid sample ID"),
        }
        assert!(err.to_string().contains("not a valid 64 bit ID"));

        // u64::MAX itself is accepted
        assert_eq!(
            extract_sample_id("shape_18446744073709551615.png"),
            Ok(u64::MAX)
        );

        let dir = tempfile::tempdir().unwrap();
        for name in ["s_99999999999999999999999.png", "s_5.png"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = collect_shape_files(dir.path(), "png").unwrap();
        assert_eq!(files.iter().map(|f| f.id).collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn test_collect_shape_files_in_id_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["s_10.png", "s_2.PNG", "s_1.png", "notes.txt", "s_3.nrrd", "cover.png"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub_4.png")).unwrap();

        let files = collect_shape_files(dir.path(), "png").unwrap();
        let ids = files.iter().map(|f| f.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 10]);
        assert_eq!(files[0].path, dir.path().join("s_1.png"));
    }

    #[test]
    fn test_missing_shape_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_shape_files(dir.path().join("missing"), "png").is_err());
        assert!(load_shape_features(dir.path(), ShapeFormat::Png).is_err());
    }
}
