use dspacex::{RunnerParameters, completion_summary, preprocess_job};
use dspacex_lib::io::csv_format;
use dspacex_lib::nalgebra::DMatrix;
use dspacex_lib::table::SampleTable;
use dspacex_lib::{Manifest, UnsupportedOptionError};
use std::path::{Path, PathBuf};

const NUM_SAMPLES: usize = 5;

/// Writes a dataset of five 64x64 PNG shapes with parameter and QoI tables
fn write_png_dataset(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let shapes = root.join("shapes");
    std::fs::create_dir_all(&shapes)?;
    for id in 1..=NUM_SAMPLES {
        let image = image::GrayImage::from_fn(64, 64, |x, y| {
            let inside = x < 12 * id as u32 && y < 10 * id as u32;
            image::Luma([if inside { 255 } else { (x + y) as u8 }])
        });
        image.save(shapes.join(format!("shape_{}.png", id)))?;
    }

    std::fs::write(
        root.join("parameters.csv"),
        "radius,material\n1.0,steel\n2.0,steel\n3.0,copper\n4.0,gold\n5.0,gold\n",
    )?;
    std::fs::write(
        root.join("qois.csv"),
        "strength\n0.5\n0.75\n1.5\n2.25\n3.0\n",
    )?;
    Ok(())
}

/// Option tags of a job that differ between the tests
struct JobOptions<'a> {
    number_samples: usize,
    shape_format: &'a str,
    thumbnails: &'a str,
    distance: &'a str,
    embeddings: &'a str,
}

impl Default for JobOptions<'_> {
    fn default() -> Self {
        Self {
            number_samples: NUM_SAMPLES,
            shape_format: "png",
            thumbnails: "png",
            distance: "  type: euclidean",
            embeddings: "",
        }
    }
}

fn write_job(root: &Path, distance: &str, embeddings: &str) -> Result<PathBuf, std::io::Error> {
    write_job_with(
        root,
        &JobOptions {
            distance,
            embeddings,
            ..Default::default()
        },
    )
}

fn write_job_with(root: &Path, options: &JobOptions) -> Result<PathBuf, std::io::Error> {
    let path = root.join("job.yaml");
    std::fs::write(
        &path,
        format!(
            r#"datasetName: shapes
outputDirectory: '{out}'
numberSamples: {n}
parametersFile: '{root}/parameters.csv'
qoisFile: '{root}/qois.csv'
shapeDirectory: '{root}/shapes'
shapeFormat: {shape_format}
thumbnails: {thumbnails}
distance:
{distance}
{embeddings}"#,
            out = root.join("out").display(),
            n = options.number_samples,
            root = root.display(),
            shape_format = options.shape_format,
            thumbnails = options.thumbnails,
            distance = options.distance,
            embeddings = options.embeddings,
        ),
    )?;
    Ok(path)
}

#[test]
fn test_png_euclidean_pipeline() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_png_dataset(dir.path())?;
    let job = write_job(dir.path(), "  type: euclidean", "")?;

    let result = preprocess_job(&job, &RunnerParameters::default())?;
    let out = dir.path().join("out");
    assert_eq!(result.output_directory, out);
    assert_eq!(result.manifest_path, out.join("config.yaml"));
    assert!(
        completion_summary(&result)
            .contains(&format!("Run the dSpaceX server with: --datapath {}", out.display()))
    );

    for id in 1..=NUM_SAMPLES {
        let thumbnail = out.join("images").join(format!("{}.png", id));
        assert!(thumbnail.is_file(), "missing {}", thumbnail.display());
        let image = image::open(&thumbnail)?;
        assert_eq!((image.width(), image.height()), (64, 64));
    }

    let distance = csv_format::matrix_from_csv(out.join("shapes_distance.csv"))?;
    assert_eq!(distance.shape(), (NUM_SAMPLES, NUM_SAMPLES));
    for i in 0..NUM_SAMPLES {
        assert_eq!(distance[(i, i)], 0.0);
        for j in 0..NUM_SAMPLES {
            assert!((distance[(i, j)] - distance[(j, i)]).abs() < 1e-9);
        }
    }

    for suffix in ["tsne", "mds", "isomap"] {
        let embedding = csv_format::matrix_from_csv(out.join(format!("shapes_{}.csv", suffix)))?;
        assert_eq!(embedding.shape(), (NUM_SAMPLES, 2), "{}", suffix);
    }

    let manifest = Manifest::from_file(out.join("config.yaml"))?;
    assert_eq!(manifest, result.manifest);
    assert_eq!(manifest.name, "shapes");
    assert_eq!(manifest.samples.count, NUM_SAMPLES);
    let distances = manifest.distances.expect("manifest should list the distances");
    assert_eq!(distances.file, "shapes_distance.csv");
    assert_eq!(distances.metric, "euclidean");
    let thumbnails = manifest.thumbnails.expect("manifest should list the thumbnails");
    assert_eq!(thumbnails.files, "images/?.png");
    assert_eq!(thumbnails.offset, 1);
    assert_eq!(
        manifest
            .embeddings
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>(),
        vec!["t-SNE", "MDS", "Isomap"]
    );

    Ok(())
}

#[test]
fn test_unsupported_metric_removes_output() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_png_dataset(dir.path())?;
    let job = write_job(dir.path(), "  type: unsupported_metric", "")?;

    let err = preprocess_job(&job, &RunnerParameters::default())
        .expect_err("unsupported metric is supposed to fail");
    assert_eq!(
        err.downcast_ref::<UnsupportedOptionError>(),
        Some(&UnsupportedOptionError::DistanceType(
            "unsupported_metric".to_string()
        ))
    );
    assert!(!dir.path().join("out").exists());

    Ok(())
}

/// Runs a job that is expected to fail with an unsupported option on a pre-existing output directory
fn run_unsupported_job(
    options: &JobOptions,
) -> Result<anyhow::Error, Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_png_dataset(dir.path())?;
    let out = dir.path().join("out");
    std::fs::create_dir_all(out.join("images"))?;
    std::fs::write(out.join("stale.csv"), "0\n")?;
    std::fs::write(out.join("images").join("1.png"), b"")?;

    let job = write_job_with(dir.path(), options)?;
    let err = preprocess_job(&job, &RunnerParameters::default())
        .expect_err("unsupported option is supposed to fail");
    assert!(!out.exists(), "output directory was not removed");
    Ok(err)
}

#[test]
fn test_unsupported_shape_format_removes_output() -> Result<(), Box<dyn std::error::Error>> {
    let err = run_unsupported_job(&JobOptions {
        shape_format: "obj",
        ..Default::default()
    })?;
    assert_eq!(
        err.downcast_ref::<UnsupportedOptionError>(),
        Some(&UnsupportedOptionError::ShapeFormat("obj".to_string()))
    );
    Ok(())
}

#[test]
fn test_unsupported_thumbnail_mode_removes_output() -> Result<(), Box<dyn std::error::Error>> {
    let err = run_unsupported_job(&JobOptions {
        thumbnails: "mesh",
        ..Default::default()
    })?;
    assert_eq!(
        err.downcast_ref::<UnsupportedOptionError>(),
        Some(&UnsupportedOptionError::ThumbnailMode("mesh".to_string()))
    );
    Ok(())
}

#[test]
fn test_unsupported_embedding_type_removes_output() -> Result<(), Box<dyn std::error::Error>> {
    let err = run_unsupported_job(&JobOptions {
        embeddings: "embeddings:\n  - name: projection\n    type: umap\n",
        ..Default::default()
    })?;
    assert_eq!(
        err.downcast_ref::<UnsupportedOptionError>(),
        Some(&UnsupportedOptionError::EmbeddingType {
            name: "projection".to_string(),
            kind: "umap".to_string()
        })
    );
    Ok(())
}

#[test]
fn test_sample_count_follows_configuration() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_png_dataset(dir.path())?;
    let job = write_job_with(
        dir.path(),
        &JobOptions {
            number_samples: 7,
            ..Default::default()
        },
    )?;

    let result = preprocess_job(&job, &RunnerParameters::default())?;
    assert_eq!(result.manifest.samples.count, 7);

    // One thumbnail per shape file found, not per configured sample
    let images = std::fs::read_dir(dir.path().join("out/images"))?
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(images.len(), NUM_SAMPLES);

    let out = dir.path().join("out");
    let distance = csv_format::matrix_from_csv(out.join("shapes_distance.csv"))?;
    assert_eq!(distance.shape(), (NUM_SAMPLES, NUM_SAMPLES));

    Ok(())
}

#[test]
fn test_missing_file_keeps_output() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_png_dataset(dir.path())?;
    let job = write_job(dir.path(), "  type: precomputed", "")?;

    let err = preprocess_job(&job, &RunnerParameters::default())
        .expect_err("precomputed distance without file is supposed to fail");
    assert!(err.downcast_ref::<UnsupportedOptionError>().is_none());
    assert!(dir.path().join("out").is_dir());

    Ok(())
}

#[test]
fn test_precomputed_distance_and_embedding() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_png_dataset(dir.path())?;

    let distance = DMatrix::from_fn(NUM_SAMPLES, NUM_SAMPLES, |i, j| {
        (i as f64 - j as f64).abs() * 0.5
    });
    let distance_file = dir.path().join("distance.csv");
    csv_format::matrix_to_csv(&distance, &distance_file)?;

    let embedding = DMatrix::from_fn(NUM_SAMPLES, 2, |i, j| i as f64 + 0.25 * j as f64);
    let embedding_file = dir.path().join("custom.csv");
    csv_format::matrix_to_csv(&embedding, &embedding_file)?;

    let job = write_job(
        dir.path(),
        &format!(
            "  type: precomputed\n  file: '{}'",
            distance_file.display()
        ),
        &format!(
            "embeddings:\n  - name: custom\n    type: precomputed\n    file: '{}'\n",
            embedding_file.display()
        ),
    )?;

    let result = preprocess_job(&job, &RunnerParameters::default())?;
    let out = dir.path().join("out");

    assert_eq!(
        csv_format::matrix_from_csv(out.join("shapes_distance.csv"))?,
        distance
    );
    assert_eq!(
        result.manifest.distances.as_ref().map(|d| d.metric.as_str()),
        Some("precomputed")
    );

    let embeddings = &result.manifest.embeddings;
    assert_eq!(embeddings.len(), 4);
    assert_eq!(embeddings[3].name, "custom");
    assert_eq!(embeddings[3].file, "shapes_custom.csv");
    assert_eq!(
        csv_format::matrix_from_csv(out.join(&embeddings[3].file))?,
        embedding
    );

    Ok(())
}

#[test]
fn test_parameters_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_png_dataset(dir.path())?;
    let job = write_job(dir.path(), "  type: cityblock", "")?;

    let parameters = RunnerParameters {
        parallelize_distance: true,
        ..Default::default()
    };
    let result = preprocess_job(&job, &parameters)?;
    let out = dir.path().join("out");

    let input = SampleTable::from_csv_file(dir.path().join("parameters.csv"))?;
    let republished = SampleTable::from_csv_file(out.join("shapes_Parameters.csv"))?;
    assert_eq!(republished.len(), input.len());
    assert_eq!(republished.column_names(), input.column_names());

    let qois = SampleTable::from_csv_file(out.join("shapes_QoIs.csv"))?;
    assert_eq!(qois.len(), NUM_SAMPLES);

    let manifest_yaml = std::fs::read_to_string(&result.manifest_path)?;
    let value: serde_yaml::Value = serde_yaml::from_str(&manifest_yaml)?;
    assert_eq!(value["samples"]["count"].as_u64(), Some(NUM_SAMPLES as u64));
    assert_eq!(value["parameters"]["file"].as_str(), Some("shapes_Parameters.csv"));
    assert_eq!(value["qois"]["file"].as_str(), Some("shapes_QoIs.csv"));
    assert_eq!(value["distances"]["metric"].as_str(), Some("cityblock"));

    Ok(())
}
