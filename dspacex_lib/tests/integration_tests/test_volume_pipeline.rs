use dspacex_lib::config::{JobDocument, ShapeFormat, ThumbnailMode};
use dspacex_lib::io::nrrd_format::{self, NrrdVolume};
use dspacex_lib::io::{csv_format, read_shape_features};
use dspacex_lib::manifest::{MANIFEST_FILE_NAME, ManifestFragment};
use dspacex_lib::{
    DistanceParameters, EmbeddingParameters, JobConfig, Manifest, ManifestBuilder, distance,
    embedding, table, thumbnails,
};
use std::path::Path;

const NUM_SAMPLES: usize = 4;

/// A 6x5x3 volume with a bright block whose extent grows with the sample ID
fn synthetic_volume(id: usize) -> NrrdVolume {
    let (nx, ny, nz) = (6, 5, 3);
    let mut data = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let inside = x < id + 1 && y < id && z == 1;
                data.push(if inside { 100.0 } else { (x + y) as f64 });
            }
        }
    }
    NrrdVolume {
        sizes: vec![nx, ny, nz],
        data,
    }
}

fn write_dataset(root: &Path) -> Result<(), anyhow::Error> {
    let volumes = root.join("volumes");
    std::fs::create_dir_all(&volumes)?;
    for id in 1..=NUM_SAMPLES {
        nrrd_format::volume_to_nrrd(
            &synthetic_volume(id),
            volumes.join(format!("volume_{:03}.nrrd", id)),
            id % 2 == 0,
        )?;
    }
    std::fs::write(root.join("parameters.csv"), "size\n1\n2\n3\n4\n")?;
    std::fs::write(root.join("qois.csv"), "volume,label\n0.1,a\n0.2,b\n0.3,c\n0.4,d\n")?;
    Ok(())
}

fn job_document(root: &Path) -> Result<JobDocument, anyhow::Error> {
    let document = serde_json::json!({
        "datasetName": "volumes",
        "outputDirectory": root.join("out"),
        "numberSamples": NUM_SAMPLES,
        "parametersFile": root.join("parameters.csv"),
        "qoisFile": root.join("qois.csv"),
        "shapeDirectory": root.join("volumes"),
        "shapeFormat": "NRRD",
        "thumbnails": "volume",
        "thumbnailResolution": [32, 24],
        "distance": { "type": "minkowski", "p": 3.0 },
    });
    Ok(serde_json::from_value(document)?)
}

#[test]
fn test_volume_pipeline() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;

    let config = JobConfig::resolve(job_document(dir.path())?)?;
    assert_eq!(config.shape_format, ShapeFormat::Nrrd);
    assert_eq!(config.thumbnails, ThumbnailMode::Volume);
    assert_eq!(config.minkowski_p, 3.0);
    assert!(config.output_directory.is_dir());

    let mut builder = ManifestBuilder::new(config.dataset_name.clone(), config.number_samples);
    for fragment in table::ingest_tables(&config)? {
        builder = builder.merge(fragment);
    }

    let mut progress = Vec::new();
    let fragment = thumbnails::generate_thumbnails(&config, |done, total| {
        progress.push((done, total))
    })?;
    assert_eq!(progress.first(), Some(&(0, NUM_SAMPLES)));
    assert_eq!(progress.last(), Some(&(NUM_SAMPLES, NUM_SAMPLES)));
    builder = builder.merge(fragment);

    for id in 1..=NUM_SAMPLES {
        let image = image::open(thumbnails::thumbnail_path(&config.output_directory, id as u64))?;
        assert_eq!((image.width(), image.height()), (32, 24));
    }

    let parameters = DistanceParameters {
        minkowski_p: config.minkowski_p,
        ..Default::default()
    };
    let (entry, distance_matrix) = distance::calculate_distance(&config, &parameters)?;
    assert_eq!(entry.metric, "minkowski");
    assert_eq!(distance_matrix.shape(), (NUM_SAMPLES, NUM_SAMPLES));
    // The blocks are nested, so the distance grows with the ID difference
    assert!(distance_matrix[(0, 1)] < distance_matrix[(0, 2)]);
    assert!(distance_matrix[(0, 2)] < distance_matrix[(0, 3)]);
    assert_eq!(
        csv_format::matrix_from_csv(config.output_directory.join(&entry.file))?,
        distance_matrix
    );
    builder = builder.merge(ManifestFragment::Distances(entry));

    builder = builder.merge(embedding::calculate_embeddings(
        &distance_matrix,
        &config,
        &EmbeddingParameters::default(),
    )?);

    let manifest = builder.build();
    let path = manifest.write_to_dir(&config.output_directory)?;
    assert_eq!(path, config.output_directory.join(MANIFEST_FILE_NAME));

    let read_back = Manifest::from_file(&path)?;
    assert_eq!(read_back, manifest);
    assert_eq!(read_back.samples.count, NUM_SAMPLES);
    assert_eq!(read_back.embeddings.len(), 3);
    assert_eq!(
        read_back.qois.map(|qois| qois.file),
        Some("volumes_QoIs.csv".to_string())
    );

    Ok(())
}

#[test]
fn test_volume_features_are_flattened() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("volume.nhdr.nrrd");
    let volume = synthetic_volume(2);
    nrrd_format::volume_to_nrrd(&volume, &path, true)?;

    let features = read_shape_features(&path)?;
    assert_eq!(features, volume.data);
    Ok(())
}
