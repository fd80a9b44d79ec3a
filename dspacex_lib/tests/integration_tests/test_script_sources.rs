#![cfg(unix)]

use dspacex_lib::config::{DistanceSource, EmbeddingSource, JobDocument};
use dspacex_lib::io::csv_format;
use dspacex_lib::nalgebra::DMatrix;
use dspacex_lib::{DistanceParameters, EmbeddingParameters, JobConfig, distance, embedding};
use std::path::Path;

const DISTANCE_SCRIPT: &str = r#"cat > /dev/null
if [ "$1" != "distance" ]; then
    echo "unknown method $1" >&2
    exit 3
fi
echo "0,1,2"
echo "1,0,1"
echo "2,1,0"
"#;

const EMBEDDING_SCRIPT: &str = r#"cat > /dev/null
echo "0.0,0.5"
echo "1.0,0.5"
echo "2.0,0.5"
"#;

fn job_document(root: &Path, embedding_method: &str) -> Result<JobDocument, anyhow::Error> {
    let document = serde_json::json!({
        "datasetName": "scripted",
        "outputDirectory": root.join("out"),
        "numberSamples": 3,
        "parametersFile": root.join("parameters.csv"),
        "qoisFile": root.join("qois.csv"),
        "shapeDirectory": root,
        "shapeFormat": "png",
        "thumbnails": "png",
        "distance": {
            "type": "script",
            "script": root.join("distance.sh"),
            "methodName": "distance",
            "interpreter": "/bin/sh",
            "arguments": { "samples": 3 },
        },
        "embeddings": [
            {
                "name": "line",
                "type": "script",
                "script": root.join("embedding.sh"),
                "methodName": embedding_method,
                "interpreter": "/bin/sh",
            }
        ],
    });
    Ok(serde_json::from_value(document)?)
}

#[test]
fn test_script_distance_and_embedding() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("distance.sh"), DISTANCE_SCRIPT)?;
    std::fs::write(dir.path().join("embedding.sh"), EMBEDDING_SCRIPT)?;

    let config = JobConfig::resolve(job_document(dir.path(), "embed")?)?;
    assert!(matches!(config.distance, DistanceSource::Script(_)));
    assert!(matches!(
        config.embeddings[0].source,
        EmbeddingSource::Script(_)
    ));

    let (entry, distance_matrix) =
        distance::calculate_distance(&config, &DistanceParameters::default())?;
    assert_eq!(entry.metric, "script");
    assert_eq!(
        distance_matrix,
        DMatrix::from_row_slice(3, 3, &[0.0, 1.0, 2.0, 1.0, 0.0, 1.0, 2.0, 1.0, 0.0])
    );

    let fragment = embedding::calculate_embeddings(
        &distance_matrix,
        &config,
        &EmbeddingParameters::default(),
    )?;
    let dspacex_lib::ManifestFragment::Embeddings(entries) = fragment else {
        panic!("embedding stage is supposed to return embedding entries");
    };
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[3].name, "line");
    assert_eq!(
        csv_format::matrix_from_csv(config.output_directory.join(&entries[3].file))?,
        DMatrix::from_row_slice(3, 2, &[0.0, 0.5, 1.0, 0.5, 2.0, 0.5])
    );

    Ok(())
}

#[test]
fn test_failing_script_is_reported() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("distance.sh"), DISTANCE_SCRIPT)?;
    std::fs::write(dir.path().join("embedding.sh"), EMBEDDING_SCRIPT)?;

    let mut document = job_document(dir.path(), "embed")?;
    document.distance.method_name = Some("unknown".to_string());
    let config = JobConfig::resolve(document)?;

    let err = distance::calculate_distance(&config, &DistanceParameters::default())
        .expect_err("the script is supposed to fail");
    let script_error = err
        .downcast_ref::<dspacex_lib::ScriptError>()
        .expect("the error is supposed to originate from the script");
    assert!(script_error.to_string().contains("unknown method unknown"));

    Ok(())
}
