//! Job configuration: the raw document read from JSON or YAML and its resolved form
//!
//! A job document is first deserialized into a [`JobDocument`] that keeps all option tags as
//! plain strings. [`JobConfig::resolve`] then creates the output directory and turns the tags
//! into closed sum types. Unknown tags are reported as [`UnsupportedOptionError`].

use crate::distance::Metric;
use crate::script::ExternalScript;
use anyhow::{Context, anyhow};
use log::{debug, info};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error as ThisError;

/// Default program used to render nanoparticle thumbnails
pub const DEFAULT_NANO_PROGRAM: &str = "generate_nano_thumbnails";
/// Default resolution of rendered volume thumbnails
pub const DEFAULT_THUMBNAIL_RESOLUTION: [u32; 2] = [300, 300];

/// Suffixes of the `<dataset>_<suffix>.csv` files written by the stages, user embeddings may not reuse them
const RESERVED_FILE_SUFFIXES: &[&str] =
    &["Parameters", "QoIs", "distance", "tsne", "mds", "isomap"];

/// Error type for option tags of a job that name an unsupported option
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum UnsupportedOptionError {
    /// The distance type is neither `precomputed`, `script` nor a supported metric
    #[error("the distance type \"{0}\" is not supported (supported are precomputed, script and the named metrics, e.g. euclidean)")]
    DistanceType(String),
    /// The shape format is not supported
    #[error("the shape format \"{0}\" is not supported (supported are nrrd and png)")]
    ShapeFormat(String),
    /// The thumbnail mode is not supported
    #[error("the thumbnail mode \"{0}\" is not supported (supported are nano, png and volume)")]
    ThumbnailMode(String),
    /// The type of a user embedding is not supported
    #[error("the type \"{kind}\" of embedding \"{name}\" is not supported (supported are precomputed and script)")]
    EmbeddingType { name: String, kind: String },
}

/// Raw job document as stored in the job configuration file
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDocument {
    pub dataset_name: String,
    pub output_directory: PathBuf,
    pub number_samples: usize,
    pub parameters_file: PathBuf,
    pub qois_file: PathBuf,
    pub shape_directory: PathBuf,
    pub shape_format: String,
    pub thumbnails: String,
    pub distance: RequestDocument,
    #[serde(default)]
    pub embeddings: Vec<EmbeddingDocument>,
    #[serde(default)]
    pub nano: Option<NanoDocument>,
    #[serde(default)]
    pub thumbnail_resolution: Option<[u32; 2]>,
}

/// Raw distance or embedding request
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDocument {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub script: Option<PathBuf>,
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub method_name: Option<String>,
    #[serde(default)]
    pub arguments: Option<serde_json::Value>,
    #[serde(default)]
    pub interpreter: Option<PathBuf>,
    /// Order of the Minkowski metric
    #[serde(default)]
    pub p: Option<f64>,
}

/// Raw user embedding request
#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingDocument {
    pub name: String,
    #[serde(flatten)]
    pub request: RequestDocument,
}

/// Raw settings of the nanoparticle thumbnail generator
#[derive(Clone, Debug, Deserialize)]
pub struct NanoDocument {
    #[serde(default)]
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub interpreter: Option<PathBuf>,
}

impl JobDocument {
    /// Reads a job document from a JSON file, or from a YAML file if the extension is `yaml` or `yml`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Unable to open job configuration \"{}\"", path.display()))?;
        let reader = BufReader::new(file);

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());
        let document = match extension.as_deref() {
            Some("yaml") | Some("yml") => serde_yaml::from_reader(reader).with_context(|| {
                format!("Invalid YAML job configuration \"{}\"", path.display())
            })?,
            _ => serde_json::from_reader(reader).with_context(|| {
                format!("Invalid JSON job configuration \"{}\"", path.display())
            })?,
        };
        Ok(document)
    }
}

/// Supported formats of shape files
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShapeFormat {
    Nrrd,
    Png,
}

impl ShapeFormat {
    /// File extension of shape files of this format
    pub fn extension(&self) -> &'static str {
        match self {
            ShapeFormat::Nrrd => "nrrd",
            ShapeFormat::Png => "png",
        }
    }
}

/// External program rendering thumbnails from the parameters of nanoparticle datasets
#[derive(Clone, Debug, PartialEq)]
pub struct NanoGenerator {
    pub program: PathBuf,
    pub interpreter: Option<PathBuf>,
}

impl Default for NanoGenerator {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_NANO_PROGRAM),
            interpreter: None,
        }
    }
}

/// Strategy used to create the thumbnail images
#[derive(Clone, Debug, PartialEq)]
pub enum ThumbnailMode {
    /// Render nanoparticles from the parameters table with an external program
    Nano(NanoGenerator),
    /// Re-save the PNG shape files
    Png,
    /// Render projections of the NRRD shape volumes
    Volume,
}

/// Source of the distance matrix
#[derive(Clone, Debug, PartialEq)]
pub enum DistanceSource {
    Precomputed(PathBuf),
    Script(ExternalScript),
    Metric(Metric),
}

/// Source of a user embedding
#[derive(Clone, Debug, PartialEq)]
pub enum EmbeddingSource {
    Precomputed(PathBuf),
    Script(ExternalScript),
}

/// A named user embedding
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingRequest {
    pub name: String,
    pub source: EmbeddingSource,
}

/// Resolved job configuration
#[derive(Clone, Debug, PartialEq)]
pub struct JobConfig {
    pub dataset_name: String,
    pub output_directory: PathBuf,
    pub number_samples: usize,
    pub parameters_file: PathBuf,
    pub qois_file: PathBuf,
    pub shape_directory: PathBuf,
    pub shape_format: ShapeFormat,
    pub thumbnails: ThumbnailMode,
    pub thumbnail_resolution: [u32; 2],
    pub distance: DistanceSource,
    /// Order of the Minkowski metric
    pub minkowski_p: f64,
    pub embeddings: Vec<EmbeddingRequest>,
}

impl JobConfig {
    /// Ensures that the output directory exists and resolves all option tags of the document
    ///
    /// Unsupported tags result in an [`UnsupportedOptionError`] (wrapped into the returned
    /// `anyhow::Error`) after the output directory was created.
    pub fn resolve(document: JobDocument) -> Result<Self, anyhow::Error> {
        if !document.output_directory.is_dir() {
            info!(
                "Creating output directory \"{}\"",
                document.output_directory.display()
            );
        }
        std::fs::create_dir_all(&document.output_directory).with_context(|| {
            format!(
                "Unable to create output directory \"{}\"",
                document.output_directory.display()
            )
        })?;

        let config = Self::try_from(document)?;
        debug!("Resolved job configuration: {:?}", config);
        Ok(config)
    }
}

impl TryFrom<JobDocument> for JobConfig {
    type Error = anyhow::Error;

    /// Resolves the option tags of the document without touching the file system
    fn try_from(document: JobDocument) -> Result<Self, Self::Error> {
        let shape_format = parse_shape_format(&document.shape_format)?;
        let distance = parse_distance_source(&document.distance)?;
        let thumbnails = parse_thumbnail_mode(&document.thumbnails, document.nano.as_ref())?;
        let mut embeddings: Vec<EmbeddingRequest> = Vec::with_capacity(document.embeddings.len());
        for embedding in &document.embeddings {
            let request = parse_embedding_request(embedding)?;
            if embeddings
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&request.name))
            {
                return Err(anyhow!("embedding name \"{}\" is used twice", request.name));
            }
            embeddings.push(request);
        }

        Ok(Self {
            dataset_name: document.dataset_name,
            output_directory: document.output_directory,
            number_samples: document.number_samples,
            parameters_file: document.parameters_file,
            qois_file: document.qois_file,
            shape_directory: document.shape_directory,
            shape_format,
            thumbnails,
            thumbnail_resolution: document
                .thumbnail_resolution
                .unwrap_or(DEFAULT_THUMBNAIL_RESOLUTION),
            distance,
            minkowski_p: document.distance.p.unwrap_or(2.0),
            embeddings,
        })
    }
}

fn parse_shape_format(tag: &str) -> Result<ShapeFormat, UnsupportedOptionError> {
    match tag.trim().to_lowercase().as_str() {
        "nrrd" => Ok(ShapeFormat::Nrrd),
        "png" => Ok(ShapeFormat::Png),
        _ => Err(UnsupportedOptionError::ShapeFormat(tag.to_string())),
    }
}

fn parse_thumbnail_mode(
    tag: &str,
    nano: Option<&NanoDocument>,
) -> Result<ThumbnailMode, UnsupportedOptionError> {
    match tag.trim().to_lowercase().as_str() {
        "nano" => {
            let mut generator = NanoGenerator::default();
            if let Some(nano) = nano {
                if let Some(program) = &nano.program {
                    generator.program = program.clone();
                }
                generator.interpreter = nano.interpreter.clone();
            }
            Ok(ThumbnailMode::Nano(generator))
        }
        "png" => Ok(ThumbnailMode::Png),
        "volume" => Ok(ThumbnailMode::Volume),
        _ => Err(UnsupportedOptionError::ThumbnailMode(tag.to_string())),
    }
}

fn parse_distance_source(request: &RequestDocument) -> Result<DistanceSource, anyhow::Error> {
    let source = match request.kind.trim().to_lowercase().as_str() {
        "precomputed" => DistanceSource::Precomputed(required_file(request, "distance")?),
        "script" => DistanceSource::Script(external_script(request, "distance")?),
        _ => DistanceSource::Metric(request.kind.parse::<Metric>()?),
    };
    Ok(source)
}

/// Checks that the embedding name can be used as suffix of `<dataset>_<name>.csv` next to the other artifacts
fn validate_embedding_name(name: &str) -> Result<(), anyhow::Error> {
    if name.trim().is_empty() {
        return Err(anyhow!("embedding name must not be empty"));
    }
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(anyhow!(
            "embedding name \"{}\" must not contain path separators or \"..\"",
            name
        ));
    }
    if let Some(reserved) = RESERVED_FILE_SUFFIXES
        .iter()
        .find(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(anyhow!(
            "embedding name \"{}\" clashes with the output file suffix \"{}\"",
            name,
            reserved
        ));
    }
    Ok(())
}

fn parse_embedding_request(document: &EmbeddingDocument) -> Result<EmbeddingRequest, anyhow::Error> {
    validate_embedding_name(&document.name)?;
    let context = format!("embedding \"{}\"", document.name);
    let source = match document.request.kind.trim().to_lowercase().as_str() {
        "precomputed" => EmbeddingSource::Precomputed(required_file(&document.request, &context)?),
        "script" => EmbeddingSource::Script(external_script(&document.request, &context)?),
        _ => {
            return Err(UnsupportedOptionError::EmbeddingType {
                name: document.name.clone(),
                kind: document.request.kind.clone(),
            }
            .into());
        }
    };

    Ok(EmbeddingRequest {
        name: document.name.clone(),
        source,
    })
}

fn required_file(request: &RequestDocument, context: &str) -> Result<PathBuf, anyhow::Error> {
    request
        .file
        .clone()
        .ok_or_else(|| anyhow!("missing field `file` for precomputed {}", context))
}

fn external_script(request: &RequestDocument, context: &str) -> Result<ExternalScript, anyhow::Error> {
    let script = request
        .script
        .clone()
        .ok_or_else(|| anyhow!("missing field `script` for {} script", context))?;
    let method_name = request
        .method_name
        .clone()
        .ok_or_else(|| anyhow!("missing field `methodName` for {} script", context))?;
    if script.is_dir() && request.module_name.is_none() {
        return Err(anyhow!(
            "missing field `moduleName` for {} script in directory \"{}\"",
            context,
            script.display()
        ));
    }

    Ok(ExternalScript {
        script,
        module_name: request.module_name.clone(),
        method_name,
        arguments: request.arguments.clone(),
        interpreter: request.interpreter.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(distance_type: &str) -> JobDocument {
        let json = format!(
            r#"{{
                "datasetName": "shapes",
                "outputDirectory": "/tmp/shapes_out",
                "numberSamples": 5,
                "parametersFile": "params.csv",
                "qoisFile": "qois.csv",
                "shapeDirectory": "shapes/",
                "shapeFormat": "png",
                "thumbnails": "png",
                "distance": {{ "type": "{}" }}
            }}"#,
            distance_type
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_resolve_metric_job() {
        let config = JobConfig::try_from(document("Euclidean")).unwrap();
        assert_eq!(config.distance, DistanceSource::Metric(Metric::Euclidean));
        assert_eq!(config.shape_format, ShapeFormat::Png);
        assert_eq!(config.thumbnails, ThumbnailMode::Png);
        assert_eq!(config.thumbnail_resolution, [300, 300]);
        assert_eq!(config.minkowski_p, 2.0);
        assert!(config.embeddings.is_empty());
    }

    #[test]
    fn test_unsupported_tags() {
        let err = JobConfig::try_from(document("unsupported_metric")).unwrap_err();
        assert_eq!(
            err.downcast_ref::<UnsupportedOptionError>(),
            Some(&UnsupportedOptionError::DistanceType(
                "unsupported_metric".to_string()
            ))
        );

        let mut doc = document("euclidean");
        doc.shape_format = "obj".to_string();
        let err = JobConfig::try_from(doc).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UnsupportedOptionError>(),
            Some(UnsupportedOptionError::ShapeFormat(_))
        ));

        let mut doc = document("euclidean");
        doc.thumbnails = "mesh".to_string();
        let err = JobConfig::try_from(doc).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UnsupportedOptionError>(),
            Some(UnsupportedOptionError::ThumbnailMode(_))
        ));
    }

    #[test]
    fn test_embedding_names_cannot_overwrite_outputs() {
        let embedding = |name: &str| -> EmbeddingDocument {
            serde_json::from_value(serde_json::json!({
                "name": name,
                "type": "precomputed",
                "file": "given.csv"
            }))
            .unwrap()
        };

        for name in ["tsne", "MDS", "Isomap", "distance", "qois", "", "../up", "a/b", "a\\b"] {
            let mut doc = document("euclidean");
            doc.embeddings = vec![embedding(name)];
            let err = JobConfig::try_from(doc).unwrap_err();
            assert!(
                err.downcast_ref::<UnsupportedOptionError>().is_none(),
                "{}",
                name
            );
            assert!(err.to_string().contains("embedding name"), "{}", name);
        }

        let mut doc = document("euclidean");
        doc.embeddings = vec![embedding("pca"), embedding("PCA")];
        let err = JobConfig::try_from(doc).unwrap_err();
        assert!(err.to_string().contains("used twice"));

        let mut doc = document("euclidean");
        doc.embeddings = vec![embedding("pca"), embedding("tsne_2")];
        let config = JobConfig::try_from(doc).unwrap();
        assert_eq!(config.embeddings.len(), 2);
    }

    #[test]
    fn test_missing_keys_are_config_errors() {
        let err = serde_json::from_str::<JobDocument>(r#"{"datasetName": "x"}"#).unwrap_err();
        assert!(err.to_string().contains("missing field"));

        let err = JobConfig::try_from(document("precomputed")).unwrap_err();
        assert!(err.downcast_ref::<UnsupportedOptionError>().is_none());
        assert!(err.to_string().contains("`file`"));
    }

    #[test]
    fn test_yaml_document_with_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.yaml");
        std::fs::write(
            &path,
            r#"
datasetName: volumes
outputDirectory: out
numberSamples: 3
parametersFile: p.csv
qoisFile: q.csv
shapeDirectory: volumes
shapeFormat: NRRD
thumbnails: nano
nano:
  program: render_nano
distance:
  type: minkowski
  p: 3
embeddings:
  - name: pca
    type: script
    script: embed.py
    methodName: pca
    interpreter: python3
    arguments:
      components: 2
  - name: given
    type: precomputed
    file: given.csv
  - name: broken
    type: umap
"#,
        )
        .unwrap();

        let doc = JobDocument::from_file(&path).unwrap();
        assert_eq!(doc.embeddings.len(), 3);

        let err = JobConfig::try_from(doc.clone()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<UnsupportedOptionError>(),
            Some(&UnsupportedOptionError::EmbeddingType {
                name: "broken".to_string(),
                kind: "umap".to_string()
            })
        );

        let mut doc = doc;
        doc.embeddings.pop();
        let config = JobConfig::try_from(doc).unwrap();
        assert_eq!(config.shape_format, ShapeFormat::Nrrd);
        assert_eq!(config.distance, DistanceSource::Metric(Metric::Minkowski));
        assert_eq!(config.minkowski_p, 3.0);
        assert_eq!(
            config.thumbnails,
            ThumbnailMode::Nano(NanoGenerator {
                program: PathBuf::from("render_nano"),
                interpreter: None
            })
        );

        match &config.embeddings[0].source {
            EmbeddingSource::Script(script) => {
                assert_eq!(script.method_name, "pca");
                assert_eq!(script.interpreter, Some(PathBuf::from("python3")));
                assert_eq!(
                    script.arguments,
                    Some(serde_json::json!({ "components": 2 }))
                );
            }
            other => panic!("unexpected embedding source: {:?}", other),
        }
        assert_eq!(
            config.embeddings[1].source,
            EmbeddingSource::Precomputed(PathBuf::from("given.csv"))
        );
    }

    #[test]
    fn test_resolve_creates_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = document("euclidean");
        doc.output_directory = dir.path().join("nested").join("out");

        let config = JobConfig::resolve(doc).unwrap();
        assert!(config.output_directory.is_dir());
    }
}
