//! Loading and republishing of the parameter and QoI tables

use crate::config::JobConfig;
use crate::manifest::{ManifestFragment, TableEntry};
use crate::profile;
use anyhow::{Context, anyhow};
use log::{debug, info, warn};
use std::fs::File;
use std::path::Path;

/// Kind of the values stored in a table column
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    /// All non-empty values are numbers
    Numeric,
    /// At least one value is not a number
    Categorical,
}

/// A delimited table with a header row, row order is the sample order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SampleTable {
    /// Loads a comma delimited table with a header row
    pub fn from_csv_file<P: AsRef<Path>>(csv_file: P) -> Result<Self, anyhow::Error> {
        let path = csv_file.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Unable to open table \"{}\"", path.display()))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(file);

        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read header row of \"{}\"", path.display()))?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(anyhow!("Table \"{}\" has no header row", path.display()));
        }

        let rows = reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_string).collect::<Vec<_>>()))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to parse table \"{}\"", path.display()))?;

        Ok(Self { headers, rows })
    }

    /// Writes the table as comma delimited file including the header row
    pub fn to_csv_file<P: AsRef<Path>>(&self, csv_file: P) -> Result<(), anyhow::Error> {
        let path = csv_file.as_ref();
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Unable to create table \"{}\"", path.display()))?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Number of rows (samples) of the table
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        &self.headers
    }

    /// Returns the kind of the column with the given index
    pub fn column_kind(&self, column: usize) -> ColumnKind {
        let numeric = self
            .rows
            .iter()
            .filter_map(|row| row.get(column))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .all(|value| value.parse::<f64>().is_ok());
        if numeric {
            ColumnKind::Numeric
        } else {
            ColumnKind::Categorical
        }
    }
}

/// Loads a table and republishes it as `<dataset>_<suffix>.csv` in the output directory
fn republish_table(
    config: &JobConfig,
    input: &Path,
    suffix: &str,
) -> Result<TableEntry, anyhow::Error> {
    let table = SampleTable::from_csv_file(input)?;
    if table.len() != config.number_samples {
        warn!(
            "Table \"{}\" has {} rows but the configured number of samples is {}",
            input.display(),
            table.len(),
            config.number_samples
        );
    }
    for (index, name) in table.column_names().iter().enumerate() {
        debug!("{} column \"{}\": {:?}", suffix, name, table.column_kind(index));
    }

    let file = format!("{}_{}.csv", config.dataset_name, suffix);
    table.to_csv_file(config.output_directory.join(&file))?;
    Ok(TableEntry {
        format: "csv".to_string(),
        file,
    })
}

/// Runs the tabular ingest stage: republishes the parameters and QoI tables
pub fn ingest_tables(config: &JobConfig) -> Result<Vec<ManifestFragment>, anyhow::Error> {
    profile!("ingest tables");

    info!("Reading parameters...");
    let parameters = republish_table(config, &config.parameters_file, "Parameters")
        .context("Failed to republish parameters table")?;
    info!("Reading QoIs...");
    let qois = republish_table(config, &config.qois_file, "QoIs")
        .context("Failed to republish QoI table")?;

    Ok(vec![
        ManifestFragment::Parameters(parameters),
        ManifestFragment::Qois(qois),
    ])
}
