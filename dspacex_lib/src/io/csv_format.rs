//! Helper functions for comma delimited numeric matrices (distances and embeddings)

use anyhow::{Context, anyhow};
use nalgebra::DMatrix;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Loads a comma delimited numeric matrix without header from the given file path
pub fn matrix_from_csv<P: AsRef<Path>>(csv_file: P) -> Result<DMatrix<f64>, anyhow::Error> {
    let path = csv_file.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Unable to open matrix file \"{}\"", path.display()))?;
    matrix_from_reader(file)
        .with_context(|| format!("Failed to parse matrix file \"{}\"", path.display()))
}

/// Parses a comma delimited numeric matrix, one row per line, `#` starts a comment line
pub fn matrix_from_reader<R: Read>(reader: R) -> Result<DMatrix<f64>, anyhow::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut num_cols = None;
    let mut values = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record.context("Invalid delimited record")?;
        // Skip blank lines
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }

        match num_cols {
            None => num_cols = Some(record.len()),
            Some(n) if n != record.len() => {
                return Err(anyhow!(
                    "Row {} has {} columns, expected {}",
                    row + 1,
                    record.len(),
                    n
                ));
            }
            _ => {}
        }

        for field in record.iter() {
            let value = field.parse::<f64>().with_context(|| {
                format!("Invalid number \"{}\" in row {}", field, row + 1)
            })?;
            values.push(value);
        }
    }

    let num_cols = num_cols.ok_or_else(|| anyhow!("The matrix does not contain any values"))?;
    Ok(DMatrix::from_row_slice(
        values.len() / num_cols,
        num_cols,
        &values,
    ))
}

/// Writes the matrix to the given file path, one comma delimited row per line
pub fn matrix_to_csv<P: AsRef<Path>>(matrix: &DMatrix<f64>, csv_file: P) -> Result<(), anyhow::Error> {
    let path = csv_file.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Unable to create matrix file \"{}\"", path.display()))?;
    matrix_to_writer(matrix, file)
        .with_context(|| format!("Failed to write matrix file \"{}\"", path.display()))
}

/// Writes the matrix to the given writer, one comma delimited row per line
pub fn matrix_to_writer<W: Write>(matrix: &DMatrix<f64>, writer: W) -> Result<(), anyhow::Error> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    for row in matrix.row_iter() {
        csv_writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    csv_writer.flush()?;

    Ok(())
}
