//! Reading and writing tabular files

use crate::error::{FeatureflowError, Result};
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk tabular formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Csv,
    Tsv,
    Parquet,
    Json,
}

impl DatasetFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(DatasetFormat::Csv),
            "tsv" => Some(DatasetFormat::Tsv),
            "parquet" | "pq" => Some(DatasetFormat::Parquet),
            "json" | "jsonl" => Some(DatasetFormat::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DatasetFormat::Csv => "csv",
            DatasetFormat::Tsv => "tsv",
            DatasetFormat::Parquet => "parquet",
            DatasetFormat::Json => "json",
        }
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path)
        .map_err(|e| FeatureflowError::DataError(format!("{}: {e}", path.display())))
}

/// Loader for the supported file formats
#[derive(Debug, Clone)]
pub struct DataLoader {
    infer_schema_length: Option<usize>,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            infer_schema_length: Some(100),
        }
    }

    /// Rows sampled when inferring CSV column types
    pub fn with_infer_schema_length(mut self, rows: Option<usize>) -> Self {
        self.infer_schema_length = rows;
        self
    }

    /// Load a delimited text file with a header row
    pub fn load_csv(&self, path: &Path, delimiter: u8) -> Result<DataFrame> {
        let file = open(path)?;
        let parse_opts = CsvParseOptions::default().with_separator(delimiter);

        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(self.infer_schema_length)
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(file)
            .finish()
            .map_err(|e| FeatureflowError::DataError(e.to_string()))
    }

    /// Load a Parquet file
    pub fn load_parquet(&self, path: &Path) -> Result<DataFrame> {
        let file = open(path)?;
        ParquetReader::new(file)
            .finish()
            .map_err(|e| FeatureflowError::DataError(e.to_string()))
    }

    /// Column names and dtypes from a parquet footer, without reading rows
    pub fn parquet_schema(&self, path: &Path) -> Result<Schema> {
        let file = open(path)?;
        let arrow_schema = ParquetReader::new(file)
            .schema()
            .map_err(|e| FeatureflowError::DataError(format!("{}: {e}", path.display())))?;
        Ok(Schema::from_arrow_schema(&arrow_schema))
    }

    /// Load a JSON file
    pub fn load_json(&self, path: &Path) -> Result<DataFrame> {
        let file = open(path)?;
        JsonReader::new(file)
            .finish()
            .map_err(|e| FeatureflowError::DataError(e.to_string()))
    }

    /// Detect the format from the extension and load
    pub fn load_auto(&self, path: &Path) -> Result<DataFrame> {
        let format = DatasetFormat::from_path(path).unwrap_or(DatasetFormat::Csv);
        debug!(path = %path.display(), ?format, "Loading dataset file");
        match format {
            DatasetFormat::Csv => self.load_csv(path, b','),
            DatasetFormat::Tsv => self.load_csv(path, b'\t'),
            DatasetFormat::Parquet => self.load_parquet(path),
            DatasetFormat::Json => self.load_json(path),
        }
    }
}

/// Save DataFrames to the supported formats
pub struct DataSaver;

impl DataSaver {
    pub fn save_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file)
            .finish(df)
            .map_err(|e| FeatureflowError::DataError(e.to_string()))
    }

    pub fn save_parquet(df: &mut DataFrame, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        ParquetWriter::new(file)
            .finish(df)
            .map_err(|e| FeatureflowError::DataError(e.to_string()))?;
        Ok(())
    }

    pub fn save_json(df: &mut DataFrame, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        JsonWriter::new(&mut file)
            .with_json_format(JsonFormat::Json)
            .finish(df)
            .map_err(|e| FeatureflowError::DataError(e.to_string()))
    }

    /// Save using the format implied by the extension
    pub fn save_auto(df: &mut DataFrame, path: &Path) -> Result<()> {
        match DatasetFormat::from_path(path) {
            Some(DatasetFormat::Parquet) => Self::save_parquet(df, path),
            Some(DatasetFormat::Json) => Self::save_json(df, path),
            Some(DatasetFormat::Tsv) => {
                let mut file = File::create(path)?;
                CsvWriter::new(&mut file)
                    .with_separator(b'\t')
                    .finish(df)
                    .map_err(|e| FeatureflowError::DataError(e.to_string()))
            }
            Some(DatasetFormat::Csv) | None => Self::save_csv(df, path),
        }
    }
}

/// Rewrite a dataset file in another format next to the original
pub fn convert_dataset(path: &Path, format: DatasetFormat) -> Result<PathBuf> {
    let target = path.with_extension(format.extension());
    if DatasetFormat::from_path(path) == Some(format) {
        return Ok(path.to_path_buf());
    }
    let mut df = DataLoader::new().load_auto(path)?;
    DataSaver::save_auto(&mut df, &target)?;
    debug!(from = %path.display(), to = %target.display(), "Converted dataset");
    Ok(target)
}

/// Split a frame row-wise into `n_partitions` parquet files inside `dir`
pub fn write_partitioned(df: &DataFrame, dir: &Path, n_partitions: usize) -> Result<Vec<PathBuf>> {
    if n_partitions == 0 {
        return Err(FeatureflowError::DataError(
            "partition count must be > 0".to_string(),
        ));
    }
    std::fs::create_dir_all(dir)?;

    let n_rows = df.height();
    let per_partition = n_rows.div_ceil(n_partitions).max(1);
    let mut paths = Vec::with_capacity(n_partitions);

    for (i, offset) in (0..n_rows.max(1)).step_by(per_partition).enumerate() {
        let len = per_partition.min(n_rows.saturating_sub(offset));
        let mut part = df.slice(offset as i64, len);
        let path = dir.join(format!("part-{i:05}.parquet"));
        DataSaver::save_parquet(&mut part, &path)?;
        paths.push(path);
    }

    Ok(paths)
}

/// Parquet files of a partitioned dataset directory, in name order
pub fn list_partitions(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| DatasetFormat::from_path(p) == Some(DatasetFormat::Parquet))
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(FeatureflowError::DataError(format!(
            "no parquet partitions found in {}",
            dir.display()
        )));
    }
    Ok(paths)
}
