//! Dataset handles: fully materialized frames or lazily loaded partitions

use super::loader::{list_partitions, DataLoader, DatasetFormat};
use crate::config::{FeatureSpec, FeatureType};
use crate::error::{FeatureflowError, Result};
use crate::utils::parallel::{ParallelExecutor, Serial};
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// Column names and dtypes of a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSchema {
    columns: Vec<(String, DataType)>,
}

impl DatasetSchema {
    pub fn from_polars(schema: &Schema) -> Self {
        let columns = schema
            .iter()
            .map(|(name, dtype)| (name.to_string(), dtype.clone()))
            .collect();
        Self { columns }
    }

    pub fn from_frame(df: &DataFrame) -> Self {
        let columns = df
            .get_columns()
            .iter()
            .map(|c| (c.name().to_string(), c.dtype().clone()))
            .collect();
        Self { columns }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn dtype(&self, name: &str) -> Option<&DataType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, dtype)| dtype)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Verify every feature is present with a dtype its encoder can read
    pub fn check_features<'a>(&self, features: impl IntoIterator<Item = &'a FeatureSpec>) -> Result<()> {
        let mut mismatch = Mismatch::default();
        mismatch.collect(self, features);
        mismatch.into_result()
    }
}

/// Missing and incompatible columns, deduplicated across partitions
#[derive(Debug, Default)]
struct Mismatch {
    missing: Vec<String>,
    incompatible: Vec<String>,
}

impl Mismatch {
    fn collect<'a>(&mut self, schema: &DatasetSchema, features: impl IntoIterator<Item = &'a FeatureSpec>) {
        for feature in features {
            match schema.dtype(feature.name()) {
                None => push_unique(&mut self.missing, feature.name().to_string()),
                Some(dtype) if !accepts(feature.feature_type(), dtype) => push_unique(
                    &mut self.incompatible,
                    format!(
                        "{} ({} cannot be read from {dtype})",
                        feature.name(),
                        feature.feature_type()
                    ),
                ),
                Some(_) => {}
            }
        }
    }

    fn into_result(self) -> Result<()> {
        if self.missing.is_empty() && self.incompatible.is_empty() {
            Ok(())
        } else {
            Err(FeatureflowError::SchemaMismatch {
                missing: self.missing,
                incompatible: self.incompatible,
            })
        }
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn is_integer(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

fn is_numeric(dtype: &DataType) -> bool {
    is_integer(dtype) || matches!(dtype, DataType::Float32 | DataType::Float64)
}

/// Whether a column of `dtype` can feed a feature of `feature_type`
pub fn accepts(feature_type: FeatureType, dtype: &DataType) -> bool {
    if matches!(dtype, DataType::Null) {
        return true;
    }
    match feature_type {
        FeatureType::Numerical => is_numeric(dtype) || matches!(dtype, DataType::String | DataType::Boolean),
        FeatureType::Binary => is_numeric(dtype) || matches!(dtype, DataType::Boolean | DataType::String),
        FeatureType::Category => is_integer(dtype) || matches!(dtype, DataType::String | DataType::Boolean),
        FeatureType::H3 => is_integer(dtype) || matches!(dtype, DataType::String),
        FeatureType::Date => matches!(
            dtype,
            DataType::String | DataType::Date | DataType::Datetime(_, _)
        ),
        // numeric cells are read back as their string form; csv readers infer
        // one-wide vectors and all-digit tokens as numbers
        FeatureType::Sequence
        | FeatureType::Set
        | FeatureType::Text
        | FeatureType::Bag
        | FeatureType::Vector
        | FeatureType::Timeseries => is_numeric(dtype) || matches!(dtype, DataType::String),
        FeatureType::Audio | FeatureType::Image => matches!(dtype, DataType::String),
    }
}

/// One slice of a partitioned dataset
#[derive(Debug, Clone)]
pub enum Partition {
    /// A parquet file read on demand
    File(PathBuf),
    /// A frame already resident in memory
    Frame(DataFrame),
}

impl Partition {
    pub fn load(&self) -> Result<DataFrame> {
        match self {
            Partition::File(path) => DataLoader::new().load_auto(path),
            Partition::Frame(df) => Ok(df.clone()),
        }
    }

    /// Column names and dtypes; parquet files are read from their footer only
    pub fn schema(&self) -> Result<DatasetSchema> {
        match self {
            Partition::File(path) if DatasetFormat::from_path(path) == Some(DatasetFormat::Parquet) => {
                Ok(DatasetSchema::from_polars(&DataLoader::new().parquet_schema(path)?))
            }
            Partition::File(_) => Ok(DatasetSchema::from_frame(&self.load()?)),
            Partition::Frame(df) => Ok(DatasetSchema::from_frame(df)),
        }
    }
}

/// Ordered list of partitions that together form one table
#[derive(Debug, Clone)]
pub struct PartitionedDataset {
    partitions: Vec<Partition>,
}

impl PartitionedDataset {
    pub fn new(partitions: Vec<Partition>) -> Result<Self> {
        if partitions.is_empty() {
            return Err(FeatureflowError::DataError(
                "a partitioned dataset needs at least one partition".to_string(),
            ));
        }
        Ok(Self { partitions })
    }

    /// Every parquet file in `dir`, ordered by file name
    pub fn from_dir(dir: &Path) -> Result<Self> {
        Self::from_files(list_partitions(dir)?)
    }

    pub fn from_files(paths: Vec<PathBuf>) -> Result<Self> {
        Self::new(paths.into_iter().map(Partition::File).collect())
    }

    /// Split an in-memory frame into `n_partitions` row ranges
    pub fn from_frame(df: &DataFrame, n_partitions: usize) -> Result<Self> {
        let ranges = crate::utils::parallel::chunk_ranges(df.height(), n_partitions);
        let partitions = ranges
            .into_iter()
            .map(|r| Partition::Frame(df.slice(r.start as i64, r.len())))
            .collect();
        Self::new(partitions)
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Schema of the first partition
    pub fn schema(&self) -> Result<DatasetSchema> {
        self.partitions[0].schema()
    }

    /// Check the features against every partition without reading rows.
    ///
    /// A declared column whose dtype differs between partitions is reported
    /// as incompatible, since the partitions could not be stacked.
    pub fn check_features<'a>(&self, features: impl IntoIterator<Item = &'a FeatureSpec>) -> Result<()> {
        let features: Vec<&FeatureSpec> = features.into_iter().collect();
        let schemas = self
            .partitions
            .iter()
            .map(Partition::schema)
            .collect::<Result<Vec<_>>>()?;

        let mut mismatch = Mismatch::default();
        for schema in &schemas {
            mismatch.collect(schema, features.iter().copied());
        }
        for feature in &features {
            let mut dtypes = schemas.iter().filter_map(|s| s.dtype(feature.name()));
            if let Some(first) = dtypes.next() {
                if let Some(other) = dtypes.find(|d| *d != first) {
                    push_unique(
                        &mut mismatch.incompatible,
                        format!("{} (partitions disagree: {first} and {other})", feature.name()),
                    );
                }
            }
        }
        mismatch.into_result()
    }

    /// Load every partition through `executor`, preserving partition order
    pub fn load_all<E: ParallelExecutor>(&self, executor: &E) -> Result<Vec<DataFrame>> {
        executor
            .map_indexed(self.partitions.len(), |i| self.partitions[i].load())
            .into_iter()
            .collect()
    }

    /// Load and concatenate every partition
    pub fn collect<E: ParallelExecutor>(&self, executor: &E) -> Result<DataFrame> {
        concat_frames(self.load_all(executor)?)
    }
}

/// Stack frames vertically in order
pub fn concat_frames(frames: Vec<DataFrame>) -> Result<DataFrame> {
    let mut iter = frames.into_iter();
    let mut out = iter.next().ok_or_else(|| {
        FeatureflowError::DataError("cannot concatenate zero frames".to_string())
    })?;
    for frame in iter {
        out.vstack_mut(&frame)
            .map_err(|e| FeatureflowError::DataError(format!("partition schemas differ: {e}")))?;
    }
    Ok(out)
}

/// Reference to tabular data handed to a backend
#[derive(Debug, Clone)]
pub enum DatasetHandle {
    /// The whole table is resident in memory
    Materialized(DataFrame),
    /// The table is split into partitions loaded on demand
    Partitioned(PartitionedDataset),
}

impl From<DataFrame> for DatasetHandle {
    fn from(df: DataFrame) -> Self {
        DatasetHandle::Materialized(df)
    }
}

impl From<PartitionedDataset> for DatasetHandle {
    fn from(dataset: PartitionedDataset) -> Self {
        DatasetHandle::Partitioned(dataset)
    }
}

impl DatasetHandle {
    /// Open a file or a directory of parquet partitions.
    ///
    /// Parquet files and directories stay lazy; other formats are read eagerly.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Ok(DatasetHandle::Partitioned(PartitionedDataset::from_dir(path)?));
        }
        match DatasetFormat::from_path(path) {
            Some(DatasetFormat::Parquet) => Ok(DatasetHandle::Partitioned(
                PartitionedDataset::from_files(vec![path.to_path_buf()])?,
            )),
            _ => Ok(DatasetHandle::Materialized(DataLoader::new().load_auto(path)?)),
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self, DatasetHandle::Materialized(_))
    }

    pub fn schema(&self) -> Result<DatasetSchema> {
        match self {
            DatasetHandle::Materialized(df) => Ok(DatasetSchema::from_frame(df)),
            DatasetHandle::Partitioned(dataset) => dataset.schema(),
        }
    }

    /// Fail with `SchemaMismatch` unless every partition can feed `features`
    pub fn check_features<'a>(&self, features: impl IntoIterator<Item = &'a FeatureSpec>) -> Result<()> {
        match self {
            DatasetHandle::Materialized(df) => DatasetSchema::from_frame(df).check_features(features),
            DatasetHandle::Partitioned(dataset) => dataset.check_features(features),
        }
    }

    /// Collapse to a single in-memory frame on the calling thread
    pub fn materialize(&self) -> Result<DataFrame> {
        self.materialize_with(&Serial)
    }

    /// Collapse to a single in-memory frame, loading partitions through `executor`
    pub fn materialize_with<E: ParallelExecutor>(&self, executor: &E) -> Result<DataFrame> {
        match self {
            DatasetHandle::Materialized(df) => Ok(df.clone()),
            DatasetHandle::Partitioned(dataset) => dataset.collect(executor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::write_partitioned;

    fn frame() -> DataFrame {
        df!(
            "num" => &[1.0, 2.0, 3.0, 4.0, 5.0],
            "tokens" => &["a b", "b c", "c", "a", "b"],
            "flag" => &[true, false, true, false, true]
        )
        .unwrap()
    }

    #[test]
    fn test_schema_check_passes() {
        let schema = DatasetSchema::from_frame(&frame());
        let features = vec![
            FeatureSpec::numerical("num"),
            FeatureSpec::sequence("tokens"),
            FeatureSpec::binary("flag"),
        ];
        schema.check_features(&features).unwrap();
    }

    #[test]
    fn test_schema_check_reports_missing_and_incompatible() {
        let schema = DatasetSchema::from_frame(&frame());
        let features = vec![FeatureSpec::numerical("absent"), FeatureSpec::date("num")];
        match schema.check_features(&features).unwrap_err() {
            FeatureflowError::SchemaMismatch {
                missing,
                incompatible,
            } => {
                assert_eq!(missing, vec!["absent".to_string()]);
                assert_eq!(incompatible.len(), 1);
                assert!(incompatible[0].starts_with("num"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_partitioned_from_frame_round_trip() {
        let df = frame();
        let dataset = PartitionedDataset::from_frame(&df, 2).unwrap();
        assert_eq!(dataset.num_partitions(), 2);

        let handle = DatasetHandle::from(dataset);
        assert!(!handle.is_materialized());
        let collected = handle.materialize().unwrap();
        assert!(collected.equals(&df));
    }

    #[test]
    fn test_partitioned_dir_loads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let df = frame();
        write_partitioned(&df, dir.path(), 3).unwrap();

        let handle = DatasetHandle::from_path(dir.path()).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();
        let collected = handle.materialize_with(&pool).unwrap();
        assert!(collected.equals(&df));
        assert_eq!(handle.schema().unwrap().len(), 3);
    }

    #[test]
    fn test_numeric_columns_feed_token_and_vector_features() {
        let schema = DatasetSchema::from_frame(&frame());
        let features = vec![
            FeatureSpec::vector("num"),
            FeatureSpec::text("num"),
            FeatureSpec::timeseries("num"),
        ];
        schema.check_features(&features).unwrap();
        assert!(!accepts(FeatureType::Audio, &DataType::Float64));
    }

    #[test]
    fn test_parquet_schema_read_from_footer() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_partitioned(&frame(), dir.path(), 2).unwrap();
        let schema = Partition::File(files[0].clone()).schema().unwrap();
        assert_eq!(schema, DatasetSchema::from_frame(&frame()));
    }

    #[test]
    fn test_every_partition_is_checked() {
        let df = frame();
        let without_tokens = df.slice(3, 2).drop("tokens").unwrap();
        let dataset = PartitionedDataset::new(vec![
            Partition::Frame(df.slice(0, 3)),
            Partition::Frame(without_tokens),
        ])
        .unwrap();
        let features = vec![FeatureSpec::numerical("num"), FeatureSpec::sequence("tokens")];

        // the first partition alone looks fine
        dataset.schema().unwrap().check_features(&features).unwrap();
        match dataset.check_features(&features).unwrap_err() {
            FeatureflowError::SchemaMismatch { missing, .. } => assert_eq!(missing, vec!["tokens".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_partition_dtypes_must_agree() {
        let a = df!("num" => &[1.0, 2.0]).unwrap();
        let b = df!("num" => &["x", "y"]).unwrap();
        let dataset = PartitionedDataset::new(vec![Partition::Frame(a), Partition::Frame(b)]).unwrap();
        let err = dataset
            .check_features(&[FeatureSpec::category("num")])
            .unwrap_err();
        match err {
            FeatureflowError::SchemaMismatch { incompatible, .. } => {
                assert!(incompatible.iter().any(|s| s.contains("partitions disagree")), "{incompatible:?}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_partition_list_rejected() {
        assert!(PartitionedDataset::new(Vec::new()).is_err());
    }
}
