//! Datasets: loading, partitioning, splitting and synthetic generation

pub mod dataset;
pub mod loader;
pub mod split;
pub mod synthetic;

pub use dataset::{concat_frames, DatasetHandle, DatasetSchema, Partition, PartitionedDataset};
pub use loader::{convert_dataset, list_partitions, write_partitioned, DataLoader, DataSaver, DatasetFormat};
pub use split::{split_dataset, DatasetSplits};
pub use synthetic::SyntheticDataGenerator;
