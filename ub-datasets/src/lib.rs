//! Dataset builders for candle.
//!
//! A builder declares its split sizes, reads the raw examples of a split from a [`Catalog`]
//! and preprocesses them, [`DatasetBuilder::load`] turns this into shuffled and batched
//! tensors.
//!
//! ```no_run
//! use ub_datasets::{DatasetBuilder, DatasetConfig, Split};
//! use ub_datasets::vision::SvhnDataset;
//!
//! # fn main() -> ub_datasets::Result<()> {
//! let config = DatasetConfig::new(128, 512).with_normalize_by_cifar(true);
//! let dataset = SvhnDataset::from_hub(config)?;
//! for batch in dataset.load(Split::Validation)? {
//!     let batch = batch?;
//!     println!("{:?} {:?}", batch.features.shape(), batch.labels.shape());
//! }
//! # Ok(())
//! # }
//! ```
pub mod batcher;
pub mod builder;
pub mod catalog;
mod config;
mod error;
#[cfg(feature = "hub")]
pub mod hub;
mod split;
pub mod vision;

pub use batcher::{Batch, Batcher};
pub use builder::{DatasetBuilder, PreprocessFn, ProcessedExample, SplitSizes};
pub use catalog::{Catalog, MemoryCatalog, RawExample, Range, ReadInstruction};
pub use config::DatasetConfig;
pub use error::{Error, Result};
pub use split::Split;
