//! Dataset catalogs: where raw examples and their partition metadata come from.
//!
//! A catalog serves named datasets, each made of named partitions (e.g. `train`, `test`).
//! Partitions are read through a [`ReadInstruction`] selecting an absolute range of examples.
use std::collections::BTreeMap;

use candle::{DType, Device, Tensor};

use crate::{Error, Result};

/// A single undecoded record, as served by a catalog.
#[derive(Debug, Clone)]
pub struct RawExample {
    /// `u8` pixels with shape `(height, width, 3)`.
    pub image: Tensor,
    pub label: i64,
}

impl RawExample {
    pub fn new(image: Tensor, label: i64) -> Result<Self> {
        if image.dtype() != DType::U8 {
            return Err(Error::InvalidExample(format!(
                "expected u8 pixels, got {:?}",
                image.dtype()
            )));
        }
        match image.dims() {
            [_, _, 3] => Ok(Self { image, label }),
            dims => Err(Error::InvalidExample(format!(
                "expected an image with shape (height, width, 3), got {dims:?}"
            ))),
        }
    }

    pub fn from_rgb8(pixels: Vec<u8>, height: usize, width: usize, label: i64) -> Result<Self> {
        let image = Tensor::from_vec(pixels, (height, width, 3), &Device::Cpu)?;
        Self::new(image, label)
    }
}

/// A lazy stream of raw examples. Loading the same instruction again restarts the stream.
pub type ExampleStream = Box<dyn Iterator<Item = Result<RawExample>>>;

/// Which examples of a partition to read, counted in absolute number of examples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    All,
    First(usize),
    Last(usize),
    AllButLast(usize),
    Between(usize, usize),
}

impl Range {
    /// Resolves the selector against a partition holding `total` examples. Counts beyond the
    /// end of the partition are clamped.
    pub fn resolve(&self, total: usize) -> Result<std::ops::Range<usize>> {
        let range = match *self {
            Self::All => 0..total,
            Self::First(n) => 0..n.min(total),
            Self::Last(n) => total.saturating_sub(n)..total,
            Self::AllButLast(n) => 0..total.saturating_sub(n),
            Self::Between(from, to) => {
                if from > to {
                    crate::error::bail_invalid!("invalid range {from}..{to}")
                }
                from.min(total)..to.min(total)
            }
        };
        Ok(range)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadInstruction {
    pub partition: String,
    pub range: Range,
}

impl ReadInstruction {
    pub fn new<S: Into<String>>(partition: S, range: Range) -> Self {
        Self {
            partition: partition.into(),
            range,
        }
    }

    pub fn all<S: Into<String>>(partition: S) -> Self {
        Self::new(partition, Range::All)
    }
}

impl std::fmt::Display for ReadInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.range {
            Range::All => write!(f, "{}", self.partition),
            Range::First(n) => write!(f, "{}[:{n}]", self.partition),
            Range::Last(n) => write!(f, "{}[-{n}:]", self.partition),
            Range::AllButLast(n) => write!(f, "{}[:-{n}]", self.partition),
            Range::Between(a, b) => write!(f, "{}[{a}:{b}]", self.partition),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub name: String,
    /// Number of examples per partition name.
    pub partitions: BTreeMap<String, usize>,
}

impl DatasetInfo {
    pub fn num_examples(&self, partition: &str) -> Result<usize> {
        self.partitions
            .get(partition)
            .copied()
            .ok_or_else(|| Error::UnknownPartition {
                dataset: self.name.clone(),
                partition: partition.to_string(),
            })
    }
}

pub trait Catalog {
    /// Metadata for the dataset, no example is read.
    fn info(&self, name: &str) -> Result<DatasetInfo>;

    fn load(&self, name: &str, instruction: &ReadInstruction) -> Result<ExampleStream>;
}

impl<C: Catalog + ?Sized> Catalog for std::sync::Arc<C> {
    fn info(&self, name: &str) -> Result<DatasetInfo> {
        (**self).info(name)
    }

    fn load(&self, name: &str, instruction: &ReadInstruction) -> Result<ExampleStream> {
        (**self).load(name, instruction)
    }
}

/// A catalog holding every example in memory. Tensors are reference counted so loading a
/// partition does not copy pixel data.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    datasets: BTreeMap<String, BTreeMap<String, Vec<RawExample>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<N: Into<String>, P: Into<String>>(
        &mut self,
        name: N,
        partition: P,
        examples: Vec<RawExample>,
    ) {
        self.datasets
            .entry(name.into())
            .or_default()
            .insert(partition.into(), examples);
    }

    fn partitions(&self, name: &str) -> Result<&BTreeMap<String, Vec<RawExample>>> {
        self.datasets
            .get(name)
            .ok_or_else(|| Error::DatasetNotFound(name.to_string()))
    }
}

impl Catalog for MemoryCatalog {
    fn info(&self, name: &str) -> Result<DatasetInfo> {
        let partitions = self
            .partitions(name)?
            .iter()
            .map(|(partition, examples)| (partition.clone(), examples.len()))
            .collect();
        Ok(DatasetInfo {
            name: name.to_string(),
            partitions,
        })
    }

    fn load(&self, name: &str, instruction: &ReadInstruction) -> Result<ExampleStream> {
        let examples =
            self.partitions(name)?
                .get(&instruction.partition)
                .ok_or_else(|| Error::UnknownPartition {
                    dataset: name.to_string(),
                    partition: instruction.partition.clone(),
                })?;
        let range = instruction.range.resolve(examples.len())?;
        let examples = examples[range].to_vec();
        Ok(Box::new(examples.into_iter().map(Ok::<_, Error>)))
    }
}
