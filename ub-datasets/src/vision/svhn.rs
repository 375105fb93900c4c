//! The Street View House Numbers dataset, cropped digits variant.
//!
//! <http://ufldl.stanford.edu/housenumbers/>
//!
//! The first 50000 examples of the catalog `train` partition are used for training and the
//! rest of it for validation. The catalog `test` partition is used as is.
use candle::{DType, Tensor};

use crate::builder::{DatasetBuilder, PreprocessFn, ProcessedExample, SplitSizes};
use crate::catalog::{Catalog, ExampleStream, RawExample, Range, ReadInstruction};
use crate::{DatasetConfig, Error, Result, Split};

pub const NAME: &str = "svhn_cropped";
pub const NUM_TRAIN_EXAMPLES: usize = 50_000;
pub const CIFAR_MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];
pub const CIFAR_STD: [f32; 3] = [0.2023, 0.1994, 0.2010];

pub struct SvhnDataset<C> {
    catalog: C,
    config: DatasetConfig,
    sizes: SplitSizes,
}

impl<C: Catalog> SvhnDataset<C> {
    /// Creates the builder, only the catalog metadata is read at this point.
    pub fn new(catalog: C, config: DatasetConfig) -> Result<Self> {
        config.validate()?;
        let info = catalog.info(NAME)?;
        let train_total = info.num_examples("train")?;
        let num_validation_examples =
            train_total
                .checked_sub(NUM_TRAIN_EXAMPLES)
                .ok_or_else(|| Error::NotEnoughExamples {
                    dataset: NAME.to_string(),
                    partition: "train".to_string(),
                    available: train_total,
                    required: NUM_TRAIN_EXAMPLES,
                })?;
        let sizes = SplitSizes {
            name: NAME.to_string(),
            num_train_examples: NUM_TRAIN_EXAMPLES,
            num_validation_examples,
            num_test_examples: info.num_examples("test")?,
        };
        tracing::info!(
            dataset = NAME,
            train = sizes.num_train_examples,
            validation = sizes.num_validation_examples,
            test = sizes.num_test_examples,
            "split sizes"
        );
        Ok(Self {
            catalog,
            config,
            sizes,
        })
    }

    /// The catalog instruction backing a split. Train and validation ranges only depend on the
    /// sizes frozen at construction, not on what the catalog reports later.
    pub fn read_instruction(&self, split: Split) -> ReadInstruction {
        let num_validation_examples = self.sizes.num_validation_examples;
        match split {
            Split::Train => ReadInstruction::new("train", Range::First(NUM_TRAIN_EXAMPLES)),
            Split::Validation => ReadInstruction::new(
                "train",
                Range::Between(
                    NUM_TRAIN_EXAMPLES,
                    NUM_TRAIN_EXAMPLES + num_validation_examples,
                ),
            ),
            Split::Test => {
                ReadInstruction::new("test", Range::First(self.sizes.num_test_examples))
            }
        }
    }
}

#[cfg(feature = "hub")]
impl SvhnDataset<crate::hub::HubCatalog> {
    /// Creates the builder on top of the hugging face hub parquet conversion, `data_dir` is
    /// used as the hub cache when set.
    pub fn from_hub(config: DatasetConfig) -> Result<Self> {
        let catalog = crate::hub::HubCatalog::new(config.data_dir.clone())?;
        Self::new(catalog, config)
    }
}

impl<C: Catalog> DatasetBuilder for SvhnDataset<C> {
    type Preprocess = SvhnExampleParser;

    fn sizes(&self) -> &SplitSizes {
        &self.sizes
    }

    fn config(&self) -> &DatasetConfig {
        &self.config
    }

    fn read_examples(&self, split: Split) -> Result<ExampleStream> {
        let instruction = self.read_instruction(split);
        tracing::debug!(dataset = NAME, %split, %instruction, "reading examples");
        self.catalog.load(NAME, &instruction)
    }

    fn create_process_example_fn(&self, _split: Split) -> SvhnExampleParser {
        SvhnExampleParser::new(self.config.normalize_by_cifar)
    }
}

/// Converts images to `f32` values in `[0, 1]`, optionally normalized by the CIFAR per-channel
/// mean and stddev.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SvhnExampleParser {
    normalize_by_cifar: bool,
}

impl SvhnExampleParser {
    pub fn new(normalize_by_cifar: bool) -> Self {
        Self { normalize_by_cifar }
    }

    pub fn normalize_by_cifar(&self) -> bool {
        self.normalize_by_cifar
    }

    /// Subtracts the CIFAR mean and divides by the CIFAR stddev, `features` being `f32` values
    /// with the channels on the last dimension.
    pub fn cifar_normalize(features: &Tensor) -> Result<Tensor> {
        let device = features.device();
        let mean = Tensor::new(&CIFAR_MEAN, device)?;
        let std = Tensor::new(&CIFAR_STD, device)?;
        Ok(features.broadcast_sub(&mean)?.broadcast_div(&std)?)
    }
}

impl PreprocessFn for SvhnExampleParser {
    fn process(&self, example: RawExample) -> Result<ProcessedExample> {
        let RawExample { image, label } = example;
        let device = image.device();
        let scale = Tensor::new(255f32, device)?;
        let features = image.to_dtype(DType::F32)?.broadcast_div(&scale)?;
        let labels = i32::try_from(label)
            .map_err(|_| Error::InvalidExample(format!("label {label} does not fit in i32")))?;
        let features = if self.normalize_by_cifar {
            Self::cifar_normalize(&features)?
        } else {
            features
        };
        Ok(ProcessedExample { features, labels })
    }
}
