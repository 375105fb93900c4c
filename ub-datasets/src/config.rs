use std::path::PathBuf;

use crate::{Error, Result};

fn default_num_parallel_parser_calls() -> usize {
    64
}

/// Construction-time parameters shared by every dataset builder.
///
/// Once a builder has been created from a config, the config is never mutated.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct DatasetConfig {
    /// The training batch size.
    pub batch_size: usize,
    /// The validation and test batch size.
    pub eval_batch_size: usize,
    /// Number of examples kept in the shuffle buffer, defaults to the number of training
    /// examples when unset.
    #[serde(default)]
    pub shuffle_buffer_size: Option<usize>,
    /// Maximum number of examples preprocessed concurrently.
    #[serde(default = "default_num_parallel_parser_calls")]
    pub num_parallel_parser_calls: usize,
    /// Optional directory used to store the downloaded data, the default cache is used if none.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Normalize each image by the CIFAR mean and stddev.
    #[serde(default)]
    pub normalize_by_cifar: bool,
    /// Seed for the shuffle buffer, shuffling is not reproducible when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl DatasetConfig {
    pub fn new(batch_size: usize, eval_batch_size: usize) -> Self {
        Self {
            batch_size,
            eval_batch_size,
            shuffle_buffer_size: None,
            num_parallel_parser_calls: default_num_parallel_parser_calls(),
            data_dir: None,
            normalize_by_cifar: false,
            seed: None,
        }
    }

    pub fn with_shuffle_buffer_size(mut self, shuffle_buffer_size: usize) -> Self {
        self.shuffle_buffer_size = Some(shuffle_buffer_size);
        self
    }

    pub fn with_num_parallel_parser_calls(mut self, num_parallel_parser_calls: usize) -> Self {
        self.num_parallel_parser_calls = num_parallel_parser_calls;
        self
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, data_dir: P) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_normalize_by_cifar(mut self, normalize_by_cifar: bool) -> Self {
        self.normalize_by_cifar = normalize_by_cifar;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".to_string()));
        }
        if self.eval_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "eval_batch_size must be positive".to_string(),
            ));
        }
        if self.num_parallel_parser_calls == 0 {
            return Err(Error::InvalidConfig(
                "num_parallel_parser_calls must be positive".to_string(),
            ));
        }
        if self.shuffle_buffer_size == Some(0) {
            return Err(Error::InvalidConfig(
                "shuffle_buffer_size must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}
