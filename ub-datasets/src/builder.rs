//! The generic part of a dataset builder: shuffling, parallel preprocessing and batching.
//!
//! A concrete dataset only has to say how many examples each split holds, where the raw
//! examples of a split come from and how to turn a raw example into model inputs. The
//! [`DatasetBuilder::load`] method then assembles the pipeline
//! `read -> shuffle (train only) -> parallel preprocess -> batch`.
use std::collections::HashMap;

use candle::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::batcher::Batcher;
use crate::catalog::{ExampleStream, RawExample};
use crate::{DatasetConfig, Result, Split};

pub const FEATURES_KEY: &str = "features";
pub const LABELS_KEY: &str = "labels";

/// A preprocessed example, ready to be batched.
#[derive(Debug, Clone)]
pub struct ProcessedExample {
    /// `f32` pixels.
    pub features: Tensor,
    pub labels: i32,
}

impl ProcessedExample {
    /// The example as a `features`/`labels` tensor map, the labels being an `i64` scalar.
    pub fn into_tensors(self) -> Result<HashMap<&'static str, Tensor>> {
        let labels = Tensor::new(self.labels as i64, self.features.device())?;
        Ok(HashMap::from([
            (FEATURES_KEY, self.features),
            (LABELS_KEY, labels),
        ]))
    }
}

/// Turns raw examples into model inputs. Implementations must be pure so that they can be
/// applied to many examples concurrently.
pub trait PreprocessFn: Send + Sync {
    fn process(&self, example: RawExample) -> Result<ProcessedExample>;
}

impl<F> PreprocessFn for F
where
    F: Fn(RawExample) -> Result<ProcessedExample> + Send + Sync,
{
    fn process(&self, example: RawExample) -> Result<ProcessedExample> {
        self(example)
    }
}

/// Number of examples in each split, fixed when the builder is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSizes {
    pub name: String,
    pub num_train_examples: usize,
    pub num_validation_examples: usize,
    pub num_test_examples: usize,
}

impl SplitSizes {
    pub fn num_examples(&self, split: Split) -> usize {
        match split {
            Split::Train => self.num_train_examples,
            Split::Validation => self.num_validation_examples,
            Split::Test => self.num_test_examples,
        }
    }
}

pub type ProcessedStream = Box<dyn Iterator<Item = Result<ProcessedExample>>>;

pub trait DatasetBuilder {
    type Preprocess: PreprocessFn + 'static;

    fn sizes(&self) -> &SplitSizes;

    fn config(&self) -> &DatasetConfig;

    /// The raw examples of a split, in catalog order.
    fn read_examples(&self, split: Split) -> Result<ExampleStream>;

    fn create_process_example_fn(&self, split: Split) -> Self::Preprocess;

    fn name(&self) -> &str {
        &self.sizes().name
    }

    fn num_examples(&self, split: Split) -> usize {
        self.sizes().num_examples(split)
    }

    fn batch_size(&self, split: Split) -> usize {
        if split.is_training() {
            self.config().batch_size
        } else {
            self.config().eval_batch_size
        }
    }

    /// Batched and preprocessed examples for a single pass over `split`. The training split is
    /// shuffled and its last incomplete batch is dropped, evaluation splits keep their last
    /// incomplete batch.
    ///
    /// When reading or preprocessing an example fails, the error is yielded in place of the
    /// batch holding that example and the other examples of that batch are dropped. Iteration
    /// can go on with the next batch.
    fn load(&self, split: Split) -> Result<Batcher<ProcessedStream>> {
        let config = self.config();
        let examples = self.read_examples(split)?;
        let examples: ExampleStream = if split.is_training() {
            let buffer_size = config
                .shuffle_buffer_size
                .unwrap_or(self.sizes().num_train_examples)
                .max(1);
            let rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            Box::new(ShuffleBuffer::new(examples, buffer_size, rng))
        } else {
            examples
        };
        let preprocess = self.create_process_example_fn(split);
        let processed: ProcessedStream = Box::new(ParallelMap::new(
            examples,
            preprocess,
            config.num_parallel_parser_calls,
        ));
        let batch_size = self.batch_size(split);
        tracing::debug!(
            dataset = self.name(),
            %split,
            batch_size,
            num_examples = self.num_examples(split),
            "loading split"
        );
        Ok(Batcher::new(processed)
            .batch_size(batch_size)
            .return_last_incomplete_batch(!split.is_training()))
    }
}

/// Shuffles a stream with a fixed size buffer: the buffer is filled first, then each
/// yielded element is picked at random in the buffer and replaced by the next input.
pub struct ShuffleBuffer<I, R> {
    inner: I,
    buffer: Vec<RawExample>,
    buffer_size: usize,
    rng: R,
}

impl<I, R> ShuffleBuffer<I, R> {
    pub fn new(inner: I, buffer_size: usize, rng: R) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(buffer_size.min(1 << 16)),
            buffer_size,
            rng,
        }
    }
}

impl<I, R> Iterator for ShuffleBuffer<I, R>
where
    I: Iterator<Item = Result<RawExample>>,
    R: Rng,
{
    type Item = Result<RawExample>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.len() < self.buffer_size {
            match self.inner.next() {
                Some(Ok(example)) => self.buffer.push(example),
                Some(Err(err)) => return Some(Err(err)),
                None => break,
            }
        }
        if self.buffer.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.buffer.len());
        Some(Ok(self.buffer.swap_remove(index)))
    }
}

/// Applies a preprocess function on the rayon thread pool, at most `num_parallel_calls`
/// examples at a time. Results are yielded in input order.
pub struct ParallelMap<I, F> {
    inner: I,
    preprocess: F,
    num_parallel_calls: usize,
    ready: std::collections::VecDeque<Result<ProcessedExample>>,
}

impl<I, F> ParallelMap<I, F> {
    pub fn new(inner: I, preprocess: F, num_parallel_calls: usize) -> Self {
        Self {
            inner,
            preprocess,
            num_parallel_calls: num_parallel_calls.max(1),
            ready: std::collections::VecDeque::new(),
        }
    }
}

impl<I, F> Iterator for ParallelMap<I, F>
where
    I: Iterator<Item = Result<RawExample>>,
    F: PreprocessFn,
{
    type Item = Result<ProcessedExample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ready.is_empty() {
            let chunk = self
                .inner
                .by_ref()
                .take(self.num_parallel_calls)
                .collect::<Vec<_>>();
            if chunk.is_empty() {
                return None;
            }
            let preprocess = &self.preprocess;
            let processed = chunk
                .into_par_iter()
                .map(|example| example.and_then(|example| preprocess.process(example)))
                .collect::<Vec<_>>();
            self.ready.extend(processed);
        }
        self.ready.pop_front()
    }
}
