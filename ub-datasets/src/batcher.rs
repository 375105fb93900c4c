use candle::{Device, Tensor};

use crate::builder::ProcessedExample;
use crate::Result;

/// A batch of preprocessed examples.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `f32` features with shape `(batch, height, width, channels)`.
    pub features: Tensor,
    /// `i64` labels with shape `(batch,)`.
    pub labels: Tensor,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.elem_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Batcher<I> {
    inner: I,
    batch_size: usize,
    return_last_incomplete_batch: bool,
}

impl<I> Batcher<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            batch_size: 16,
            return_last_incomplete_batch: false,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn return_last_incomplete_batch(mut self, r: bool) -> Self {
        self.return_last_incomplete_batch = r;
        self
    }
}

impl<I: Iterator<Item = Result<ProcessedExample>>> Iterator for Batcher<I> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut xs = Vec::with_capacity(self.batch_size);
        let mut ys = Vec::with_capacity(self.batch_size);
        let mut errs = vec![];
        for _i in 0..self.batch_size {
            match self.inner.next() {
                Some(Ok(ProcessedExample { features, labels })) => {
                    xs.push(features);
                    ys.push(labels as i64)
                }
                Some(Err(err)) => errs.push(err),
                None => {
                    if self.return_last_incomplete_batch && !xs.is_empty() {
                        break;
                    }
                    if !errs.is_empty() {
                        break;
                    }
                    return None;
                }
            }
        }
        if !errs.is_empty() {
            return Some(Err(errs.swap_remove(0)));
        }
        tracing::trace!(batch_size = xs.len(), "batch");
        Some(stack(&xs, ys))
    }
}

fn stack(xs: &[Tensor], ys: Vec<i64>) -> Result<Batch> {
    let features = Tensor::stack(xs, 0)?;
    let labels = Tensor::from_vec(ys, xs.len(), &Device::Cpu)?;
    Ok(Batch { features, labels })
}
