use std::sync::{Arc, Mutex};

use candle::{DType, Device, Tensor};
use ub_datasets::vision::svhn::{self, SvhnDataset, SvhnExampleParser};
use ub_datasets::{
    Catalog, DatasetBuilder, DatasetConfig, Error, MemoryCatalog, PreprocessFn, Range, RawExample,
    ReadInstruction, Result, Split,
};
use ub_datasets::catalog::{DatasetInfo, ExampleStream};

// Tiny 1x1 images, the label is the position of the example in its partition.
fn partition(len: usize) -> Result<Vec<RawExample>> {
    (0..len)
        .map(|i| RawExample::from_rgb8(vec![(i % 256) as u8; 3], 1, 1, i as i64))
        .collect()
}

fn catalog(num_train: usize, num_test: usize) -> Result<MemoryCatalog> {
    let mut catalog = MemoryCatalog::new();
    catalog.insert(svhn::NAME, "train", partition(num_train)?);
    catalog.insert(svhn::NAME, "test", partition(num_test)?);
    Ok(catalog)
}

fn labels(dataset: &SvhnDataset<MemoryCatalog>, split: Split) -> Result<Vec<i64>> {
    dataset
        .read_examples(split)?
        .map(|e| e.map(|e| e.label))
        .collect()
}

#[test]
fn split_sizes() -> Result<()> {
    let dataset = SvhnDataset::new(catalog(50_010, 7)?, DatasetConfig::new(32, 64))?;
    assert_eq!(dataset.name(), "svhn_cropped");
    assert_eq!(dataset.num_examples(Split::Train), 50_000);
    assert_eq!(dataset.num_examples(Split::Validation), 10);
    assert_eq!(dataset.num_examples(Split::Test), 7);
    assert_eq!(dataset.read_examples(Split::Train)?.count(), 50_000);
    assert_eq!(dataset.read_examples(Split::Validation)?.count(), 10);
    assert_eq!(dataset.read_examples(Split::Test)?.count(), 7);
    Ok(())
}

#[test]
fn train_and_validation_rebuild_the_train_partition() -> Result<()> {
    let dataset = SvhnDataset::new(catalog(50_010, 3)?, DatasetConfig::new(32, 64))?;
    let mut all = labels(&dataset, Split::Train)?;
    let validation = labels(&dataset, Split::Validation)?;
    assert_eq!(validation, (50_000..50_010).collect::<Vec<_>>());
    all.extend(validation);
    assert_eq!(all, (0..50_010).collect::<Vec<_>>());
    assert_eq!(labels(&dataset, Split::Test)?, [0, 1, 2]);
    Ok(())
}

#[test]
fn no_validation_examples() -> Result<()> {
    let dataset = SvhnDataset::new(catalog(50_000, 1)?, DatasetConfig::new(32, 64))?;
    assert_eq!(dataset.num_examples(Split::Validation), 0);
    assert_eq!(dataset.read_examples(Split::Train)?.count(), 50_000);
    assert_eq!(dataset.read_examples(Split::Validation)?.count(), 0);
    Ok(())
}

#[test]
fn not_enough_train_examples() -> Result<()> {
    let err = SvhnDataset::new(catalog(49_999, 1)?, DatasetConfig::new(32, 64))
        .err()
        .expect("a train partition below 50000 examples is rejected");
    match err {
        Error::NotEnoughExamples {
            available,
            required,
            ..
        } => {
            assert_eq!(available, 49_999);
            assert_eq!(required, 50_000);
        }
        err => panic!("unexpected error {err}"),
    }
    Ok(())
}

#[test]
fn catalog_failures_propagate() -> Result<()> {
    let err = SvhnDataset::new(MemoryCatalog::new(), DatasetConfig::new(32, 64)).err();
    assert!(matches!(err, Some(Error::DatasetNotFound(_))));

    let mut catalog = MemoryCatalog::new();
    catalog.insert(svhn::NAME, "train", partition(50_001)?);
    let err = SvhnDataset::new(catalog, DatasetConfig::new(32, 64)).err();
    assert!(matches!(err, Some(Error::UnknownPartition { .. })));

    let err = SvhnDataset::new(catalog_arc()?, DatasetConfig::new(0, 64)).err();
    assert!(matches!(err, Some(Error::InvalidConfig(_))));
    Ok(())
}

fn catalog_arc() -> Result<Arc<MemoryCatalog>> {
    Ok(Arc::new(catalog(50_001, 1)?))
}

#[test]
fn shared_catalog() -> Result<()> {
    let catalog = catalog_arc()?;
    let first = SvhnDataset::new(catalog.clone(), DatasetConfig::new(32, 64))?;
    let second = SvhnDataset::new(catalog, DatasetConfig::new(16, 16))?;
    assert_eq!(first.sizes(), second.sizes());
    Ok(())
}

// A catalog whose content can change after the dataset has been built on top of it.
#[derive(Clone)]
struct SharedCatalog(Arc<Mutex<MemoryCatalog>>);

impl Catalog for SharedCatalog {
    fn info(&self, name: &str) -> Result<DatasetInfo> {
        self.0.lock().unwrap().info(name)
    }

    fn load(&self, name: &str, instruction: &ReadInstruction) -> Result<ExampleStream> {
        self.0.lock().unwrap().load(name, instruction)
    }
}

#[test]
fn split_ranges_are_frozen_at_construction() -> Result<()> {
    let shared = SharedCatalog(Arc::new(Mutex::new(catalog(50_010, 3)?)));
    let dataset = SvhnDataset::new(shared.clone(), DatasetConfig::new(32, 64))?;
    assert_eq!(
        dataset.read_instruction(Split::Train),
        ReadInstruction::new("train", Range::First(50_000))
    );
    assert_eq!(
        dataset.read_instruction(Split::Validation),
        ReadInstruction::new("train", Range::Between(50_000, 50_010))
    );
    assert_eq!(
        dataset.read_instruction(Split::Test),
        ReadInstruction::new("test", Range::First(3))
    );

    shared
        .0
        .lock()
        .unwrap()
        .insert(svhn::NAME, "train", partition(50_020)?);
    shared
        .0
        .lock()
        .unwrap()
        .insert(svhn::NAME, "test", partition(5)?);

    let train = dataset
        .read_examples(Split::Train)?
        .map(|e| e.map(|e| e.label))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(train, (0..50_000).collect::<Vec<_>>());
    let validation = dataset
        .read_examples(Split::Validation)?
        .map(|e| e.map(|e| e.label))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(validation, (50_000..50_010).collect::<Vec<_>>());
    assert_eq!(dataset.read_examples(Split::Test)?.count(), 3);
    assert_eq!(dataset.num_examples(Split::Train), 50_000);
    assert_eq!(dataset.num_examples(Split::Validation), 10);
    assert_eq!(dataset.num_examples(Split::Test), 3);
    Ok(())
}

#[test]
fn invalid_split() {
    let err = "extra".parse::<Split>().unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(err.to_string().contains("extra"));
}

#[test]
fn scale_to_unit_interval() -> Result<()> {
    let parser = SvhnExampleParser::new(false);
    let example = RawExample::from_rgb8(vec![0, 255, 51, 255, 0, 102], 1, 2, 4)?;
    let processed = parser.process(example.clone())?;
    assert_eq!(processed.features.dims(), [1, 2, 3]);
    assert_eq!(processed.features.dtype(), DType::F32);
    let values = processed.features.flatten_all()?.to_vec1::<f32>()?;
    let expected = [0., 1., 0.2, 1., 0., 0.4];
    for (v, e) in values.iter().zip(expected) {
        assert!((v - e).abs() < 1e-6, "{values:?}");
    }
    assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    assert_eq!(processed.labels, 4);
    assert_eq!(parser.process(example)?.labels, 4);
    Ok(())
}

#[test]
fn cifar_normalization_is_channel_aligned() -> Result<()> {
    let features = Tensor::new(&svhn::CIFAR_MEAN, &Device::Cpu)?
        .reshape((1, 1, 3))?
        .broadcast_as((2, 2, 3))?
        .contiguous()?;
    let normalized = SvhnExampleParser::cifar_normalize(&features)?;
    let values = normalized.flatten_all()?.to_vec1::<f32>()?;
    assert!(values.iter().all(|v| v.abs() < 1e-6), "{values:?}");

    // A pixel at 255 ends up at (1 - mean) / std on each channel.
    let parser = SvhnExampleParser::new(true);
    let processed = parser.process(RawExample::from_rgb8(vec![255; 3], 1, 1, 0)?)?;
    let values = processed.features.flatten_all()?.to_vec1::<f32>()?;
    for c in 0..3 {
        let expected = (1.0 - svhn::CIFAR_MEAN[c]) / svhn::CIFAR_STD[c];
        assert!((values[c] - expected).abs() < 1e-5, "{values:?}");
    }
    Ok(())
}

#[test]
fn process_fn_ignores_split() -> Result<()> {
    let config = DatasetConfig::new(32, 64).with_normalize_by_cifar(true);
    let dataset = SvhnDataset::new(catalog(50_001, 1)?, config)?;
    for split in Split::ALL {
        let parser = dataset.create_process_example_fn(split);
        assert!(parser.normalize_by_cifar());
        let processed = parser.process(RawExample::from_rgb8(vec![9, 8, 7], 1, 1, 3)?)?;
        let tensors = processed.into_tensors()?;
        let mut keys = tensors.keys().copied().collect::<Vec<_>>();
        keys.sort_unstable();
        assert_eq!(keys, ["features", "labels"]);
    }
    Ok(())
}

#[test]
fn label_out_of_range() -> Result<()> {
    let example = RawExample::from_rgb8(vec![0; 3], 1, 1, i64::MAX)?;
    let err = SvhnExampleParser::new(false).process(example).err();
    assert!(matches!(err, Some(Error::InvalidExample(_))));
    Ok(())
}

#[test]
fn load_train_batches() -> Result<()> {
    let config = DatasetConfig::new(3_000, 4).with_seed(42);
    let dataset = SvhnDataset::new(catalog(50_010, 7)?, config)?;
    let mut labels = vec![];
    let mut num_batches = 0;
    for batch in dataset.load(Split::Train)? {
        let batch = batch?;
        assert_eq!(batch.features.dims(), [3_000, 1, 1, 3]);
        assert_eq!(batch.labels.dims(), [3_000]);
        labels.extend(batch.labels.to_vec1::<i64>()?);
        num_batches += 1;
    }
    // The last 2000 examples do not fill a batch and are dropped.
    assert_eq!(num_batches, 16);
    assert_eq!(labels.len(), 48_000);
    assert_ne!(labels, (0..48_000).collect::<Vec<_>>());
    labels.sort_unstable();
    labels.dedup();
    assert_eq!(labels.len(), 48_000);
    assert!(labels.iter().all(|&l| l < 50_000));
    Ok(())
}

#[test]
fn load_eval_batches() -> Result<()> {
    let config = DatasetConfig::new(3_000, 4).with_num_parallel_parser_calls(3);
    let dataset = SvhnDataset::new(catalog(50_010, 7)?, config)?;

    let batches = dataset.load(Split::Validation)?.collect::<Result<Vec<_>>>()?;
    assert_eq!(batches.iter().map(|b| b.len()).collect::<Vec<_>>(), [4, 4, 2]);
    let labels = batches
        .iter()
        .map(|b| b.labels.to_vec1::<i64>())
        .collect::<candle::Result<Vec<_>>>()?
        .concat();
    assert_eq!(labels, (50_000..50_010).collect::<Vec<_>>());

    let batches = dataset.load(Split::Test)?.collect::<Result<Vec<_>>>()?;
    assert_eq!(batches.iter().map(|b| b.len()).collect::<Vec<_>>(), [4, 3]);
    assert_eq!(batches[1].features.dims(), [3, 1, 1, 3]);
    Ok(())
}
