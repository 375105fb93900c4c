use anyhow::Result;
use clap::Parser;

use ub_datasets::vision::SvhnDataset;
use ub_datasets::{DatasetBuilder, DatasetConfig, Split};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The split to iterate over: train, validation or test.
    #[arg(long, default_value = "validation")]
    split: String,

    #[arg(long, default_value_t = 128)]
    batch_size: usize,

    #[arg(long, default_value_t = 512)]
    eval_batch_size: usize,

    #[arg(long)]
    shuffle_buffer_size: Option<usize>,

    #[arg(long, default_value_t = 64)]
    num_parallel_parser_calls: usize,

    /// Directory used as the hub cache.
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    #[arg(long)]
    normalize_by_cifar: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many batches.
    #[arg(long)]
    max_batches: Option<usize>,

    /// Enable tracing (generates a trace-timestamp.json file).
    #[arg(long)]
    tracing: bool,
}

fn main() -> Result<()> {
    use tracing_chrome::ChromeLayerBuilder;
    use tracing_subscriber::prelude::*;

    let args = Args::parse();
    let _guard = if args.tracing {
        let (chrome_layer, guard) = ChromeLayerBuilder::new().build();
        tracing_subscriber::registry().with(chrome_layer).init();
        Some(guard)
    } else {
        tracing_subscriber::fmt::init();
        None
    };

    let split: Split = args.split.parse()?;
    let mut config = DatasetConfig::new(args.batch_size, args.eval_batch_size)
        .with_num_parallel_parser_calls(args.num_parallel_parser_calls)
        .with_normalize_by_cifar(args.normalize_by_cifar);
    if let Some(shuffle_buffer_size) = args.shuffle_buffer_size {
        config = config.with_shuffle_buffer_size(shuffle_buffer_size)
    }
    if let Some(data_dir) = args.data_dir {
        config = config.with_data_dir(data_dir)
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed)
    }

    let dataset = SvhnDataset::from_hub(config)?;
    println!(
        "{}: train {}, validation {}, test {}",
        dataset.name(),
        dataset.num_examples(Split::Train),
        dataset.num_examples(Split::Validation),
        dataset.num_examples(Split::Test),
    );

    let start = std::time::Instant::now();
    let mut histogram = [0usize; 10];
    let mut num_examples = 0;
    let batches = dataset.load(split)?;
    for (index, batch) in batches.enumerate() {
        if args.max_batches.is_some_and(|max| index >= max) {
            break;
        }
        let batch = batch?;
        for label in batch.labels.to_vec1::<i64>()? {
            if let Some(count) = usize::try_from(label).ok().and_then(|l| histogram.get_mut(l)) {
                *count += 1
            }
        }
        num_examples += batch.len();
        let features = batch.features.flatten_all()?;
        let min = features.min(0)?.to_scalar::<f32>()?;
        let max = features.max(0)?.to_scalar::<f32>()?;
        println!(
            "batch {index}: features {:?} in [{min:.3}, {max:.3}]",
            batch.features.shape()
        );
    }
    println!(
        "{split}: {num_examples} examples in {:.2}s",
        start.elapsed().as_secs_f32()
    );
    println!("label histogram: {histogram:?}");
    Ok(())
}
