//! A catalog backed by the parquet conversion of datasets hosted on the hugging face hub.
//!
//! Each partition of a dataset lives under `{config}/{partition}/*.parquet` in the
//! `refs/convert/parquet` revision of the dataset repo. Rows hold an `image` struct column with
//! the encoded image bytes and an integer `label` column.
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use hf_hub::{
    api::sync::{Api, ApiBuilder, ApiRepo},
    Repo, RepoType,
};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Field, Row};

use crate::catalog::{Catalog, DatasetInfo, ExampleStream, RawExample, ReadInstruction};
use crate::{Error, Result};

const PARQUET_REVISION: &str = "refs/convert/parquet";

/// Where a catalog dataset lives on the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSource {
    pub repo_id: String,
    pub config: String,
    pub partitions: Vec<String>,
}

pub struct HubCatalog {
    api: Api,
    sources: BTreeMap<String, HubSource>,
    // Parquet files per (dataset, partition), listed and downloaded once.
    files: Mutex<BTreeMap<(String, String), Vec<ParquetFile>>>,
}

#[derive(Debug, Clone)]
struct ParquetFile {
    path: PathBuf,
    num_rows: usize,
}

/// The rows `skip..skip + take` of a single parquet file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    path: PathBuf,
    skip: usize,
    take: usize,
}

impl HubCatalog {
    /// Creates a catalog using `cache_dir` for downloads, or the default hub cache.
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self> {
        let api = match cache_dir {
            Some(cache_dir) => ApiBuilder::new().with_cache_dir(cache_dir).build()?,
            None => Api::new()?,
        };
        let mut catalog = Self {
            api,
            sources: BTreeMap::new(),
            files: Mutex::new(BTreeMap::new()),
        };
        catalog.register(
            crate::vision::svhn::NAME,
            "ufldl-stanford/svhn",
            "cropped_digits",
            &["train", "test"],
        );
        Ok(catalog)
    }

    pub fn register(&mut self, name: &str, repo_id: &str, config: &str, partitions: &[&str]) {
        let source = HubSource {
            repo_id: repo_id.to_string(),
            config: config.to_string(),
            partitions: partitions.iter().map(|p| p.to_string()).collect(),
        };
        self.sources.insert(name.to_string(), source);
    }

    fn source(&self, name: &str) -> Result<&HubSource> {
        self.sources
            .get(name)
            .ok_or_else(|| Error::DatasetNotFound(name.to_string()))
    }

    fn repo(&self, source: &HubSource) -> ApiRepo {
        self.api.repo(Repo::with_revision(
            source.repo_id.clone(),
            RepoType::Dataset,
            PARQUET_REVISION.to_string(),
        ))
    }

    /// The parquet files of each requested partition. The repo is only listed for partitions
    /// that have not been resolved yet, and at most once per call.
    fn partition_files(
        &self,
        name: &str,
        partitions: &[String],
    ) -> Result<BTreeMap<String, Vec<ParquetFile>>> {
        let source = self.source(name)?;
        if let Some(partition) = partitions
            .iter()
            .find(|p| !source.partitions.contains(p))
        {
            return Err(Error::UnknownPartition {
                dataset: name.to_string(),
                partition: partition.to_string(),
            });
        }
        let mut cache = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let missing = partitions
            .iter()
            .filter(|p| !cache.contains_key(&(name.to_string(), p.to_string())))
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            let repo = self.repo(source);
            let siblings = repo
                .info()?
                .siblings
                .into_iter()
                .map(|s| s.rfilename)
                .collect::<Vec<_>>();
            for partition in missing {
                let files = download_partition(&repo, name, source, partition, &siblings)?;
                cache.insert((name.to_string(), partition.clone()), files);
            }
        }
        Ok(partitions
            .iter()
            .filter_map(|p| {
                let files = cache.get(&(name.to_string(), p.clone()))?;
                Some((p.clone(), files.clone()))
            })
            .collect())
    }
}

fn download_partition(
    repo: &ApiRepo,
    name: &str,
    source: &HubSource,
    partition: &str,
    siblings: &[String],
) -> Result<Vec<ParquetFile>> {
    let prefix = format!("{}/{partition}/", source.config);
    let mut filenames = siblings
        .iter()
        .filter(|f| f.starts_with(&prefix) && f.ends_with(".parquet"))
        .collect::<Vec<_>>();
    if filenames.is_empty() {
        return Err(Error::UnknownPartition {
            dataset: name.to_string(),
            partition: partition.to_string(),
        });
    }
    filenames.sort();
    filenames
        .into_iter()
        .map(|filename| {
            let path = repo.get(filename)?;
            let reader = SerializedFileReader::new(File::open(&path)?)?;
            let num_rows = reader.metadata().file_metadata().num_rows() as usize;
            tracing::debug!(dataset = name, partition, filename, num_rows, "parquet file");
            Ok(ParquetFile { path, num_rows })
        })
        .collect()
}

impl Catalog for HubCatalog {
    fn info(&self, name: &str) -> Result<DatasetInfo> {
        let source = self.source(name)?;
        let partitions = self
            .partition_files(name, &source.partitions)?
            .into_iter()
            .map(|(partition, files)| {
                let num_rows = files.iter().map(|f| f.num_rows).sum::<usize>();
                (partition, num_rows)
            })
            .collect();
        Ok(DatasetInfo {
            name: name.to_string(),
            partitions,
        })
    }

    fn load(&self, name: &str, instruction: &ReadInstruction) -> Result<ExampleStream> {
        let partition = instruction.partition.clone();
        let files = self
            .partition_files(name, std::slice::from_ref(&partition))?
            .remove(&partition)
            .unwrap_or_default();
        let total = files.iter().map(|f| f.num_rows).sum();
        let range = instruction.range.resolve(total)?;
        let segments = plan_segments(&files, range);
        tracing::debug!(dataset = name, %instruction, segments = segments.len(), "loading");
        let stream = segments
            .into_iter()
            .flat_map(|segment| -> ExampleStream {
                match read_segment(&segment) {
                    Ok(rows) => rows,
                    Err(err) => Box::new(std::iter::once(Err(err))),
                }
            });
        Ok(Box::new(stream))
    }
}

fn plan_segments(files: &[ParquetFile], range: std::ops::Range<usize>) -> Vec<Segment> {
    let mut segments = vec![];
    let mut offset = 0;
    for file in files {
        let (start, end) = (offset, offset + file.num_rows);
        offset = end;
        let lo = range.start.max(start);
        let hi = range.end.min(end);
        if lo < hi {
            segments.push(Segment {
                path: file.path.clone(),
                skip: lo - start,
                take: hi - lo,
            })
        }
    }
    segments
}

fn read_segment(segment: &Segment) -> Result<ExampleStream> {
    let reader = SerializedFileReader::new(File::open(&segment.path)?)?;
    let rows = reader
        .into_iter()
        .skip(segment.skip)
        .take(segment.take)
        .map(|row| row_to_example(&row?));
    Ok(Box::new(rows))
}

fn row_to_example(row: &Row) -> Result<RawExample> {
    let mut pixels = None;
    let mut label = None;
    for (name, field) in row.get_column_iter() {
        match (name.as_str(), field) {
            ("image", Field::Group(subrow)) => {
                for (_name, field) in subrow.get_column_iter() {
                    if let Field::Bytes(value) = field {
                        pixels = Some(image::load_from_memory(value.data())?.to_rgb8());
                    }
                }
            }
            ("label", Field::Long(value)) => label = Some(*value),
            ("label", Field::Int(value)) => label = Some(*value as i64),
            _ => {}
        }
    }
    match (pixels, label) {
        (Some(pixels), Some(label)) => {
            let (width, height) = pixels.dimensions();
            RawExample::from_rgb8(pixels.into_raw(), height as usize, width as usize, label)
        }
        (None, _) => Err(Error::InvalidExample("missing image column".to_string())),
        (_, None) => Err(Error::InvalidExample("missing label column".to_string())),
    }
}
