/// Main library error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid dataset config: {0}")]
    InvalidConfig(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("dataset {dataset} has no partition named {partition}")]
    UnknownPartition { dataset: String, partition: String },

    #[error(
        "dataset {dataset} reports {available} examples in partition {partition}, at least {required} are required"
    )]
    NotEnoughExamples {
        dataset: String,
        partition: String,
        available: usize,
        required: usize,
    },

    #[error("invalid example: {0}")]
    InvalidExample(String),

    #[error(transparent)]
    Candle(#[from] candle::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "hub")]
    #[error("ApiError : {0}")]
    ApiError(#[from] hf_hub::api::sync::ApiError),

    #[cfg(feature = "hub")]
    #[error("ParquetError : {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    #[cfg(feature = "hub")]
    #[error("ImageError : {0}")]
    ImageError(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;

macro_rules! bail_invalid {
    ($msg:literal $(,)?) => {
        return Err($crate::Error::InvalidArgument(format!($msg)))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::Error::InvalidArgument(format!($fmt, $($arg)*)))
    };
}
pub(crate) use bail_invalid;
