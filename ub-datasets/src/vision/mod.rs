pub mod svhn;

pub use svhn::{SvhnDataset, SvhnExampleParser};
