pub mod extractor;
#[allow(clippy::module_inception)]
pub mod utils;
