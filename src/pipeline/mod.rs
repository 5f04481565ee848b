pub mod engine;
pub mod extractor;
pub mod face;
pub mod similarity;
