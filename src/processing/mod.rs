// Text processing: chunking, lens classification, and importance scoring.

pub mod chunker;
pub mod classifier;
pub mod scoring;
