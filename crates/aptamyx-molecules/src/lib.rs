//! Aptamyx Molecules - Aptamer candidate generation and ranking pipeline.
//!
//! Stages, in data-flow order:
//! 1. Generating random DNA candidates
//! 2. Folding (secondary structure + MFE), optionally SimRNA 3-D models
//! 3. Estimating binding affinity against a target structure
//! 4. Scoring and ranking with an in-batch random forest
//!
//! Candidates are joined across stages on their sequence.

pub mod sequence;
pub mod generate;
pub mod fold;
pub mod tool;
pub mod workdir;
pub mod pdb;
pub mod structure;
pub mod docking;
pub mod forest;
pub mod scoring;
pub mod table;
pub mod pipeline;

pub use aptamyx_common::Result;
