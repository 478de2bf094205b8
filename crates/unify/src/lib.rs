//! `unicat-unify`: entity resolution and catalog unification engine.
//!
//! Pure engine crate: receives pre-loaded records grouped by collection and
//! source, returns one canonical catalog per collection plus run reports.
//! No CLI or file IO.

pub mod cache;
pub mod classify;
pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod identity;
pub mod input;
pub mod matcher;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod report;
pub mod similarity;
pub mod variants;

pub use cache::KeyCache;
pub use config::UnifyConfig;
pub use delta::{compare, RunDelta};
pub use engine::{run, unify_collection};
pub use error::UnifyError;
pub use model::{CanonicalRecord, CoverageClass, RawRecord, RunReport, UnifyInput, UnifyResult};
pub use normalize::Normalizer;
