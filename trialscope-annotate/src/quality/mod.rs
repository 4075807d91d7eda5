//! Two-tier quality scoring
//!
//! - **weights** - source and per-task field weight tables, owned by `WeightStore`
//! - **scorer** - source score, field scores and their bands

pub mod scorer;
pub mod weights;

pub use scorer::{score, score_field, score_sources, QualityBand, QualityScore};
pub use weights::{
    AnnotationTask, FieldWeightTable, SourceWeightTable, WeightSnapshot, WeightStore, WeightTable,
};
