//! Annotation extraction against controlled vocabularies
//!
//! - **vocab** - the fixed value sets and their sentinels
//! - **normalize** - ordered normalization rules, phase splitting
//! - **extractor** - raw derivation, validation, quality warnings

pub mod extractor;
pub mod normalize;
pub mod vocab;

pub use extractor::{extract, extract_from_response, validate, AnnotationRecord, RawAnnotation};
pub use normalize::{join_phases, normalize, normalize_field, normalize_phases, NormalizationRule};
pub use vocab::{
    Classification, DeliveryMode, FailureReason, Outcome, Phase, StudyStatus, Vocabulary,
};
