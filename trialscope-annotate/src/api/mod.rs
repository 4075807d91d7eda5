//! HTTP API handlers for trialscope

pub mod annotate;
pub mod health;
pub mod sse;
pub mod weights;

pub use annotate::annotate_routes;
pub use health::health_routes;
pub use sse::event_stream;
pub use weights::weight_routes;
