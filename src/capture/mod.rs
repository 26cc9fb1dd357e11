//! Capture windows on the responder's side
//!
//! A window samples the local camera on a fixed cadence, classifies each
//! frame, and hands the accumulated samples back for aggregation.

mod classifier;
mod window;

pub use classifier::{Classification, EmotionClassifier, NatsClassifier};
pub use window::{CaptureEvent, CaptureOutcome, CaptureWindow};
