//! Confidence estimation and calibration.
//!
//! [`scoring`] turns statistical properties of the input data into a raw
//! confidence score; [`calibration`] corrects that score against the
//! accuracy historically observed for its confidence range.

pub mod calibration;
pub mod scoring;

pub use calibration::{
    brier_score, calibrate_confidence, calibrate_from_store, calibrate_with, CalibrationBucket,
    CalibrationOutcome, CalibrationReport, CalibrationResult, CalibrationStore, CalibrationTable,
    InMemoryCalibrationStore,
};
pub use scoring::{
    calculate_confidence, calculate_full_confidence, AccuracyObservation, ConfidenceFactors,
    ConfidenceParams, ConfidenceResult, ConfidenceWeights, SampleMetric,
};
