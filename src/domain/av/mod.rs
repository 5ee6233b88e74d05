//! Media processing through an external ffmpeg binary.

pub mod ffmpeg;
pub mod transcoder;

pub use transcoder::{BatchFailure, BatchReport, Transcoder, TranscoderConfig, CANONICAL_EXTENSION};
