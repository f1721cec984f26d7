//! # Spotforge Pipeline
//!
//! The production pipeline and musical alignment engine: a durable job
//! queue with bounded worker pools, the bar/beat timing model, the
//! sentence-timing extractor, the musical blueprint builder, the bed
//! analyzer and voice-to-music aligner, the ffmpeg toolchain adapter, and
//! the orchestrator that drives a production from prompt to finished ad.

pub mod audio;
pub mod db;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod queue;
pub mod runtime;
pub mod services;
pub mod workers;
