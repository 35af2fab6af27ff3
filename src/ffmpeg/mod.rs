//! FFmpeg subprocess plumbing.
//!
//! # Architecture
//!
//! * `commands`: Builder for the continuous capture-encode invocation
//!   (raw BGRA on stdin, segmented output on disk).
//! * `encoder`: Codec/vendor to encoder-name mapping plus the per-encoder
//!   rate-control argument shapes.
//! * `session`: The live encoder child process: spawning, the frame
//!   writer that drains the frame channel into stdin, stderr telemetry,
//!   and graceful shutdown.
//! * `utils`: Binary resolution and shared helpers.

pub mod commands;
pub mod encoder;
pub mod session;
pub mod utils;
