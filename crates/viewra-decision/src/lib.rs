//! # Viewra Decision Engine
//!
//! Chooses, per playback request, whether to direct-play the source or
//! transcode it, and computes the concrete encoder parameter set from source
//! analysis, device capability, and bandwidth. The engine itself is a pure
//! function; the prober shells out to analyse sources when the caller did
//! not supply a probe.

pub mod engine;
pub mod prober;

pub use engine::{decide, PlaybackDecision};
pub use prober::MediaProber;
