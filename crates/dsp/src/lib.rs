//! DSP building blocks for the receiver.
//!
//! [`receiver::Receiver`] wires the individual stages into the full
//! chain; the stage modules are public so tools can use them directly.

pub mod agc;
pub mod decimate;
pub mod demod;
pub mod filter;
pub mod meter;
pub mod receiver;
pub mod resample;
pub mod spectrum;
pub mod translate;

pub use demod::DemodMode;
pub use receiver::Receiver;
pub use spectrum::SPECTRUM_BINS;
