//! Audio to editable raw image conversion.
//!
//! [`ForwardConverter`] splits a wav file into overlapping windowed frames, one STFT frame per
//! scanline, and stores each bin as a 16-bit RGB pixel (phase in R/B, companded magnitude in G).
//! [`BackwardConverter`] reads the (possibly edited) images back and overlap-adds them into a
//! 32-bit float wav.

pub mod codec;
pub mod collections;
pub mod error;
pub mod math;

pub use codec::{
    BackwardConverter, ConverterSettings, EncodeSummary, ForwardConverter, ImageFileHeader,
    RawImageLayout,
};
pub use error::{Error, Result};
pub use math::{CompandingMethod, WindowShape};
