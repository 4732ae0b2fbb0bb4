//! Error type shared by every stage of the converter.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// header (de)serialization failed
    #[error("header encoding error: {0}")]
    Header(#[from] bincode::Error),

    #[error("fft error: {0}")]
    Fft(#[from] realfft::FftError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// the audio source could not be parsed
    #[error("invalid wav file: {0}")]
    InvalidWav(String),

    #[error("unsupported bit depth: {0} bits per sample")]
    UnsupportedBitDepth(u16),

    #[error("only mono and stereo files are supported, got {0} channels")]
    UnsupportedChannelCount(u16),

    #[error("block size must be a power of two and at least 4, got {0}")]
    InvalidBlockSize(u32),

    #[error("unknown companding method id {0}")]
    UnknownCompandingMethod(u32),

    #[error("unknown companding method name '{0}'")]
    UnknownCompandingName(String),

    /// the encoded image is corrupt or was not produced by this crate
    #[error("invalid encoded image: {0}")]
    InvalidImage(String),

    #[error("header of '{}' does not match the first channel", .0.display())]
    HeaderMismatch(PathBuf),

    #[error("found {files} channel files but the header records {channels} channels")]
    ChannelCountMismatch { files: usize, channels: u16 },

    #[error("no encoded channel files found for '{}'", .0.display())]
    NoInputFiles(PathBuf),

    #[error("'{}' already exists (set force_overwrite to replace it)", .0.display())]
    OutputExists(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("a worker thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, Error>;
