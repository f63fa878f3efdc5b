//! Error taxonomy for readers and writers.
//!
//! Construction problems surface synchronously from `create`; read failures
//! surface from `next_frame`. Errors raised on an acquisition thread are
//! captured there and rethrown from the next caller operation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad parameter shape, mis-paired allocators, unknown extras or keys,
    /// malformed numeric values.
    #[error("{0}")]
    Configuration(String),

    /// The underlying source could not be opened.
    #[error("can't open `{url}`: {reason}")]
    Open { url: String, reason: String },

    /// The source opened but no usable video stream could be set up.
    #[error("{0}")]
    Stream(String),

    /// Unrecoverable failure while reading, decoding or writing.
    #[error("{0}")]
    Runtime(String),

    /// `next_frame` was called again after the end sentinel was consumed.
    #[error("second call on ended stream")]
    UseAfterEnd,
}

impl Error {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub(crate) fn open(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Open {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub(crate) fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime(msg.into())
    }
}
