//! Frame sources behind the uniform reader contract.
//!
//! This module owns backend selection and the facade the rest of the world
//! talks to:
//! - media framework (files, network streams)    — `ffmpeg` feature
//! - industrial camera SDK A (`pylon`, `galaxy://`) — `galaxy` feature
//! - industrial camera SDK B (`idatum://`)       — `idatum` feature
//! - synthetic in-process source (`stub://`)     — always available
//!
//! Every backend produces [`Frame`] values through the same pull-based
//! `next_frame` call, decoupled from its blocking source by one acquisition
//! thread and a bounded queue.

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
#[cfg(feature = "galaxy")]
pub mod galaxy;
#[cfg(feature = "idatum")]
pub mod idatum;
pub mod synthetic;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::frame::{
    AllocateFn, CallbackAllocator, DeallocateFn, DefaultAllocator, Frame, SharedAllocator,
};
use crate::log::{LogFn, LogSink};

/// URL schemes handled without the media framework.
pub(crate) const BUILTIN_SCHEMES: &[&str] = &["pylon", "galaxy", "idatum", "stub"];

/// A pull-based frame source.
///
/// Constructed by [`Reader::create`]; dropped readers stop and join their
/// acquisition thread and close the underlying source.
#[derive(Debug)]
pub struct Reader {
    backend: Backend,
}

#[derive(Debug)]
enum Backend {
    #[cfg(feature = "ffmpeg")]
    Media(ffmpeg::MediaReader),
    #[cfg(feature = "galaxy")]
    Galaxy(galaxy::GalaxyReader),
    #[cfg(feature = "idatum")]
    IDatum(idatum::IDatumReader),
    Synthetic(synthetic::SyntheticReader),
}

impl Reader {
    /// Opens `url` and starts acquisition.
    ///
    /// `parameter_pairs` is a flat `[key, value, key, value, ..]` sequence;
    /// which keys are understood depends on the backend. `extras` selects
    /// per-frame metadata to record, by name, in order. Either both or
    /// neither of `allocate`/`deallocate` must be given; with neither, a
    /// heap allocator sized by `stride × height` is installed.
    pub fn create(
        url: &str,
        parameter_pairs: &[&str],
        extras: &[&str],
        allocate: Option<Arc<AllocateFn>>,
        deallocate: Option<Arc<DeallocateFn>>,
        log: Option<Arc<LogFn>>,
    ) -> Result<Reader> {
        let pairs = parse_parameter_pairs(parameter_pairs)?;
        let allocator = resolve_allocator(allocate, deallocate)?;
        let sink = LogSink::new(log);

        let backend = match url {
            "pylon" => {
                #[cfg(feature = "galaxy")]
                {
                    Backend::Galaxy(galaxy::GalaxyReader::first_device(
                        &pairs, extras, allocator, sink,
                    )?)
                }
                #[cfg(not(feature = "galaxy"))]
                {
                    return Err(unavailable(url, "galaxy"));
                }
            }
            _ if url.starts_with("galaxy://") => {
                #[cfg(feature = "galaxy")]
                {
                    Backend::Galaxy(galaxy::GalaxyReader::open(
                        &url["galaxy://".len()..],
                        &pairs,
                        extras,
                        allocator,
                        sink,
                    )?)
                }
                #[cfg(not(feature = "galaxy"))]
                {
                    return Err(unavailable(url, "galaxy"));
                }
            }
            _ if url.starts_with("idatum://") => {
                #[cfg(feature = "idatum")]
                {
                    Backend::IDatum(idatum::IDatumReader::open(
                        &url["idatum://".len()..],
                        &pairs,
                        extras,
                        allocator,
                        sink,
                    )?)
                }
                #[cfg(not(feature = "idatum"))]
                {
                    return Err(unavailable(url, "idatum"));
                }
            }
            _ if url.starts_with("stub://") => Backend::Synthetic(synthetic::SyntheticReader::open(
                url, &pairs, extras, allocator, sink,
            )?),
            _ => {
                #[cfg(feature = "ffmpeg")]
                {
                    Backend::Media(ffmpeg::MediaReader::open(
                        url, &pairs, extras, allocator, sink,
                    )?)
                }
                #[cfg(not(feature = "ffmpeg"))]
                {
                    return Err(Error::configuration(
                        "built without a media backend; enable the `ffmpeg` feature",
                    ));
                }
            }
        };
        Ok(Reader { backend })
    }

    /// Declared total frame count, or `0` when unknown (cameras, live
    /// streams).
    pub fn size(&self) -> u64 {
        match &self.backend {
            #[cfg(feature = "ffmpeg")]
            Backend::Media(r) => r.size(),
            #[cfg(feature = "galaxy")]
            Backend::Galaxy(_) => 0,
            #[cfg(feature = "idatum")]
            Backend::IDatum(_) => 0,
            Backend::Synthetic(r) => r.size(),
        }
    }

    /// True only for random-access offline sources.
    pub fn is_seekable(&self) -> bool {
        match &self.backend {
            #[cfg(feature = "ffmpeg")]
            Backend::Media(r) => r.is_seekable(),
            #[cfg(feature = "galaxy")]
            Backend::Galaxy(_) => false,
            #[cfg(feature = "idatum")]
            Backend::IDatum(_) => false,
            Backend::Synthetic(r) => r.is_seekable(),
        }
    }

    /// Pulls the next frame; `Ok(None)` at end of stream.
    ///
    /// With `decode = false` the returned frame carries valid shape, number,
    /// timestamp and extras, but uninitialized pixel data — cheap skipping.
    pub fn next_frame(&mut self, decode: bool) -> Result<Option<Frame>> {
        match &mut self.backend {
            #[cfg(feature = "ffmpeg")]
            Backend::Media(r) => r.next_frame(decode),
            #[cfg(feature = "galaxy")]
            Backend::Galaxy(r) => r.next_frame(),
            #[cfg(feature = "idatum")]
            Backend::IDatum(r) => r.next_frame(),
            Backend::Synthetic(r) => r.next_frame(),
        }
    }

    /// Backend-specific live reconfiguration, same key shapes as `create`.
    pub fn set(&mut self, parameter_pairs: &[&str]) -> Result<()> {
        let pairs = parse_parameter_pairs(parameter_pairs)?;
        match &mut self.backend {
            #[cfg(feature = "galaxy")]
            Backend::Galaxy(r) => r.set(&pairs),
            _ => {
                let _ = pairs;
                Err(Error::runtime("not implemented"))
            }
        }
    }

    /// Requests the acquisition thread to exit promptly; a blocked
    /// `next_frame` wakes and reports end of stream.
    pub fn stop(&self) {
        match &self.backend {
            #[cfg(feature = "ffmpeg")]
            Backend::Media(r) => r.stop(),
            #[cfg(feature = "galaxy")]
            Backend::Galaxy(r) => r.stop(),
            #[cfg(feature = "idatum")]
            Backend::IDatum(r) => r.stop(),
            Backend::Synthetic(r) => r.stop(),
        }
    }
}

// ----------------------------------------------------------------------------
// Construction-time validation
// ----------------------------------------------------------------------------

fn parse_parameter_pairs(parameter_pairs: &[&str]) -> Result<Vec<(String, String)>> {
    if parameter_pairs.len() % 2 != 0 {
        return Err(Error::configuration("invalid parameters size"));
    }
    Ok(parameter_pairs
        .chunks_exact(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect())
}

fn resolve_allocator(
    allocate: Option<Arc<AllocateFn>>,
    deallocate: Option<Arc<DeallocateFn>>,
) -> Result<SharedAllocator> {
    match (allocate, deallocate) {
        (None, None) => Ok(Arc::new(DefaultAllocator)),
        (Some(allocate), Some(deallocate)) => Ok(Arc::new(CallbackAllocator {
            allocate,
            deallocate,
        })),
        _ => Err(Error::configuration(
            "all or no allocators MUST be specified",
        )),
    }
}

#[cfg(any(not(feature = "galaxy"), not(feature = "idatum")))]
fn unavailable(url: &str, feature: &str) -> Error {
    Error::open(
        url,
        format!("backend support requires the `{feature}` feature"),
    )
}

/// Formats leftover configuration pairs for error messages, `key=value`
/// joined by commas.
pub(crate) fn join_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_parameter_count_is_rejected() {
        let err = Reader::create("stub://", &["single"], &[], None, None, None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(err.to_string(), "invalid parameters size");
    }

    #[test]
    fn one_sided_allocator_is_rejected() {
        let allocate: Arc<AllocateFn> = Arc::new(|_image| {});
        let err =
            Reader::create("stub://", &[], &[], Some(allocate), None, None).unwrap_err();
        assert_eq!(err.to_string(), "all or no allocators MUST be specified");
    }

    #[test]
    fn pairs_are_keyed_in_order() {
        let pairs = parse_parameter_pairs(&["width", "64", "height", "48"]).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("width".to_string(), "64".to_string()),
                ("height".to_string(), "48".to_string())
            ]
        );
    }
}
