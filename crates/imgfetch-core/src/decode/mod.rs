//! Image decoding and rescaling.
//!
//! Decoding runs under `image::Limits` so that a picture too large for the
//! allocation budget surfaces as an error instead of taking the process down.
//! Such an error is treated as memory exhaustion: the caller's reclaim hook is
//! invoked once and the same stage is retried before giving up.
//!
//! Rescaling happens in two passes. The decoded image is first reduced by a
//! power-of-two factor with nearest-neighbour sampling (cheap, and it frees the
//! full-resolution buffer early), then resampled to the exact target box.

pub mod scale;

use image::error::LimitErrorKind;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader, Limits};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

/// A decoded image, shared between the cache and consumers.
pub type DecodedImage = Arc<DynamicImage>;

/// Requested output box. Both sides are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    /// Returns `None` unless both sides are greater than zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self { width, height })
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Decode or scale failure.
#[derive(Debug)]
pub enum DecodeError {
    /// Bytes are not a decodable image (unknown format, truncated, corrupt).
    Malformed(ImageError),
    /// The allocation budget was exceeded, even after a reclaim.
    OutOfMemory(String),
    /// The final scale pass exceeded the budget after a reclaim. The bytes
    /// decoded fine, so fetching them again cannot help.
    ScaleExhausted(String),
}

impl DecodeError {
    fn from_image(err: ImageError) -> Self {
        let exhausted = matches!(
            &err,
            ImageError::Limits(limit) if matches!(limit.kind(), LimitErrorKind::InsufficientMemory)
        );
        if exhausted {
            DecodeError::OutOfMemory(err.to_string())
        } else {
            DecodeError::Malformed(err)
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(e) => write!(f, "malformed image: {}", e),
            DecodeError::OutOfMemory(detail) => write!(f, "out of memory: {}", detail),
            DecodeError::ScaleExhausted(detail) => write!(f, "out of memory while scaling: {}", detail),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Malformed(e) => Some(e),
            DecodeError::OutOfMemory(_) | DecodeError::ScaleExhausted(_) => None,
        }
    }
}

/// Run `op`; on memory exhaustion call `reclaim` and run it exactly once more.
fn with_reclaim<T>(
    stage: &str,
    reclaim: &dyn Fn(),
    mut op: impl FnMut() -> Result<T, DecodeError>,
) -> Result<T, DecodeError> {
    match op() {
        Err(DecodeError::OutOfMemory(detail)) => {
            tracing::warn!(stage, %detail, "out of memory; reclaiming and retrying once");
            reclaim();
            let res = op();
            if let Err(DecodeError::OutOfMemory(_)) = &res {
                tracing::warn!(stage, "still out of memory after reclaim");
            }
            res
        }
        other => other,
    }
}

/// Decoder with an allocation budget.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    limits: Limits,
}

impl Decoder {
    /// `max_alloc` caps the bytes any single decode or resample may allocate;
    /// `None` keeps the `image` crate default.
    pub fn new(max_alloc: Option<u64>) -> Self {
        let mut limits = Limits::default();
        if max_alloc.is_some() {
            limits.max_alloc = max_alloc;
        }
        Self { limits }
    }

    /// Image dimensions from the header, without decoding pixels.
    pub fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), DecodeError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Malformed(ImageError::IoError(e)))?;
        reader.into_dimensions().map_err(DecodeError::from_image)
    }

    /// Decode at full resolution.
    pub fn decode(&self, bytes: &[u8], reclaim: &dyn Fn()) -> Result<DynamicImage, DecodeError> {
        with_reclaim("decode", reclaim, || self.decode_once(bytes))
    }

    /// Decode and scale to fit `target`, keeping the aspect ratio.
    pub fn decode_and_resize(
        &self,
        bytes: &[u8],
        target: Dims,
        reclaim: &dyn Fn(),
    ) -> Result<DynamicImage, DecodeError> {
        let full = with_reclaim("decode", reclaim, || self.decode_once(bytes))?;
        let (width, height) = (full.width(), full.height());
        let factor = scale::sample_factor(width, height, target);
        tracing::debug!(factor, width, height, %target, "sample factor chosen");

        let source = if factor > 1 {
            let reduced = with_reclaim("sample", reclaim, || {
                self.resample(&full, width / factor, height / factor, FilterType::Nearest)
            });
            match reduced {
                Ok(reduced) => {
                    drop(full);
                    reduced
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reduction pass failed; scaling from full resolution");
                    full
                }
            }
        } else {
            full
        };

        let (w, h) = scale::fit_within(width, height, target);
        tracing::debug!(original = %format!("{}x{}", width, height), resized = %format!("{}x{}", w, h), "scaling");
        with_reclaim("scale", reclaim, || {
            self.resample(&source, w, h, FilterType::Triangle)
        })
        .map_err(|e| match e {
            DecodeError::OutOfMemory(detail) => DecodeError::ScaleExhausted(detail),
            other => other,
        })
    }

    fn decode_once(&self, bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Malformed(ImageError::IoError(e)))?;
        reader.limits(self.limits.clone());
        reader.decode().map_err(DecodeError::from_image)
    }

    fn resample(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
        filter: FilterType,
    ) -> Result<DynamicImage, DecodeError> {
        let (width, height) = (width.max(1), height.max(1));
        let needed = width as u64 * height as u64 * image.color().bytes_per_pixel() as u64;
        if let Some(max) = self.limits.max_alloc {
            if needed > max {
                return Err(DecodeError::OutOfMemory(format!(
                    "{}x{} needs {} bytes, budget is {}",
                    width, height, needed, max
                )));
            }
        }
        Ok(image.resize_exact(width, height, filter))
    }
}

/// Encode as PNG, e.g. for writing a fetched image to disk.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ImageError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
