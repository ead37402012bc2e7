//! Resize capability used by each fan-out branch.
//!
//! The engine treats a transform as a stream-to-stream black box. The
//! `image`-backed implementation decodes on the blocking pool, scales the
//! image to cover the target box and centre-crops it without upscaling, then
//! re-encodes it in the source's own format.

use crate::{models::rendition::ResizeOptions, services::object_store::ByteStream};
use bytes::Bytes;
use futures::{StreamExt, stream};
use image::{GenericImageView, ImageFormat, imageops::FilterType};
use std::io::{self, Cursor};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("resize task aborted: {0}")]
    Task(String),
}

impl From<TransformError> for io::Error {
    fn from(err: TransformError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

pub trait Transform: Send + Sync {
    /// Produce the resized rendition of `input`. Failures, including input
    /// failures, surface as an `Err` item on the returned stream.
    fn resize(&self, input: ByteStream, options: ResizeOptions) -> ByteStream;
}

const DEFAULT_OUTPUT_CHUNK: usize = 64 * 1024;

/// `Transform` backed by the `image` crate.
#[derive(Clone, Debug)]
pub struct ImageResizer {
    output_chunk: usize,
}

impl Default for ImageResizer {
    fn default() -> Self {
        Self {
            output_chunk: DEFAULT_OUTPUT_CHUNK,
        }
    }
}

impl Transform for ImageResizer {
    fn resize(&self, input: ByteStream, options: ResizeOptions) -> ByteStream {
        let chunk_size = self.output_chunk.max(1);
        let encoded = async move {
            let mut source = Vec::new();
            let mut input = input;
            while let Some(chunk) = input.next().await {
                // Input errors pass through untouched so callers can tell a
                // failed source apart from a failed resize.
                source.extend_from_slice(&chunk?);
            }

            let resized = tokio::task::spawn_blocking(move || resize_image(&source, options))
                .await
                .map_err(|err| TransformError::Task(err.to_string()))??;
            Ok::<Bytes, io::Error>(resized)
        };

        Box::pin(
            stream::once(encoded)
                .map(move |result| {
                    let items: Vec<io::Result<Bytes>> = match result {
                        Ok(bytes) => split_chunks(bytes, chunk_size).into_iter().map(Ok).collect(),
                        Err(err) => vec![Err(err)],
                    };
                    stream::iter(items)
                })
                .flatten(),
        )
    }
}

fn split_chunks(mut bytes: Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(bytes.len() / chunk_size + 1);
    while bytes.len() > chunk_size {
        chunks.push(bytes.split_to(chunk_size));
    }
    if !bytes.is_empty() {
        chunks.push(bytes);
    }
    chunks
}

/// Decode, cover-crop and re-encode. CPU-bound; run off the async runtime.
pub fn resize_image(data: &[u8], options: ResizeOptions) -> Result<Bytes, TransformError> {
    let format = image::guess_format(data).map_err(|e| TransformError::Decode(e.to_string()))?;
    let img = image::load_from_memory_with_format(data, format)
        .map_err(|e| TransformError::Decode(e.to_string()))?;

    let (orig_w, orig_h) = img.dimensions();
    let (new_w, new_h) = target_dimensions((orig_w, orig_h), options);
    debug!(
        original_width = orig_w,
        original_height = orig_h,
        width = new_w,
        height = new_h,
        "resizing image"
    );

    let output = if (new_w, new_h) == (orig_w, orig_h) {
        img
    } else {
        img.resize_to_fill(new_w, new_h, FilterType::Triangle)
    };

    encode(&output, format)
}

fn encode(img: &image::DynamicImage, format: ImageFormat) -> Result<Bytes, TransformError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format)
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Output dimensions for `source` resized to cover the target box.
///
/// With `without_enlargement` each target axis is first capped at the
/// source's size on that axis, so a source smaller than the box keeps its own
/// size there. The image is then scaled to cover the capped box and
/// centre-cropped to it.
pub fn target_dimensions(source: (u32, u32), options: ResizeOptions) -> (u32, u32) {
    let (w, h) = source;
    let (tw, th) = (options.width, options.height);
    if w == 0 || h == 0 || tw == 0 || th == 0 {
        return source;
    }
    if options.without_enlargement {
        (tw.min(w), th.min(h))
    } else {
        (tw, th)
    }
}
