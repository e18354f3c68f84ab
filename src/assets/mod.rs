//! Asset fetch service: text, binary, image and panorama requests that resolve
//! asynchronously and are polled from the frame loop.

mod file_fetcher;
mod memory_fetcher;
mod pending;

use std::path::PathBuf;

pub use file_fetcher::FileFetcher;
pub use memory_fetcher::MemoryFetcher;
pub use pending::{pending, Completer, Join, Pending};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no asset at {0}")]
    NotFound(String),
    #[error("failed to decode {url}: {message}")]
    Decode { url: String, message: String },
    #[error("fetch worker went away before answering")]
    Disconnected,
}

/// 8-bit RGBA pixels, rows top to bottom.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Linear radiance as RGB float triples, rows top to bottom.
#[derive(Clone, Debug, PartialEq)]
pub struct Panorama {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<f32>,
}

pub trait AssetFetcher {
    fn fetch_text(&self, url: &str) -> Pending<String>;
    fn fetch_binary(&self, url: &str) -> Pending<Vec<u8>>;
    fn fetch_image(&self, url: &str) -> Pending<DecodedImage>;
    fn fetch_panorama(&self, url: &str) -> Pending<Panorama>;
}

pub fn decode_image(url: &str, bytes: &[u8]) -> Result<DecodedImage, FetchError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| FetchError::Decode { url: url.to_string(), message: e.to_string() })?
        .to_rgba8();
    Ok(DecodedImage { width: image.width(), height: image.height(), pixels: image.into_raw() })
}

/// Decodes a radiance (`.hdr`) or any other float-capable format into linear RGB.
pub fn decode_panorama(url: &str, bytes: &[u8]) -> Result<Panorama, FetchError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| FetchError::Decode { url: url.to_string(), message: e.to_string() })?
        .to_rgb32f();
    Ok(Panorama { width: image.width(), height: image.height(), pixels: image.into_raw() })
}

pub fn decode_text(url: &str, bytes: Vec<u8>) -> Result<String, FetchError> {
    String::from_utf8(bytes).map_err(|e| FetchError::Decode { url: url.to_string(), message: e.to_string() })
}

/// Resolves `relative` against the directory of `base`.
pub fn resolve_url(base: &str, relative: &str) -> String {
    match base.rfind('/') {
        Some(slash) => format!("{}{}", &base[..=slash], relative),
        None => relative.to_string(),
    }
}
