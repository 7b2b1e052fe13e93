//! Rasterizer boundary: document bytes in, ordered JPEG pages out.
//!
//! Resolution and encoding are fixed for every run so that downstream
//! consumers can rely on uniform image dimensions.

pub mod pdfium;

pub use pdfium::PdfiumRasterizer;

use crate::error::RasterError;
use crate::types::PageImage;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;

/// Rendering resolution for every page.
pub const RENDER_DPI: u32 = 150;

/// JPEG quality for every page.
pub const JPEG_QUALITY: u8 = 85;

/// Converts a document into page images.
///
/// Implementations are blocking; the pipeline calls them on a blocking thread.
/// On success the pages are indexed `1..=N` with no gaps.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, document: &[u8]) -> Result<Vec<PageImage>, RasterError>;
}

/// Encode a rendered page as JPEG at [`JPEG_QUALITY`].
pub fn encode_page(index: u32, image: &DynamicImage) -> Result<PageImage, RasterError> {
    let rgb = image.to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| RasterError::Internal {
            page: index,
            reason: format!("JPEG encoding failed: {e}"),
        })?;

    Ok(PageImage {
        index,
        bytes,
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// Check that `pages` is indexed exactly `1..=N` in order and non-empty.
pub fn check_sequence(pages: &[PageImage]) -> Result<(), String> {
    if pages.is_empty() {
        return Err("no pages".to_string());
    }
    for (pos, page) in pages.iter().enumerate() {
        let expected = pos as u32 + 1;
        if page.index != expected {
            return Err(format!(
                "page at position {pos} has index {}, expected {expected}",
                page.index
            ));
        }
        if page.bytes.is_empty() {
            return Err(format!("page {} has no image data", page.index));
        }
    }
    Ok(())
}
