//! PDF rasterization via Google PDFium.
//!
//! The upstream `Pdfium` handle is bound per call rather than stored, so
//! `PdfiumRasterizer` stays `Send + Sync`. The OS caches the library load, so
//! repeated binds are cheap.

use super::{encode_page, Rasterizer, RENDER_DPI};
use crate::error::RasterError;
use crate::types::PageImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Upper bound on either pixel dimension of a rendered page.
const MAX_DIMENSION_PX: u32 = 6000;

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Environment variable holding an explicit path to the PDFium library.
pub const PDFIUM_LIB_ENV: &str = "PDFIUM_DYNAMIC_LIB_PATH";

/// Renders PDF documents at [`RENDER_DPI`].
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    /// Create a rasterizer, failing fast when the library cannot be loaded.
    pub fn new() -> Result<Self, RasterError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

/// Bind the PDFium dynamic library.
///
/// Lookup order: `PDFIUM_DYNAMIC_LIB_PATH`, the executable's directory (and
/// its `lib/` sibling), then the system library path.
pub fn load_pdfium() -> Result<Pdfium, RasterError> {
    if let Ok(path) = std::env::var(PDFIUM_LIB_ENV) {
        debug!(path = %path, "loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| RasterError::Internal {
            page: 0,
            reason: format!("failed to load PDFium from {path}: {e}"),
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
    {
        for dir in [exe_dir.clone(), exe_dir.join("..").join("lib")] {
            let lib_path =
                Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                debug!(dir = %dir.display(), "loaded PDFium next to executable");
                return Ok(Pdfium::new(bindings));
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| RasterError::Internal {
        page: 0,
        reason: format!("PDFium library not found; set {PDFIUM_LIB_ENV} or install PDFium: {e}"),
    })?;
    Ok(Pdfium::new(bindings))
}

/// Pixel dimensions for a page at `dpi`, both clamped to `[1, MAX_DIMENSION_PX]`
/// with the aspect ratio preserved.
fn render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(&self, document: &[u8]) -> Result<Vec<PageImage>, RasterError> {
        if document.is_empty() {
            return Err(RasterError::Empty);
        }

        let pdfium = load_pdfium()?;
        let pdf = pdfium
            .load_pdf_from_byte_slice(document, None)
            .map_err(|e| RasterError::Malformed(e.to_string()))?;

        let pages = pdf.pages();
        if pages.len() == 0 {
            return Err(RasterError::Empty);
        }

        let mut images = Vec::with_capacity(pages.len() as usize);
        for (pos, page) in pages.iter().enumerate() {
            let index = pos as u32 + 1;
            let (width, height) =
                render_dimensions(page.width().value, page.height().value, RENDER_DPI);
            if width == MAX_DIMENSION_PX || height == MAX_DIMENSION_PX {
                warn!(page = index, width, height, "page dimensions capped");
            }

            let config = PdfRenderConfig::new()
                .set_target_width(width as i32)
                .set_maximum_height(height as i32);
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| RasterError::Internal {
                    page: index,
                    reason: format!("rendering failed: {e}"),
                })?;

            let encoded = encode_page(index, &bitmap.as_image())?;
            debug!(
                page = index,
                width = encoded.width,
                height = encoded.height,
                jpeg_size = encoded.bytes.len(),
                "rendered page"
            );
            images.push(encoded);
        }

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a4_at_150dpi() {
        let (w, h) = render_dimensions(595.0, 842.0, RENDER_DPI);
        // 595 * 150/72 ~ 1240, 842 * 150/72 ~ 1754
        assert!((1235..1245).contains(&w), "width {w}");
        assert!((1750..1760).contains(&h), "height {h}");
    }

    #[test]
    fn test_oversized_page_is_capped_preserving_ratio() {
        let (w, h) = render_dimensions(10_000.0, 5_000.0, RENDER_DPI);
        assert!(w <= MAX_DIMENSION_PX && w >= MAX_DIMENSION_PX - 1, "width {w}");
        assert!(h.abs_diff(MAX_DIMENSION_PX / 2) <= 1, "height {h}");
    }

    #[test]
    fn test_degenerate_page_has_at_least_one_pixel() {
        assert_eq!(render_dimensions(0.0, 0.0, RENDER_DPI), (1, 1));
    }

    #[test]
    fn test_empty_document_is_rejected_before_loading_library() {
        let err = PdfiumRasterizer.rasterize(&[]).unwrap_err();
        assert!(matches!(err, RasterError::Empty));
    }
}
