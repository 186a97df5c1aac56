//! Raster encoding: [`Bitmap`] → standalone JPEG bytes.
//!
//! The same encoder produces the DCT streams embedded as document pages, so
//! one quality setting governs both artifact kinds.

use crate::error::TaskError;
use crate::pipeline::decode::Bitmap;
use crate::pipeline::metadata;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::{debug, warn};

/// Encode `bitmap` as a baseline JPEG at `quality` (1-100).
///
/// With `keep_metadata`, the bitmap's EXIF block (orientation already reset
/// by the decoder) is embedded as an APP1 segment. A block too large for a
/// single segment is dropped rather than failing the task.
pub fn encode_jpeg(
    bitmap: &Bitmap,
    quality: u8,
    keep_metadata: bool,
) -> Result<Vec<u8>, TaskError> {
    let (width, height) = bitmap.dimensions();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .write_image(bitmap.pixels().as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|e| TaskError::Encode {
            detail: e.to_string(),
        })?;
    debug!("Encoded {}x{} → {} bytes JPEG", width, height, buf.len());

    let Some(exif) = bitmap.exif().filter(|_| keep_metadata) else {
        return Ok(buf);
    };
    match metadata::insert_exif_segment(&buf, exif) {
        Some(with_exif) => Ok(with_exif),
        None => {
            warn!("EXIF block of {} bytes does not fit a JPEG segment; dropped", exif.len());
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::metadata::tests::tiff_with_orientation;
    use image::{Rgb, RgbImage};

    fn bitmap() -> Bitmap {
        Bitmap::new(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])))
            .with_exif(Some(tiff_with_orientation(1)))
    }

    #[test]
    fn encode_small_image() {
        let jpeg = encode_jpeg(&bitmap(), 90, false).expect("encode should succeed");
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
        let img = image::load_from_memory(&jpeg).expect("valid jpeg");
        assert_eq!((img.width(), img.height()), (10, 10));
    }

    #[test]
    fn metadata_is_stripped_unless_kept() {
        let stripped = encode_jpeg(&bitmap(), 90, false).unwrap();
        assert!(metadata::read_exif(&stripped).is_none());

        let kept = encode_jpeg(&bitmap(), 90, true).unwrap();
        assert!(metadata::read_exif(&kept).is_some());
        assert!(image::load_from_memory(&kept).is_ok());
    }

    #[test]
    fn oversized_exif_is_dropped() {
        let bmp = Bitmap::new(RgbImage::new(4, 4)).with_exif(Some(vec![0u8; 70_000]));
        let jpeg = encode_jpeg(&bmp, 80, true).unwrap();
        assert!(jpeg.len() < 70_000);
    }

    #[test]
    fn lower_quality_is_smaller() {
        let noisy = RgbImage::from_fn(64, 64, |x, y| {
            Rgb([(x * 7) as u8, (y * 13) as u8, (x ^ y) as u8])
        });
        let bmp = Bitmap::new(noisy);
        let low = encode_jpeg(&bmp, 10, false).unwrap();
        let high = encode_jpeg(&bmp, 100, false).unwrap();
        assert!(low.len() < high.len());
    }
}
