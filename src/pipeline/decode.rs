//! Decoding: source container bytes → upright in-memory [`Bitmap`].
//!
//! Decoders are synchronous and CPU-bound; the scheduler runs them inside
//! `tokio::task::spawn_blocking` so the lane's other in-flight tasks keep
//! making progress while one of them decodes.
//!
//! [`ImageCrateDecoder`] is the default: it sniffs the container from the
//! bytes (never from the file name) and decodes whatever the `image` crate
//! supports. With the `heif` feature, [`HeifDecoder`] decodes HEIC/HEIF via
//! libheif and falls back to the `image` crate for other containers.

use crate::error::DecodeError;
use crate::pipeline::metadata::{self, Orientation};
use image::{DynamicImage, ImageError, ImageReader, RgbImage};
use std::fmt;
use std::io::Cursor;
use tracing::debug;

/// A decoded image: RGB8 pixels plus the source's EXIF block, if any.
///
/// Pixels are always upright; the EXIF orientation has already been applied.
#[derive(Clone)]
pub struct Bitmap {
    pixels: RgbImage,
    exif: Option<Vec<u8>>,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("exif_bytes", &self.exif.as_ref().map(Vec::len))
            .finish()
    }
}

impl Bitmap {
    pub fn new(pixels: RgbImage) -> Self {
        Self { pixels, exif: None }
    }

    pub fn with_exif(mut self, exif: Option<Vec<u8>>) -> Self {
        self.exif = exif;
        self
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn exif(&self) -> Option<&[u8]> {
        self.exif.as_deref()
    }

    /// Replace the pixels, keeping the metadata.
    pub fn with_pixels(self, pixels: RgbImage) -> Self {
        Self {
            pixels,
            exif: self.exif,
        }
    }
}

/// Turns raw source bytes into a [`Bitmap`].
///
/// Implementations must be `Send + Sync`: one decoder instance is shared by
/// every task of a batch and called from blocking worker threads.
pub trait SourceDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Bitmap, DecodeError>;
}

/// Decoder backed by the `image` crate, with EXIF orientation applied.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;

impl SourceDecoder for ImageCrateDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Bitmap, DecodeError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let Some(format) = reader.format() else {
            return Err(DecodeError::UnsupportedFormat { hint: None });
        };

        let img = reader.decode().map_err(|e| match e {
            ImageError::Unsupported(_) => DecodeError::UnsupportedFormat {
                hint: Some(format!("{format:?}")),
            },
            other => DecodeError::Malformed(other.to_string()),
        })?;

        let exif = metadata::read_exif(bytes);
        let orientation = exif.as_ref().map(|e| e.orientation).unwrap_or_default();
        debug!(
            "Decoded {:?} {}x{} (orientation {:?})",
            format,
            img.width(),
            img.height(),
            orientation
        );

        Ok(upright(img, orientation, exif.map(|e| e.tiff)))
    }
}

/// Apply orientation and neutralise the tag in the carried EXIF block.
fn upright(img: DynamicImage, orientation: Orientation, exif: Option<Vec<u8>>) -> Bitmap {
    let img = orientation.apply(img);
    let exif = exif.map(|mut tiff| {
        if orientation != Orientation::Normal {
            metadata::reset_orientation(&mut tiff);
        }
        tiff
    });
    Bitmap::new(img.into_rgb8()).with_exif(exif)
}

#[cfg(feature = "heif")]
pub use heif::HeifDecoder;

#[cfg(feature = "heif")]
mod heif {
    use super::*;
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    /// Native HEIC/HEIF decoder. libheif applies the container's rotation and
    /// mirroring itself, so only the EXIF tag is normalised here.
    pub struct HeifDecoder {
        lib: LibHeif,
    }

    impl Default for HeifDecoder {
        fn default() -> Self {
            Self {
                lib: LibHeif::new(),
            }
        }
    }

    impl fmt::Debug for HeifDecoder {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("HeifDecoder")
        }
    }

    fn is_heif(bytes: &[u8]) -> bool {
        matches!(
            bytes.get(4..12),
            Some(b"ftypheic") | Some(b"ftypheix") | Some(b"ftypmif1") | Some(b"ftypmsf1")
                | Some(b"ftyphevc") | Some(b"ftypheim") | Some(b"ftypheis")
        )
    }

    impl SourceDecoder for HeifDecoder {
        fn decode(&self, bytes: &[u8]) -> Result<Bitmap, DecodeError> {
            if !is_heif(bytes) {
                return ImageCrateDecoder.decode(bytes);
            }
            let ctx = HeifContext::read_from_bytes(bytes)
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;
            let handle = ctx
                .primary_image_handle()
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;
            let image = self
                .lib
                .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;

            let planes = image.planes();
            let plane = planes
                .interleaved
                .ok_or_else(|| DecodeError::Malformed("no interleaved RGB plane".into()))?;
            let (width, height, stride) = (plane.width, plane.height, plane.stride);
            let row_bytes = width as usize * 3;
            let mut pixels = Vec::with_capacity(row_bytes * height as usize);
            for row in plane.data.chunks(stride).take(height as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }
            let rgb = RgbImage::from_raw(width, height, pixels)
                .ok_or_else(|| DecodeError::Malformed("pixel buffer size mismatch".into()))?;

            let exif = metadata::read_exif(bytes).map(|mut block| {
                metadata::reset_orientation(&mut block.tiff);
                block.tiff
            });
            debug!("Decoded HEIF {}x{}", width, height);
            Ok(Bitmap::new(rgb).with_exif(exif))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::metadata::tests::tiff_with_orientation;
    use image::Rgb;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 200, 30]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn decodes_png_container() {
        let bmp = ImageCrateDecoder.decode(&png_bytes(16, 9)).unwrap();
        assert_eq!(bmp.dimensions(), (16, 9));
        assert!(bmp.exif().is_none());
        assert_eq!(bmp.pixels().get_pixel(0, 0), &Rgb([10, 200, 30]));
    }

    #[test]
    fn unknown_container_is_unsupported() {
        let err = ImageCrateDecoder.decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat { hint: None }));
    }

    #[test]
    fn known_but_disabled_container_is_unsupported() {
        // GIF magic; the gif codec is not compiled in.
        let err = ImageCrateDecoder.decode(b"GIF89a\x01\x00\x01\x00\x00\x00\x00;").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat { hint: Some(_) }));
    }

    #[test]
    fn truncated_png_is_malformed() {
        let bytes = png_bytes(32, 32);
        let err = ImageCrateDecoder.decode(&bytes[..40]).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn exif_orientation_is_applied_and_reset() {
        let img = DynamicImage::new_rgb8(40, 20);
        let mut jpeg = Vec::new();
        img.write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();
        let jpeg = metadata::insert_exif_segment(&jpeg, &tiff_with_orientation(6)).unwrap();

        let bmp = ImageCrateDecoder.decode(&jpeg).unwrap();

        assert_eq!(bmp.dimensions(), (20, 40));
        let mut probe = Vec::new();
        DynamicImage::new_rgb8(1, 1)
            .write_to(&mut Cursor::new(&mut probe), image::ImageFormat::Jpeg)
            .unwrap();
        let probe = metadata::insert_exif_segment(&probe, bmp.exif().unwrap()).unwrap();
        assert_eq!(
            metadata::read_exif(&probe).unwrap().orientation,
            Orientation::Normal
        );
    }
}
