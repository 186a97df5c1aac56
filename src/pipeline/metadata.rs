//! EXIF handling: orientation lookup and re-embedding into encoded JPEGs.
//!
//! Decoders rotate pixels upright, so an EXIF block carried through to the
//! output must have its orientation tag reset to 1 or viewers would rotate
//! the image a second time.

use exif::{In, Reader, Tag};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const TAG_ORIENTATION: u16 = 0x0112;

/// EXIF orientation values (1-8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Transpose,
    Rotate90CW,
    Transverse,
    Rotate270CW,
}

impl From<u32> for Orientation {
    fn from(value: u32) -> Self {
        match value {
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90CW,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270CW,
            _ => Orientation::Normal,
        }
    }
}

impl Orientation {
    pub fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Orientation::Normal => img,
            Orientation::FlipHorizontal => img.fliph(),
            Orientation::Rotate180 => img.rotate180(),
            Orientation::FlipVertical => img.flipv(),
            Orientation::Transpose => img.rotate90().fliph(),
            Orientation::Rotate90CW => img.rotate90(),
            Orientation::Transverse => img.rotate270().fliph(),
            Orientation::Rotate270CW => img.rotate270(),
        }
    }
}

/// Raw EXIF (TIFF-structured) block found in a source container.
#[derive(Debug, Clone)]
pub struct ExifBlock {
    pub tiff: Vec<u8>,
    pub orientation: Orientation,
}

/// Extract the EXIF block from any container kamadak-exif understands
/// (JPEG, HEIF, PNG, WebP, TIFF). `None` when absent or unreadable.
pub fn read_exif(bytes: &[u8]) -> Option<ExifBlock> {
    let exif = Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let orientation = exif
        .get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .map(Orientation::from)
        .unwrap_or_default();
    Some(ExifBlock {
        tiff: exif.buf().to_vec(),
        orientation,
    })
}

/// Rewrite the IFD0 orientation entry to 1 in place. Returns whether the
/// tag was found.
pub fn reset_orientation(tiff: &mut [u8]) -> bool {
    reset_orientation_inner(tiff).is_some()
}

fn reset_orientation_inner(tiff: &mut [u8]) -> Option<()> {
    let little_endian = match tiff.get(0..2)? {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };
    let read_u16 = |buf: &[u8], at: usize| -> Option<u16> {
        let b = buf.get(at..at + 2)?;
        Some(if little_endian {
            u16::from_le_bytes([b[0], b[1]])
        } else {
            u16::from_be_bytes([b[0], b[1]])
        })
    };
    let ifd = {
        let b = tiff.get(4..8)?;
        let raw = [b[0], b[1], b[2], b[3]];
        if little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        }
    } as usize;

    let count = read_u16(tiff, ifd)? as usize;
    for i in 0..count {
        let at = ifd + 2 + i * 12;
        if read_u16(tiff, at)? != TAG_ORIENTATION {
            continue;
        }
        // SHORT, count 1: the value sits left-aligned in the 4-byte value field.
        let one = if little_endian {
            1u16.to_le_bytes()
        } else {
            1u16.to_be_bytes()
        };
        tiff.get_mut(at + 8..at + 10)?.copy_from_slice(&one);
        return Some(());
    }
    None
}

/// Insert `tiff` as an APP1 Exif segment into an encoded JPEG, after the
/// JFIF APP0 segment when present. `None` if `jpeg` is not a JPEG or the
/// block does not fit in a single segment.
pub fn insert_exif_segment(jpeg: &[u8], tiff: &[u8]) -> Option<Vec<u8>> {
    if !jpeg.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let segment_len = 2 + EXIF_HEADER.len() + tiff.len();
    let segment_len = u16::try_from(segment_len).ok()?;

    let mut insert_at = 2;
    if jpeg.get(2..4) == Some(&[0xFF, 0xE0][..]) {
        let len = jpeg.get(4..6)?;
        insert_at = 4 + u16::from_be_bytes([len[0], len[1]]) as usize;
        if insert_at > jpeg.len() {
            return None;
        }
    }

    let mut out = Vec::with_capacity(jpeg.len() + segment_len as usize + 2);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(EXIF_HEADER);
    out.extend_from_slice(tiff);
    out.extend_from_slice(&jpeg[insert_at..]);
    debug!("Embedded {} bytes of EXIF", tiff.len());
    Some(out)
}
