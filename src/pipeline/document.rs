//! Document assembly: ordered bitmaps → one PDF, one page per bitmap.
//!
//! Each page embeds its bitmap as a JPEG (`DCTDecode`) image XObject, so the
//! PDF is little more than a container around the same streams the raster
//! lane would produce. A [`DocumentAssembler`] owns exactly one open
//! document; merge passes feed it sequentially and call [`finish`] once.
//!
//! [`finish`]: DocumentAssembler::finish

use crate::config::PageSizing;
use crate::error::AssemblyError;
use crate::pipeline::decode::Bitmap;
use crate::pipeline::encode::encode_jpeg;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

/// Physical size of one pixel on a content-sized page: 96 px/in at 72 pt/in.
pub const POINTS_PER_PIXEL: f32 = 0.75;

const IMAGE_NAME: &str = "Im0";

/// Media box and image placement of one page, in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub page_width: f32,
    pub page_height: f32,
    pub image_x: f32,
    pub image_y: f32,
    pub image_width: f32,
    pub image_height: f32,
}

impl PageGeometry {
    /// Lay out a `pixels`-sized image according to `sizing`.
    ///
    /// Content-sized pages wrap the image exactly, so orientation follows the
    /// image. Standard pages stay portrait; the image is scaled to the
    /// largest size that fits and centered.
    pub fn compute(sizing: PageSizing, pixels: (u32, u32)) -> Self {
        let iw = pixels.0 as f32 * POINTS_PER_PIXEL;
        let ih = pixels.1 as f32 * POINTS_PER_PIXEL;
        match sizing {
            PageSizing::ContentSized => Self {
                page_width: iw,
                page_height: ih,
                image_x: 0.0,
                image_y: 0.0,
                image_width: iw,
                image_height: ih,
            },
            PageSizing::Standard(paper) => {
                let (pw, ph) = paper.dimensions_pt();
                let scale = (pw / iw).min(ph / ih);
                let (w, h) = (iw * scale, ih * scale);
                Self {
                    page_width: pw,
                    page_height: ph,
                    image_x: (pw - w) / 2.0,
                    image_y: (ph - h) / 2.0,
                    image_width: w,
                    image_height: h,
                }
            }
        }
    }
}

/// Builds one PDF from a sequence of bitmaps. Not shareable between writers.
pub struct DocumentAssembler {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
    sizing: PageSizing,
    quality: u8,
}

impl DocumentAssembler {
    pub fn new(sizing: PageSizing, quality: u8) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
            sizing,
            quality,
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Append `bitmap` as the next page.
    pub fn add_page(&mut self, bitmap: &Bitmap) -> Result<(), AssemblyError> {
        let page = self.kids.len() + 1;
        let page_err = |detail: String| AssemblyError::Page { page, detail };

        let (px_w, px_h) = bitmap.dimensions();
        if px_w == 0 || px_h == 0 {
            return Err(page_err("empty bitmap".into()));
        }
        let jpeg = encode_jpeg(bitmap, self.quality, false).map_err(|e| page_err(e.to_string()))?;
        let geo = PageGeometry::compute(self.sizing, (px_w, px_h));

        let image_id = self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => px_w as i64,
                "Height" => px_h as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        geo.image_width.into(),
                        0.into(),
                        0.into(),
                        geo.image_height.into(),
                        geo.image_x.into(),
                        geo.image_y.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_bytes = content.encode().map_err(|e| page_err(e.to_string()))?;
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content_bytes));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                geo.page_width.into(),
                geo.page_height.into(),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    IMAGE_NAME => image_id,
                },
            },
        });
        self.kids.push(page_id.into());
        debug!(
            "Added page {} ({}x{} px on {:.1}x{:.1} pt)",
            page, px_w, px_h, geo.page_width, geo.page_height
        );
        Ok(())
    }

    /// Close the document and serialise it. Fails with
    /// [`AssemblyError::Empty`] when no page was ever added.
    pub fn finish(mut self) -> Result<Vec<u8>, AssemblyError> {
        if self.kids.is_empty() {
            return Err(AssemblyError::Empty);
        }
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        let info_id = self.doc.add_object(dictionary! {
            "Producer" => Object::string_literal(concat!("heicpress ", env!("CARGO_PKG_VERSION"))),
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.trailer.set("Info", info_id);

        let mut buf = Vec::new();
        self.doc
            .save_to(&mut buf)
            .map_err(|e| AssemblyError::Pdf(e.to_string()))?;
        debug!("Assembled {}-page document ({} bytes)", count, buf.len());
        Ok(buf)
    }
}
