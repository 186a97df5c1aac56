//! Geometry: resize, cover-crop or stretch a [`Bitmap`] into a target box.
//!
//! Sizing is split from pixel work: [`plan`] turns source dimensions plus a
//! [`TransformConfig`] into a [`Plan`] without touching pixels, and [`apply`]
//! executes it. Crop windows are measured in source pixels, so the largest
//! buffer ever allocated is the source or the target box. Errors here are
//! never fatal to a task; the caller keeps the untransformed bitmap.

use crate::config::{FitMode, TransformConfig};
use crate::error::TransformError;
use crate::pipeline::decode::Bitmap;
use image::imageops::{self, FilterType};
use tracing::debug;

const FILTER: FilterType = FilterType::Lanczos3;

/// Resolved geometry for one bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Output equals input.
    Passthrough,
    /// Resample to exactly `width` x `height`.
    Resize { width: u32, height: u32 },
    /// Cut a `window` at `(x, y)` out of the source, then resample it to
    /// exactly `width` x `height`. The window is in source pixels, so no
    /// buffer larger than the source or the box is ever allocated.
    CoverCrop {
        x: u32,
        y: u32,
        window: (u32, u32),
        width: u32,
        height: u32,
    },
}

impl Plan {
    /// Dimensions of the bitmap the plan produces from a `source`-sized one.
    pub fn output_dimensions(&self, source: (u32, u32)) -> (u32, u32) {
        match *self {
            Plan::Passthrough => source,
            Plan::Resize { width, height } | Plan::CoverCrop { width, height, .. } => {
                (width, height)
            }
        }
    }
}

/// Compute the geometry for a `source`-sized bitmap.
pub fn plan(source: (u32, u32), config: &TransformConfig) -> Result<Plan, TransformError> {
    if config.is_passthrough() {
        return Ok(Plan::Passthrough);
    }
    let (sw, sh) = source;
    if sw == 0 || sh == 0 {
        return Err(TransformError::EmptySource);
    }
    if config.target_width == Some(0) || config.target_height == Some(0) {
        return Err(TransformError::ZeroTarget {
            width: config.target_width.unwrap_or(sw),
            height: config.target_height.unwrap_or(sh),
        });
    }

    let plan = match config.fit_mode {
        FitMode::Bound => {
            let fx = config.target_width.map(|w| w as f64 / sw as f64);
            let fy = config.target_height.map(|h| h as f64 / sh as f64);
            let scale = [fx, fy].into_iter().flatten().fold(1.0_f64, f64::min);
            resize_or_passthrough(source, (scaled(sw, scale), scaled(sh, scale)))
        }
        FitMode::Crop => {
            // A missing dimension falls back to the source's own size.
            let tw = config.target_width.unwrap_or(sw);
            let th = config.target_height.unwrap_or(sh);
            let scale = (tw as f64 / sw as f64).max(th as f64 / sh as f64);
            let window = (unscaled(tw, scale).min(sw), unscaled(th, scale).min(sh));
            if window == source {
                resize_or_passthrough(source, (tw, th))
            } else {
                Plan::CoverCrop {
                    x: (sw - window.0) / 2,
                    y: (sh - window.1) / 2,
                    window,
                    width: tw,
                    height: th,
                }
            }
        }
        FitMode::Stretch => {
            let tw = config.target_width.unwrap_or(sw);
            let th = config.target_height.unwrap_or(sh);
            resize_or_passthrough(source, (tw, th))
        }
    };
    Ok(plan)
}

fn scaled(len: u32, scale: f64) -> u32 {
    ((len as f64 * scale).round() as u32).max(1)
}

/// Source pixels covered by `len` output pixels at `scale`.
fn unscaled(len: u32, scale: f64) -> u32 {
    ((len as f64 / scale).round() as u32).max(1)
}

fn resize_or_passthrough(source: (u32, u32), target: (u32, u32)) -> Plan {
    if source == target {
        Plan::Passthrough
    } else {
        Plan::Resize {
            width: target.0,
            height: target.1,
        }
    }
}

/// Apply `config` to `bitmap`. EXIF metadata is carried over unchanged.
pub fn apply(bitmap: Bitmap, config: &TransformConfig) -> Result<Bitmap, TransformError> {
    let plan = plan(bitmap.dimensions(), config)?;
    Ok(apply_plan(bitmap, plan))
}

/// Execute a precomputed [`Plan`]. Infallible: all validation happens in [`plan`].
pub fn apply_plan(bitmap: Bitmap, plan: Plan) -> Bitmap {
    let (sw, sh) = bitmap.dimensions();
    debug!("Transform {}x{} -> {:?}", sw, sh, plan);
    let pixels = match plan {
        Plan::Passthrough => return bitmap,
        Plan::Resize { width, height } => imageops::resize(bitmap.pixels(), width, height, FILTER),
        Plan::CoverCrop {
            x,
            y,
            window,
            width,
            height,
        } => {
            let cropped = imageops::crop_imm(bitmap.pixels(), x, y, window.0, window.1).to_image();
            if window == (width, height) {
                cropped
            } else {
                imageops::resize(&cropped, width, height, FILTER)
            }
        }
    };
    bitmap.with_pixels(pixels)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn dimensions_strategy() -> impl Strategy<Value = (u32, u32)> {
        (1u32..=5000, 1u32..=5000)
    }

    fn target_strategy() -> impl Strategy<Value = (Option<u32>, Option<u32>)> {
        (
            proptest::option::of(1u32..=4000),
            proptest::option::of(1u32..=4000),
        )
            .prop_filter("at least one dimension", |(w, h)| {
                w.is_some() || h.is_some()
            })
    }

    proptest! {
        /// Property: Bound output never exceeds the source on either axis.
        #[test]
        fn prop_bound_never_upscales(
            source in dimensions_strategy(),
            (w, h) in target_strategy(),
        ) {
            let cfg = TransformConfig { target_width: w, target_height: h, ..TransformConfig::default() };
            let (ow, oh) = plan(source, &cfg).unwrap().output_dimensions(source);
            prop_assert!(ow <= source.0 && oh <= source.1);
            if let Some(w) = w { prop_assert!(ow <= w); }
            if let Some(h) = h { prop_assert!(oh <= h); }
        }

        /// Property: Bound preserves aspect ratio up to rounding.
        #[test]
        fn prop_bound_preserves_aspect(
            source in dimensions_strategy(),
            (w, h) in target_strategy(),
        ) {
            let cfg = TransformConfig { target_width: w, target_height: h, ..TransformConfig::default() };
            let (ow, oh) = plan(source, &cfg).unwrap().output_dimensions(source);
            let (sw, sh) = (source.0 as i64, source.1 as i64);
            let skew = (ow as i64 * sh - oh as i64 * sw).abs();
            prop_assert!(skew <= sw + sh, "{}x{} -> {}x{}", sw, sh, ow, oh);
        }

        /// Property: Crop with both dimensions yields exactly the box.
        #[test]
        fn prop_crop_hits_the_box(
            source in dimensions_strategy(),
            w in 1u32..=4000,
            h in 1u32..=4000,
        ) {
            let cfg = TransformConfig {
                target_width: Some(w),
                target_height: Some(h),
                fit_mode: FitMode::Crop,
                ..TransformConfig::default()
            };
            let p = plan(source, &cfg).unwrap();
            prop_assert_eq!(p.output_dimensions(source), (w, h));
            if let Plan::CoverCrop { x, y, window, .. } = p {
                prop_assert!(x + window.0 <= source.0 && y + window.1 <= source.1);
            }
        }
    }
}
