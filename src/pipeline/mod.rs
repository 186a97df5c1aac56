//! Pipeline stages for HEIC-to-JPEG/PDF conversion.
//!
//! Each submodule implements exactly one transformation step so each can be
//! tested on its own and swapped (e.g. a native HEIF decoder) without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ decode ──▶ transform ──▶ encode ─────▶ emit (.jpg)
//! (bytes)   (bitmap)   (geometry)  └▶ document ──▶ emit (.pdf)
//! ```
//!
//! 1. [`input`]     — validate at ingestion; read bytes inside the task
//! 2. [`decode`]    — container → upright RGB bitmap; runs in `spawn_blocking`
//! 3. [`transform`] — Bound / Crop / Stretch; failures fall back to the
//!    untransformed bitmap
//! 4. [`encode`]    — JPEG encoding, optional EXIF re-embedding via [`metadata`]
//! 5. [`document`]  — one page per bitmap, one PDF per assembler

pub mod decode;
pub mod document;
pub mod encode;
pub mod input;
pub mod metadata;
pub mod transform;
