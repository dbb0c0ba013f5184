//! # Dewarp - Pure Rust page dewarping
//!
//! Flattens photographs of curved or tilted book pages. The page is modelled
//! as a cubic sheet seen through a pinhole camera; sheet shape and camera
//! pose are fitted to the geometry of detected text lines and the photo is
//! resampled onto the flat sheet.
//!
//! ## Features
//!
//! - **Pure Rust**: built on `image`, `imageproc`, `nalgebra` and `ndarray`
//! - **Swappable primitives**: raster operations sit behind [`ImageBackend`]
//! - **Graceful fallback**: pages without detectable text come back as a
//!   grayscale copy instead of an error
//! - **Diagnostics**: optional debug renderings of every stage
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dewarp::{DewarpConfig, Dewarper};
//!
//! let dewarper = Dewarper::new(DewarpConfig::default())?;
//! let output = dewarper.dewarp_path("page.jpg")?;
//!
//! println!("{} spans, converged: {}", output.report.spans, output.report.converged);
//! output.image.save("page_dewarped.png")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Core modules
mod contours;
mod debug;
mod detect;
mod error;
mod geometry;
mod image_impl;
mod interp;
mod keypoints;
mod model;
mod pipeline;
mod powell;
mod preprocess;
mod remap;
mod solver;
mod spans;
mod types;

// Public API exports
pub use crate::error::{DewarpError, Result};
pub use crate::image_impl::{ImageBackend, RustBackend};
pub use crate::pipeline::{DewarpOutput, DewarpReport};
pub use crate::types::{DewarpConfig, MaskType};

pub use crate::contours::Contour;
pub use crate::geometry::{norm2pix, pix2norm, Point2, Rect};

use std::path::Path;

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use tracing::instrument;

use crate::debug::DebugSink;
use crate::pipeline::DewarpPipeline;

/// Main dewarping interface
pub struct Dewarper<B: ImageBackend = RustBackend> {
    inner: DewarpPipeline<B>,
}

impl Dewarper<RustBackend> {
    /// Create a dewarper using the pure Rust backend.
    pub fn new(config: DewarpConfig) -> Result<Self> {
        Ok(Self {
            inner: DewarpPipeline::new(config)?,
        })
    }
}

impl<B: ImageBackend> Dewarper<B> {
    pub fn with_backend(backend: B, config: DewarpConfig) -> Result<Self> {
        Ok(Self {
            inner: DewarpPipeline::with_backend(backend, config)?,
        })
    }

    pub fn config(&self) -> &DewarpConfig {
        self.inner.config()
    }

    fn sink(&self, prefix: &str) -> DebugSink {
        let cfg = self.inner.config();
        DebugSink::new(cfg.debug_level, cfg.debug_dir.clone(), prefix)
    }

    /// Flatten an in-memory image. Any color type is accepted and converted
    /// to 8-bit RGB first.
    pub fn dewarp(&self, img: &DynamicImage) -> Result<DewarpOutput> {
        self.dewarp_named(img, "page")
    }

    /// Like [`Dewarper::dewarp`], naming debug images after `prefix`.
    pub fn dewarp_named(&self, img: &DynamicImage, prefix: &str) -> Result<DewarpOutput> {
        let rgb = img.to_rgb8();
        self.inner.run(&rgb, &self.sink(prefix))
    }

    /// Load and flatten an image file.
    #[instrument(skip_all, fields(path = %image_path.as_ref().display()))]
    pub fn dewarp_path<P: AsRef<Path>>(&self, image_path: P) -> Result<DewarpOutput> {
        let path = image_path.as_ref();
        let img = image::open(path)?;
        let prefix = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("page")
            .to_string();
        self.dewarp_named(&img, &prefix)
    }

    /// Decode an encoded image (PNG, JPEG) from memory and flatten it.
    #[instrument(skip_all, fields(data_len = image_data.len()))]
    pub fn dewarp_from_bytes(&self, image_data: &[u8]) -> Result<DewarpOutput> {
        use image::ImageReader;
        use std::io::Cursor;

        let img = ImageReader::new(Cursor::new(image_data))
            .with_guessed_format()?
            .decode()?;
        self.dewarp(&img)
    }

    /// Flatten raw interleaved 8-bit pixels with 1 (gray), 3 (RGB) or
    /// 4 (RGBA) channels.
    pub fn dewarp_raw(
        &self,
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<u8>,
    ) -> Result<DewarpOutput> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(DewarpError::InvalidImageFormat(format!(
                "expected {} bytes for {}x{}x{}, got {}",
                expected,
                width,
                height,
                channels,
                data.len()
            )));
        }

        let img = match channels {
            1 => GrayImage::from_raw(width, height, data).map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
            4 => RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8),
            n => {
                return Err(DewarpError::InvalidImageFormat(format!(
                    "unsupported channel count {}",
                    n
                )))
            }
        }
        .ok_or_else(|| DewarpError::InvalidImageFormat("failed to wrap raw pixels".to_string()))?;

        self.dewarp(&img)
    }
}

/// Convenience: flatten one image with the default configuration.
pub fn dewarp_image(img: &DynamicImage) -> Result<DynamicImage> {
    Ok(Dewarper::new(DewarpConfig::default())?.dewarp(img)?.image)
}
