use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DewarpError, Result};

/// Which kind of foreground the contour extractor looks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskType {
    /// Runs of glyphs, bridged horizontally into word/line blobs.
    Text,
    /// Long thin strokes such as ruled lines or table borders.
    Line,
}

impl MaskType {
    /// Constant subtracted from the local mean by the adaptive threshold.
    pub fn threshold_offset(self) -> f64 {
        match self {
            MaskType::Text => 25.0,
            MaskType::Line => 7.0,
        }
    }
}

impl std::fmt::Display for MaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaskType::Text => f.write_str("text"),
            MaskType::Line => f.write_str("line"),
        }
    }
}

/// All tunables of the dewarping pipeline.
///
/// Distances named "reduced px" are measured on the working copy produced by
/// shrinking the input to fit `max_screen_width` x `max_screen_height`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DewarpConfig {
    /// Reduced px to ignore near the left/right edges.
    pub page_margin_x: u32,
    /// Reduced px to ignore near the top/bottom edges.
    pub page_margin_y: u32,
    pub max_screen_width: u32,
    pub max_screen_height: u32,
    /// Output zoom relative to the original image.
    pub output_zoom: f64,
    /// Stated DPI of the output; reported only, never changes pixels.
    pub output_dpi: u32,
    /// Downscaling factor for the remap grid.
    pub remap_decimate: u32,
    /// Adaptive threshold window in reduced px (odd).
    pub adaptive_winsz: u32,
    pub text_min_width: u32,
    pub text_min_height: u32,
    /// Minimum width/height ratio of a text contour.
    pub text_min_aspect: f64,
    /// Maximum per-column thickness of a text contour.
    pub text_max_thickness: u32,
    /// Max reduced px horizontal overlap of contours in one span.
    pub edge_max_overlap: f64,
    /// Max reduced px length of an edge connecting contours.
    pub edge_max_length: f64,
    /// Cost per degree of angle change (tradeoff against length).
    pub edge_angle_cost: f64,
    /// Max angle change in degrees between linked contours.
    pub edge_max_angle: f64,
    pub span_min_width: f64,
    /// Reduced px spacing when sampling along spans.
    pub span_px_per_step: u32,
    /// Normalized focal length of the camera.
    pub focal_length: f64,
    /// Cap on outer Powell iterations. `None` keeps the evaluation budget only.
    pub optimizer_max_iterations: Option<usize>,
    /// 0 = none, 1 = keypoints and output, 2 = contours and spans, 3 = masks.
    pub debug_level: u8,
    pub debug_dir: PathBuf,
}

impl Default for DewarpConfig {
    fn default() -> Self {
        Self {
            page_margin_x: 0,
            page_margin_y: 0,
            max_screen_width: 1280,
            max_screen_height: 700,
            output_zoom: 1.0,
            output_dpi: 300,
            remap_decimate: 16,
            adaptive_winsz: 55,
            text_min_width: 15,
            text_min_height: 2,
            text_min_aspect: 1.5,
            text_max_thickness: 10,
            edge_max_overlap: 1.0,
            edge_max_length: 100.0,
            edge_angle_cost: 10.0,
            edge_max_angle: 7.5,
            span_min_width: 30.0,
            span_px_per_step: 20,
            focal_length: 1.2,
            optimizer_max_iterations: None,
            debug_level: 0,
            debug_dir: PathBuf::from("."),
        }
    }
}

impl DewarpConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: DewarpConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.adaptive_winsz < 3 || self.adaptive_winsz % 2 == 0 {
            return Err(DewarpError::Config(format!(
                "adaptive_winsz must be odd and >= 3, got {}",
                self.adaptive_winsz
            )));
        }
        if self.remap_decimate == 0 {
            return Err(DewarpError::Config("remap_decimate must be positive".to_string()));
        }
        if self.span_px_per_step == 0 {
            return Err(DewarpError::Config("span_px_per_step must be positive".to_string()));
        }
        if self.max_screen_width == 0 || self.max_screen_height == 0 {
            return Err(DewarpError::Config("screen limits must be positive".to_string()));
        }
        if !(self.output_zoom > 0.0) || !(self.focal_length > 0.0) {
            return Err(DewarpError::Config(
                "output_zoom and focal_length must be positive".to_string(),
            ));
        }
        let non_negative = [
            ("text_min_aspect", self.text_min_aspect),
            ("edge_max_length", self.edge_max_length),
            ("edge_angle_cost", self.edge_angle_cost),
            ("edge_max_angle", self.edge_max_angle),
            ("span_min_width", self.span_min_width),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) {
                return Err(DewarpError::Config(format!("{name} must be >= 0, got {value}")));
            }
        }
        Ok(())
    }
}
