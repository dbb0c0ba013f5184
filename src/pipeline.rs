use image::{imageops, DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::debug::{self as viz, DebugSink};
use crate::detect::{get_contours, get_page_extents, ContourInfo, MaskStages};
use crate::error::{DewarpError, Result};
use crate::image_impl::{ImageBackend, RustBackend};
use crate::keypoints::{destination_points, keypoints_from_samples, sample_spans};
use crate::model::{default_params, project_keypoints};
use crate::preprocess::resize_to_screen;
use crate::remap::remap_image;
use crate::solver::{get_page_dims, optimize_params};
use crate::spans::{assemble_spans, Span};
use crate::types::{DewarpConfig, MaskType};

/// Fewer text spans than this triggers a second pass looking for ruled lines.
const MIN_TEXT_SPANS: usize = 3;

/// Summary of one dewarping run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DewarpReport {
    pub input_width: u32,
    pub input_height: u32,
    pub reduced_width: u32,
    pub reduced_height: u32,
    /// Blob kind the spans were built from.
    pub mode: MaskType,
    pub contours: usize,
    pub spans: usize,
    pub points: usize,
    pub initial_objective: Option<f64>,
    pub final_objective: Option<f64>,
    pub iterations: usize,
    pub page_dims: Option<(f64, f64)>,
    pub output_width: u32,
    pub output_height: u32,
    /// False when the optimiser hit its budget before converging.
    pub converged: bool,
    /// True when no spans were found and the input was passed through.
    pub fallback: bool,
    pub dpi: u32,
}

#[derive(Debug, Clone)]
pub struct DewarpOutput {
    pub image: DynamicImage,
    pub report: DewarpReport,
}

pub struct DewarpPipeline<B: ImageBackend = RustBackend> {
    backend: B,
    config: DewarpConfig,
}

impl DewarpPipeline<RustBackend> {
    pub fn new(config: DewarpConfig) -> Result<Self> {
        Self::with_backend(RustBackend, config)
    }
}

impl<B: ImageBackend> DewarpPipeline<B> {
    pub fn with_backend(backend: B, config: DewarpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { backend, config })
    }

    pub fn config(&self) -> &DewarpConfig {
        &self.config
    }

    /// Blob detection plus span assembly for one mask type.
    fn find_spans(
        &self,
        small: &RgbImage,
        pagemask: &image::GrayImage,
        mask_type: MaskType,
        sink: &DebugSink,
        step_base: f32,
    ) -> (Vec<ContourInfo>, Vec<Span>) {
        let mut stages = MaskStages::default();
        let want_stages = sink.enabled(3);
        let (_, mut cinfo) = get_contours(
            &self.backend,
            small,
            pagemask,
            mask_type,
            &self.config,
            want_stages.then_some(&mut stages),
        );
        for (k, (name, img)) in stages.stages.iter().enumerate() {
            let step = format!("{:.1}", step_base + 0.1 * (k + 1) as f32);
            sink.save_gray(3, &step, name, img);
        }
        if sink.enabled(2) {
            sink.save_rgb(2, "1", "contours", &viz::visualize_contours(small, &cinfo));
        }

        let spans = assemble_spans(&mut cinfo, &self.config);
        if sink.enabled(2) {
            sink.save_rgb(2, "2", "spans", &viz::visualize_spans(small, pagemask, &cinfo, &spans));
        }
        (cinfo, spans)
    }

    /// Flatten `img`, writing debug renderings through `sink`.
    #[instrument(skip_all, fields(width = img.width(), height = img.height()))]
    pub fn run(&self, img: &RgbImage, sink: &DebugSink) -> Result<DewarpOutput> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(DewarpError::InvalidImageFormat(format!(
                "image has zero size ({}x{})",
                width, height
            )));
        }
        let cfg = &self.config;

        let (small, _) = resize_to_screen(img, cfg.max_screen_width, cfg.max_screen_height);
        info!(
            width,
            height,
            reduced_width = small.width(),
            reduced_height = small.height(),
            "Loaded image"
        );
        sink.save_rgb(3, "0.0", "original", &small);

        let extents = get_page_extents(small.width(), small.height(), cfg);

        let mut mode = MaskType::Text;
        let (mut cinfo, mut spans) =
            self.find_spans(&small, &extents.mask, MaskType::Text, sink, 0.0);
        if spans.len() < MIN_TEXT_SPANS {
            info!(text_spans = spans.len(), "Detecting lines because too few text spans");
            let (line_cinfo, line_spans) =
                self.find_spans(&small, &extents.mask, MaskType::Line, sink, 0.3);
            if line_spans.len() > spans.len() {
                mode = MaskType::Line;
                cinfo = line_cinfo;
                spans = line_spans;
            }
        }

        let mut report = DewarpReport {
            input_width: width,
            input_height: height,
            reduced_width: small.width(),
            reduced_height: small.height(),
            mode,
            contours: cinfo.len(),
            spans: spans.len(),
            points: 0,
            initial_objective: None,
            final_objective: None,
            iterations: 0,
            page_dims: None,
            output_width: width,
            output_height: height,
            converged: true,
            fallback: false,
            dpi: cfg.output_dpi,
        };

        if spans.is_empty() {
            warn!("No valid spans detected; returning grayscale input");
            report.fallback = true;
            let gray = imageops::grayscale(img);
            return Ok(DewarpOutput {
                image: DynamicImage::ImageLuma8(gray),
                report,
            });
        }

        let small_size = small.dimensions();
        let span_points = sample_spans(small_size, &cinfo, &spans, cfg.span_px_per_step);
        report.points = span_points.iter().map(Vec::len).sum();
        info!(spans = spans.len(), points = report.points, mode = %mode, "Sampled spans");

        let keypoints = keypoints_from_samples(small_size, &extents.outline, &span_points);
        debug!(
            text_angle_deg = keypoints.x_dir.y.atan2(keypoints.x_dir.x).to_degrees(),
            "Page frame"
        );
        if sink.enabled(2) {
            let display = viz::visualize_span_points(&small, &span_points, &keypoints.corners);
            sink.save_rgb(2, "3", "span_points", &display);
        }

        let initial = default_params(
            &keypoints.corners,
            &keypoints.ycoords,
            &keypoints.xcoords,
            cfg.focal_length,
        )?;
        let dstpoints = destination_points(&keypoints.corners, &span_points);

        if sink.enabled(1) {
            let index = initial.layout.keypoint_index();
            let projected = project_keypoints(&initial.params, &index, cfg.focal_length);
            let display = viz::draw_correspondences(&small, &dstpoints, &projected);
            sink.save_rgb(1, "4", "keypoints_before", &display);
        }

        let outcome = optimize_params(
            &dstpoints,
            &initial.layout,
            initial.params,
            cfg.focal_length,
            cfg.optimizer_max_iterations,
        );
        report.initial_objective = Some(outcome.initial_objective);
        report.final_objective = Some(outcome.final_objective);
        report.iterations = outcome.iterations;
        debug!(evaluations = outcome.evaluations, "Objective evaluations");
        report.converged = outcome.converged;

        if sink.enabled(1) {
            let index = initial.layout.keypoint_index();
            let projected = project_keypoints(&outcome.params, &index, cfg.focal_length);
            let display = viz::draw_correspondences(&small, &dstpoints, &projected);
            sink.save_rgb(1, "5", "keypoints_after", &display);
        }

        let page_dims = get_page_dims(
            &keypoints.corners,
            initial.rough_dims,
            &outcome.params,
            cfg.focal_length,
        );
        report.page_dims = Some(page_dims);

        let output = remap_image(
            &self.backend,
            img,
            page_dims,
            &outcome.params,
            cfg.focal_length,
            cfg.output_zoom,
            cfg.remap_decimate,
            cfg.adaptive_winsz,
        )?;
        report.output_width = output.width();
        report.output_height = output.height();
        debug!(
            output_width = report.output_width,
            output_height = report.output_height,
            "Remapped page"
        );

        if sink.enabled(1) {
            sink.save_rgb(1, "6", "output", &viz::output_preview(&output, small.height()));
        }

        Ok(DewarpOutput {
            image: DynamicImage::ImageRgb8(output),
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_zero_size_image_is_rejected() {
        let pipeline = DewarpPipeline::new(DewarpConfig::default()).unwrap();
        let result = pipeline.run(&RgbImage::new(0, 10), &DebugSink::disabled());
        assert!(matches!(result, Err(DewarpError::InvalidImageFormat(_))));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = DewarpConfig {
            remap_decimate: 0,
            ..DewarpConfig::default()
        };
        assert!(matches!(DewarpPipeline::new(config), Err(DewarpError::Config(_))));
    }

    #[test]
    fn test_blank_page_falls_back() {
        let pipeline = DewarpPipeline::new(DewarpConfig::default()).unwrap();
        let img = RgbImage::from_pixel(120, 80, Rgb([240, 240, 240]));
        let out = pipeline.run(&img, &DebugSink::disabled()).unwrap();

        assert!(out.report.fallback);
        assert_eq!(out.report.spans, 0);
        match out.image {
            DynamicImage::ImageLuma8(gray) => assert_eq!(gray.dimensions(), (120, 80)),
            other => panic!("expected Luma8, got {:?}", other.color()),
        }
    }
}
