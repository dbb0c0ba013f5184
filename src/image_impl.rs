//! Image primitive layer.
//!
//! Every raster operation the pipeline needs goes through [`ImageBackend`],
//! so an accelerated implementation can be dropped in without touching the
//! geometry. [`RustBackend`] is the pure Rust implementation built on the
//! `image` and `imageproc` crates.

use image::imageops;
use image::{GrayImage, RgbImage};
use ndarray::Array2;

use crate::contours::{self, Contour};
use crate::interp;
use crate::preprocess;

pub trait ImageBackend {
    fn to_gray(&self, img: &RgbImage) -> GrayImage {
        imageops::grayscale(img)
    }

    /// Mean-C threshold; see [`preprocess::adaptive_threshold`].
    fn adaptive_threshold(&self, gray: &GrayImage, winsz: u32, c: f64, invert: bool) -> GrayImage;

    fn dilate(&self, mask: &GrayImage, kw: u32, kh: u32) -> GrayImage;

    fn erode(&self, mask: &GrayImage, kw: u32, kh: u32) -> GrayImage;

    /// Outer contours of 8-connected foreground regions.
    fn find_contours(&self, mask: &GrayImage) -> Vec<Contour>;

    fn remap_gray(&self, src: &GrayImage, map_x: &Array2<f32>, map_y: &Array2<f32>) -> GrayImage;

    fn remap_rgb(&self, src: &RgbImage, map_x: &Array2<f32>, map_y: &Array2<f32>) -> RgbImage;

    /// Bicubic upsampling of a coordinate map.
    fn resize_map(&self, map: &Array2<f32>, width: usize, height: usize) -> Array2<f32>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RustBackend;

impl ImageBackend for RustBackend {
    fn adaptive_threshold(&self, gray: &GrayImage, winsz: u32, c: f64, invert: bool) -> GrayImage {
        preprocess::adaptive_threshold(gray, winsz, c, invert)
    }

    fn dilate(&self, mask: &GrayImage, kw: u32, kh: u32) -> GrayImage {
        preprocess::dilate(mask, kw, kh)
    }

    fn erode(&self, mask: &GrayImage, kw: u32, kh: u32) -> GrayImage {
        preprocess::erode(mask, kw, kh)
    }

    fn find_contours(&self, mask: &GrayImage) -> Vec<Contour> {
        contours::find_contours(mask)
    }

    fn remap_gray(&self, src: &GrayImage, map_x: &Array2<f32>, map_y: &Array2<f32>) -> GrayImage {
        interp::remap_gray(src, map_x, map_y)
    }

    fn remap_rgb(&self, src: &RgbImage, map_x: &Array2<f32>, map_y: &Array2<f32>) -> RgbImage {
        interp::remap_rgb(src, map_x, map_y)
    }

    fn resize_map(&self, map: &Array2<f32>, width: usize, height: usize) -> Array2<f32> {
        interp::resize_map(map, width, height)
    }
}
