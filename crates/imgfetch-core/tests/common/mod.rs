#![allow(dead_code)]

pub mod image_server;

use image::{DynamicImage, Rgba, RgbaImage};
use imgfetch_core::decode::encode_png;

/// Solid-colour PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255])));
    encode_png(&img).expect("encode png")
}
