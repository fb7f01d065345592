use std::io::Cursor;

use color_eyre::{Result, eyre::bail};
use image::{
    DynamicImage, ImageFormat, Rgba, RgbaImage,
    imageops::{self, FilterType},
};
use log::debug;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{STICKER_FILE_SIZE_LIMIT, STICKER_MAX_SIZE};

const ROUNDED_CORNER_RADIUS: u32 = 50;
const MIN_SHRINK_SIZE: u32 = 128;
const SHADOW_OFFSET: (i64, i64) = (5, 5);
const SHADOW_BLUR: u32 = 10;
const SHADOW_ALPHA: u32 = 150;
pub const OUTLINE_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const DEFAULT_OUTLINE_WIDTH: u32 = 10;

#[derive(
    Debug,
    Clone,
    Copy,
    Display,
    EnumString,
    clap::ValueEnum,
    Serialize,
    Deserialize,
    Hash,
    PartialEq,
    Eq,
    EnumIter,
    Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BackgroundStyle {
    #[default]
    Transparent,
    White,
    Gradient,
    Circle,
    Rounded,
}

/// Effects applied on top of the background before resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StickerEffects {
    pub background: BackgroundStyle,
    /// Drop shadow, skipped for circle and rounded backgrounds.
    pub shadow: bool,
    /// Outline width in pixels.
    pub outline: Option<u32>,
}

impl StickerEffects {
    pub fn new(background: BackgroundStyle) -> Self {
        Self {
            background,
            shadow: true,
            outline: None,
        }
    }
}

/// Turns a generated image into a Telegram-ready PNG with the default
/// effects: the background plus a drop shadow.
pub fn prepare_sticker(bytes: &[u8], background: BackgroundStyle) -> Result<Vec<u8>> {
    prepare_sticker_with(bytes, StickerEffects::new(background))
}

/// Background, outline and shadow, then at most 512px on a square canvas,
/// small enough for upload.
pub fn prepare_sticker_with(bytes: &[u8], effects: StickerEffects) -> Result<Vec<u8>> {
    let mut image = apply_background(image::load_from_memory(bytes)?.to_rgba8(), effects.background);

    if let Some(width) = effects.outline {
        image = add_outline(&image, width, OUTLINE_COLOR);
    }
    if effects.shadow
        && !matches!(
            effects.background,
            BackgroundStyle::Circle | BackgroundStyle::Rounded
        )
    {
        image = add_shadow(&image, SHADOW_OFFSET, SHADOW_BLUR);
    }

    encode_within_limit(&image, STICKER_FILE_SIZE_LIMIT)
}

/// Encodes at up to 512px, shrinking in 10% steps while the PNG exceeds
/// `limit` bytes.
fn encode_within_limit(image: &RgbaImage, limit: usize) -> Result<Vec<u8>> {
    let mut max_size = STICKER_MAX_SIZE;
    loop {
        let png = encode_png(&fit_to_square(image, max_size))?;
        debug!("Sticker at {max_size}px is {} bytes", png.len());
        if png.len() <= limit {
            return Ok(png);
        }

        max_size = max_size * 9 / 10;
        if max_size < MIN_SHRINK_SIZE {
            bail!("Sticker still exceeds {limit} bytes at {MIN_SHRINK_SIZE}px");
        }
    }
}

/// Blurred translucent copy of the silhouette behind the image. The canvas
/// grows by the offset plus the blur radius on every side.
pub fn add_shadow(image: &RgbaImage, offset: (i64, i64), blur_radius: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let margin = blur_radius as i64;
    let width = w + offset.0.unsigned_abs() as u32 + 2 * blur_radius;
    let height = h + offset.1.unsigned_abs() as u32 + 2 * blur_radius;

    let silhouette = RgbaImage::from_fn(w, h, |x, y| {
        let alpha = image.get_pixel(x, y)[3] as u32 * SHADOW_ALPHA / 255;
        Rgba([0, 0, 0, alpha as u8])
    });
    let mut shadow = RgbaImage::new(width, height);
    imageops::replace(
        &mut shadow,
        &silhouette,
        margin + offset.0.max(0),
        margin + offset.1.max(0),
    );

    let mut canvas = imageops::blur(&shadow, blur_radius as f32);
    imageops::overlay(
        &mut canvas,
        image,
        margin + (-offset.0).max(0),
        margin + (-offset.1).max(0),
    );
    canvas
}

/// Surrounds the visible part of the image with a `width` pixel band of
/// `color`. The canvas grows by `width` on every side.
pub fn add_outline(image: &RgbaImage, width: u32, color: Rgba<u8>) -> RgbaImage {
    let (w, h) = image.dimensions();
    let r = width as i64;
    let disk: Vec<(i64, i64)> = (-r..=r)
        .flat_map(|dx| (-r..=r).map(move |dy| (dx, dy)))
        .filter(|(dx, dy)| dx * dx + dy * dy <= r * r)
        .collect();

    let mut canvas = RgbaImage::from_fn(w + 2 * width, h + 2 * width, |x, y| {
        // source pixel sitting under (x, y) before the image is shifted by `width`
        let (sx, sy) = (x as i64 - r, y as i64 - r);
        let alpha = disk
            .iter()
            .filter_map(|(dx, dy)| {
                let (px, py) = (sx - dx, sy - dy);
                (px >= 0 && py >= 0 && px < w as i64 && py < h as i64)
                    .then(|| image.get_pixel(px as u32, py as u32)[3])
            })
            .max()
            .unwrap_or(0);
        let Rgba([red, green, blue, a]) = color;
        Rgba([red, green, blue, (alpha as u32 * a as u32 / 255) as u8])
    });
    imageops::overlay(&mut canvas, image, r, r);
    canvas
}

pub fn apply_background(image: RgbaImage, style: BackgroundStyle) -> RgbaImage {
    match style {
        BackgroundStyle::Transparent => image,
        BackgroundStyle::White => {
            let mut background =
                RgbaImage::from_pixel(image.width(), image.height(), Rgba([255, 255, 255, 255]));
            imageops::overlay(&mut background, &image, 0, 0);
            background
        }
        BackgroundStyle::Gradient => {
            let mut background = gradient(image.width(), image.height());
            imageops::overlay(&mut background, &image, 0, 0);
            background
        }
        BackgroundStyle::Circle => make_circle(&image),
        BackgroundStyle::Rounded => make_rounded(image, ROUNDED_CORNER_RADIUS),
    }
}

/// Light pink at the top fading to light blue at the bottom.
fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |_, y| {
        let t = y as f32 / height as f32;
        Rgba([
            (255.0 - t * 50.0) as u8,
            (200.0 + t * 50.0) as u8,
            (220.0 + t * 35.0) as u8,
            255,
        ])
    })
}

fn make_circle(image: &RgbaImage) -> RgbaImage {
    let size = image.width().min(image.height());
    let x = (image.width() - size) / 2;
    let y = (image.height() - size) / 2;
    let mut square = imageops::crop_imm(image, x, y, size, size).to_image();

    let radius = size as f32 / 2.0;
    for (px, py, pixel) in square.enumerate_pixels_mut() {
        let dx = px as f32 + 0.5 - radius;
        let dy = py as f32 + 0.5 - radius;
        if dx * dx + dy * dy > radius * radius {
            pixel[3] = 0;
        }
    }
    square
}

fn make_rounded(mut image: RgbaImage, radius: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let radius = radius.min(w / 2).min(h / 2) as f32;

    for (px, py, pixel) in image.enumerate_pixels_mut() {
        let x = px as f32 + 0.5;
        let y = py as f32 + 0.5;
        // nearest corner circle centre, only relevant inside the corner boxes
        let cx = x.clamp(radius, w as f32 - radius);
        let cy = y.clamp(radius, h as f32 - radius);
        let (dx, dy) = (x - cx, y - cy);
        if dx * dx + dy * dy > radius * radius {
            pixel[3] = 0;
        }
    }
    image
}

/// Shrinks (never enlarges) to fit `max_size` and centres the result on a
/// transparent square canvas.
pub fn fit_to_square(image: &RgbaImage, max_size: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let scaled = if w > max_size || h > max_size {
        let scale = max_size as f64 / w.max(h) as f64;
        let nw = ((w as f64 * scale).round() as u32).max(1);
        let nh = ((h as f64 * scale).round() as u32).max(1);
        imageops::resize(image, nw, nh, FilterType::Lanczos3)
    } else {
        image.clone()
    };

    let (w, h) = scaled.dimensions();
    if w == h {
        return scaled;
    }

    let size = w.max(h);
    let mut square = RgbaImage::new(size, size);
    imageops::overlay(
        &mut square,
        &scaled,
        ((size - w) / 2) as i64,
        ((size - h) / 2) as i64,
    );
    square
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(image.clone()).write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}
