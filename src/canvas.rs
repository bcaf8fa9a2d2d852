use bevy::math::Vec2;
use image::imageops::{self, FilterType};
use image::{Pixel, Rgba, RgbaImage};

/// `0xRRGGBB` to an opaque pixel.
pub const fn rgb(hex: u32) -> Rgba<u8> {
    Rgba([(hex >> 16) as u8, (hex >> 8) as u8, hex as u8, 255])
}

pub fn clear(canvas: &mut RgbaImage, color: Rgba<u8>) {
    for pixel in canvas.pixels_mut() {
        *pixel = color;
    }
}

/// Source-over blend of one pixel; out-of-bounds writes are dropped.
pub fn blend(canvas: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    canvas.get_pixel_mut(x as u32, y as u32).blend(&color);
}

pub fn fill_rect(canvas: &mut RgbaImage, min: Vec2, max: Vec2, color: Rgba<u8>) {
    let (x0, x1) = (min.x.round() as i64, max.x.round() as i64);
    let (y0, y1) = (min.y.round() as i64, max.y.round() as i64);
    let x0 = x0.max(0);
    let y0 = y0.max(0);
    let x1 = x1.min(canvas.width() as i64);
    let y1 = y1.min(canvas.height() as i64);
    for y in y0..y1 {
        for x in x0..x1 {
            blend(canvas, x, y, color);
        }
    }
}

pub fn stroke_rect(canvas: &mut RgbaImage, min: Vec2, max: Vec2, color: Rgba<u8>, width: u32) {
    dashed_rect(canvas, min, max, color, width, None);
}

/// Rectangle outline; `dash` is `(on, off)` in pixels, `None` for solid.
pub fn dashed_rect(
    canvas: &mut RgbaImage,
    min: Vec2,
    max: Vec2,
    color: Rgba<u8>,
    width: u32,
    dash: Option<(u32, u32)>,
) {
    let (x0, y0) = (min.x.round() as i64, min.y.round() as i64);
    let (x1, y1) = (max.x.round() as i64 - 1, max.y.round() as i64 - 1);
    if x1 < x0 || y1 < y0 {
        return;
    }
    let on = |step: i64| match dash {
        Some((on, off)) if on + off > 0 => step.rem_euclid((on + off) as i64) < on as i64,
        _ => true,
    };
    for w in 0..width as i64 {
        for x in x0..=x1 {
            if on(x - x0) {
                blend(canvas, x, y0 + w, color);
                blend(canvas, x, y1 - w, color);
            }
        }
        for y in y0..=y1 {
            if on(y - y0) {
                blend(canvas, x0 + w, y, color);
                blend(canvas, x1 - w, y, color);
            }
        }
    }
}

pub fn fill_disc(canvas: &mut RgbaImage, center: Vec2, radius: f32, color: Rgba<u8>) {
    let r2 = radius * radius;
    for_circle_bounds(canvas, center, radius, |canvas, x, y, d2| {
        if d2 <= r2 {
            blend(canvas, x, y, color);
        }
    });
}

/// One-pixel ring at `radius`.
pub fn stroke_circle(canvas: &mut RgbaImage, center: Vec2, radius: f32, color: Rgba<u8>) {
    let outer = (radius + 0.5) * (radius + 0.5);
    let inner = (radius - 0.5).max(0.0).powi(2);
    for_circle_bounds(canvas, center, radius + 1.0, |canvas, x, y, d2| {
        if d2 <= outer && d2 >= inner {
            blend(canvas, x, y, color);
        }
    });
}

fn for_circle_bounds(
    canvas: &mut RgbaImage,
    center: Vec2,
    radius: f32,
    mut f: impl FnMut(&mut RgbaImage, i64, i64, f32),
) {
    let x0 = (center.x - radius).floor().max(0.0) as i64;
    let y0 = (center.y - radius).floor().max(0.0) as i64;
    let x1 = ((center.x + radius).ceil() as i64).min(canvas.width() as i64 - 1);
    let y1 = ((center.y + radius).ceil() as i64).min(canvas.height() as i64 - 1);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f32 + 0.5 - center.x;
            let dy = y as f32 + 0.5 - center.y;
            f(canvas, x, y, dx * dx + dy * dy);
        }
    }
}

pub fn vline(canvas: &mut RgbaImage, x: i64, color: Rgba<u8>) {
    for y in 0..canvas.height() as i64 {
        blend(canvas, x, y, color);
    }
}

pub fn hline(canvas: &mut RgbaImage, y: i64, color: Rgba<u8>) {
    for x in 0..canvas.width() as i64 {
        blend(canvas, x, y, color);
    }
}

/// Alpha-blends `src` so that its centre lands on `center`.
pub fn blit_centered(canvas: &mut RgbaImage, src: &RgbaImage, center: Vec2) {
    let left = (center.x - src.width() as f32 / 2.0).round() as i64;
    let top = (center.y - src.height() as f32 / 2.0).round() as i64;
    imageops::overlay(canvas, src, left, top);
}

/// Visual parameters applied to a sprite's rendered copy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpriteParams {
    pub scale_x: f32,
    pub scale_y: f32,
    /// Degrees, clockwise on screen.
    pub rotation: f32,
    pub opacity: f32,
}

impl SpriteParams {
    pub const IDENTITY: Self = Self {
        scale_x: 1.0,
        scale_y: 1.0,
        rotation: 0.0,
        opacity: 1.0,
    };

    /// Non-positive or non-finite scales have no defined footprint.
    pub fn is_drawable(&self) -> bool {
        self.scale_x.is_finite()
            && self.scale_y.is_finite()
            && self.scale_x > 0.0
            && self.scale_y > 0.0
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Hashable identity of the parameters.
    pub fn key(&self) -> [u32; 4] {
        [
            self.scale_x.to_bits(),
            self.scale_y.to_bits(),
            self.rotation.to_bits(),
            self.opacity.to_bits(),
        ]
    }
}

/// Largest rendered copy, in pixels, that `transform_sprite` will allocate.
pub const MAX_SPRITE_PIXELS: u64 = 4096 * 4096;

/// Builds a rendered copy of `src`: scale, then rotate (expanding the canvas
/// to fit), then multiply alpha. `src` itself is never modified. `None` when
/// the scaled or rotated copy would exceed `MAX_SPRITE_PIXELS`.
pub fn transform_sprite(src: &RgbaImage, params: &SpriteParams) -> Option<RgbaImage> {
    let scaled_w = (src.width() as f64 * params.scale_x as f64).round().max(1.0);
    let scaled_h = (src.height() as f64 * params.scale_y as f64).round().max(1.0);
    let rotated = params.rotation.rem_euclid(360.0) != 0.0;
    let (out_w, out_h) = if rotated {
        rotated_bounds(scaled_w, scaled_h, params.rotation)
    } else {
        (scaled_w, scaled_h)
    };
    if !within_budget(scaled_w, scaled_h) || !within_budget(out_w, out_h) {
        return None;
    }
    let (width, height) = (scaled_w as u32, scaled_h as u32);
    let mut out = if (width, height) == src.dimensions() {
        src.clone()
    } else {
        imageops::resize(src, width, height, FilterType::Lanczos3)
    };
    if rotated {
        out = rotate_expand(&out, params.rotation);
    }
    let opacity = params.opacity.clamp(0.0, 1.0);
    if opacity < 1.0 {
        for pixel in out.pixels_mut() {
            pixel.0[3] = (pixel.0[3] as f32 * opacity).round() as u8;
        }
    }
    Some(out)
}

fn within_budget(width: f64, height: f64) -> bool {
    width.is_finite() && height.is_finite() && width * height <= MAX_SPRITE_PIXELS as f64
}

fn rotated_bounds(width: f64, height: f64, degrees: f32) -> (f64, f64) {
    let (sin, cos) = (degrees as f64).to_radians().sin_cos();
    (
        (width * cos.abs() + height * sin.abs()).round().max(1.0),
        (width * sin.abs() + height * cos.abs()).round().max(1.0),
    )
}

/// Nearest-neighbour rotation by `degrees` clockwise, on a canvas grown to
/// hold the whole rotated image.
fn rotate_expand(src: &RgbaImage, degrees: f32) -> RgbaImage {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (w, h) = (src.width() as f32, src.height() as f32);
    let (out_w, out_h) = rotated_bounds(w as f64, h as f64, degrees);
    let (out_w, out_h) = (out_w as u32, out_h as u32);
    let mut out = RgbaImage::new(out_w, out_h);
    let (src_cx, src_cy) = (w / 2.0, h / 2.0);
    let (dst_cx, dst_cy) = (out_w as f32 / 2.0, out_h as f32 / 2.0);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = x as f32 + 0.5 - dst_cx;
        let dy = y as f32 + 0.5 - dst_cy;
        let sx = cos * dx + sin * dy + src_cx;
        let sy = -sin * dx + cos * dy + src_cy;
        if sx >= 0.0 && sy >= 0.0 && sx < w && sy < h {
            *pixel = *src.get_pixel(sx as u32, sy as u32);
        }
    }
    out
}
