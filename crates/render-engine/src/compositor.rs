//! Frame compositor: draws decoded clip frames and text onto an output canvas.
//!
//! Layers are painted back to front. Each clip frame is cropped, fitted to
//! the canvas preserving aspect, placed by the clip transform, then blended
//! with its effects and opacity applied.

use image::{Rgba, RgbaImage};
use rusttype::{point, Font, Scale};

use cutroom_project_model::{fit_rect, placement, Crop, Effect, TextOverlay, Transform};

/// How one clip frame is drawn.
#[derive(Debug, Clone, Copy)]
pub struct ClipLayer<'a> {
    pub crop: Crop,
    pub transform: Transform,
    /// Final alpha multiplier in `[0, 1]`, transitions included.
    pub opacity: f64,
    pub effects: &'a [Effect],
}

impl Default for ClipLayer<'_> {
    fn default() -> Self {
        Self {
            crop: Crop::default(),
            transform: Transform::default(),
            opacity: 1.0,
            effects: &[],
        }
    }
}

/// The output frame under construction.
#[derive(Debug, Clone)]
pub struct Canvas {
    image: RgbaImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Reset to opaque black.
    pub fn clear(&mut self) {
        for px in self.image.pixels_mut() {
            *px = Rgba([0, 0, 0, 255]);
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Draw a source frame with crop, fit, transform, effects, and opacity.
    pub fn draw(&mut self, src: &RgbaImage, layer: &ClipLayer<'_>) {
        let opacity = layer.opacity.clamp(0.0, 1.0);
        if opacity <= 0.0 || src.width() == 0 || src.height() == 0 {
            return;
        }
        let out_w = self.image.width() as f64;
        let out_h = self.image.height() as f64;

        let crop_rect = layer
            .crop
            .clamped()
            .source_rect(src.width() as f64, src.height() as f64);
        if crop_rect.w < 1.0 || crop_rect.h < 1.0 {
            return;
        }
        let fitted = fit_rect(crop_rect.w, crop_rect.h, out_w, out_h);
        let forward = placement(fitted, &layer.transform, out_w, out_h);
        let Some(inverse) = forward.invert() else {
            return;
        };

        // Only visit output pixels the placed rectangle can reach.
        let corners = [
            forward.apply(fitted.x, fitted.y),
            forward.apply(fitted.x + fitted.w, fitted.y),
            forward.apply(fitted.x, fitted.y + fitted.h),
            forward.apply(fitted.x + fitted.w, fitted.y + fitted.h),
        ];
        let min_x = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
        let min_y = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let max_y = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);
        let x0 = min_x.floor().clamp(0.0, out_w) as u32;
        let x1 = max_x.ceil().clamp(0.0, out_w) as u32;
        let y0 = min_y.floor().clamp(0.0, out_h) as u32;
        let y1 = max_y.ceil().clamp(0.0, out_h) as u32;

        let sx_per_u = crop_rect.w / fitted.w;
        let sy_per_v = crop_rect.h / fitted.h;

        for y in y0..y1 {
            for x in x0..x1 {
                let (u, v) = inverse.apply(x as f64 + 0.5, y as f64 + 0.5);
                if !fitted.contains(u, v) {
                    continue;
                }
                let sx = crop_rect.x + (u - fitted.x) * sx_per_u;
                let sy = crop_rect.y + (v - fitted.y) * sy_per_v;
                let mut px = sample_bilinear(src, sx - 0.5, sy - 0.5);
                apply_effects(&mut px, layer.effects);
                let alpha = px[3] * opacity as f32;
                blend(self.image.get_pixel_mut(x, y), [px[0], px[1], px[2]], alpha);
            }
        }
    }

    /// Draw a text overlay centred on its normalized anchor.
    pub fn draw_text(&mut self, font: &Font<'_>, overlay: &TextOverlay) {
        if overlay.text.is_empty() || overlay.font_size <= 0.0 {
            return;
        }
        let scale = Scale::uniform(overlay.font_size as f32);
        let metrics = font.v_metrics(scale);
        let glyphs: Vec<_> = font
            .layout(&overlay.text, scale, point(0.0, metrics.ascent))
            .collect();
        let text_w = glyphs
            .iter()
            .rev()
            .find_map(|g| g.pixel_bounding_box().map(|b| b.max.x))
            .unwrap_or(0) as f64;
        let text_h = (metrics.ascent - metrics.descent).ceil() as f64;

        let origin_x = (overlay.x * self.image.width() as f64 - text_w / 2.0).round() as i32;
        let origin_y = (overlay.y * self.image.height() as f64 - text_h / 2.0).round() as i32;
        let [r, g, b, a] = overlay.rgba();
        let color = [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0];
        let color_alpha = a as f32 / 255.0;
        let (w, h) = (self.image.width() as i32, self.image.height() as i32);

        for glyph in &glyphs {
            let Some(bb) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|gx, gy, coverage| {
                let px = origin_x + bb.min.x + gx as i32;
                let py = origin_y + bb.min.y + gy as i32;
                if px < 0 || py < 0 || px >= w || py >= h {
                    return;
                }
                blend(
                    self.image.get_pixel_mut(px as u32, py as u32),
                    color,
                    coverage * color_alpha,
                );
            });
        }
    }
}

/// Bilinear sample at continuous pixel-centre coordinates, edges clamped.
/// Channels come back normalized to `[0, 1]`.
fn sample_bilinear(src: &RgbaImage, x: f64, y: f64) -> [f32; 4] {
    let max_x = (src.width() - 1) as f64;
    let max_y = (src.height() - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = (x - x0) as f32;
    let fy = (y - y0) as f32;
    let x0 = x0 as u32;
    let y0 = y0 as u32;
    let x1 = (x0 + 1).min(src.width() - 1);
    let y1 = (y0 + 1).min(src.height() - 1);

    let p00 = src.get_pixel(x0, y0).0;
    let p10 = src.get_pixel(x1, y0).0;
    let p01 = src.get_pixel(x0, y1).0;
    let p11 = src.get_pixel(x1, y1).0;

    let mut out = [0.0f32; 4];
    for c in 0..4 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy) / 255.0;
    }
    out
}

fn luma(px: &[f32; 4]) -> f32 {
    0.2126 * px[0] + 0.7152 * px[1] + 0.0722 * px[2]
}

/// Colour adjustments in list order on normalized RGB.
pub fn apply_effects(px: &mut [f32; 4], effects: &[Effect]) {
    for effect in effects {
        match *effect {
            Effect::Brightness { value } => {
                for c in &mut px[..3] {
                    *c += value as f32;
                }
            }
            Effect::Contrast { value } => {
                for c in &mut px[..3] {
                    *c = (*c - 0.5) * value as f32 + 0.5;
                }
            }
            Effect::Saturation { value } => {
                let l = luma(px);
                for c in &mut px[..3] {
                    *c = l + (*c - l) * value as f32;
                }
            }
            Effect::Grayscale => {
                let l = luma(px);
                px[..3].fill(l);
            }
        }
        for c in &mut px[..3] {
            *c = c.clamp(0.0, 1.0);
        }
    }
}

/// Source-over blend onto an opaque destination.
fn blend(dst: &mut Rgba<u8>, color: [f32; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    for c in 0..3 {
        let under = dst.0[c] as f32 / 255.0;
        let mixed = color[c] * alpha + under * (1.0 - alpha);
        dst.0[c] = (mixed * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(rgba))
    }

    #[test]
    fn test_full_frame_copy() {
        let mut canvas = Canvas::new(8, 8);
        canvas.draw(&solid(16, 16, [200, 10, 20, 255]), &ClipLayer::default());
        assert_eq!(canvas.image().get_pixel(0, 0).0, [200, 10, 20, 255]);
        assert_eq!(canvas.image().get_pixel(7, 7).0, [200, 10, 20, 255]);
    }

    #[test]
    fn test_aspect_fit_letterboxes() {
        // 2:1 source on a square canvas leaves bars top and bottom.
        let mut canvas = Canvas::new(10, 10);
        canvas.draw(&solid(20, 10, [255, 255, 255, 255]), &ClipLayer::default());
        assert_eq!(canvas.image().get_pixel(5, 0).0, [0, 0, 0, 255]);
        assert_eq!(canvas.image().get_pixel(5, 5).0, [255, 255, 255, 255]);
        assert_eq!(canvas.image().get_pixel(5, 9).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_opacity_blends_over_black() {
        let mut canvas = Canvas::new(4, 4);
        let layer = ClipLayer {
            opacity: 0.5,
            ..ClipLayer::default()
        };
        canvas.draw(&solid(4, 4, [200, 200, 200, 255]), &layer);
        assert_eq!(canvas.image().get_pixel(1, 1).0, [100, 100, 100, 255]);
    }

    #[test]
    fn test_zero_opacity_draws_nothing() {
        let mut canvas = Canvas::new(4, 4);
        let layer = ClipLayer {
            opacity: 0.0,
            ..ClipLayer::default()
        };
        canvas.draw(&solid(4, 4, [200, 200, 200, 255]), &layer);
        assert_eq!(canvas.image().get_pixel(1, 1).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_translate_moves_layer() {
        let mut canvas = Canvas::new(10, 10);
        let layer = ClipLayer {
            transform: Transform {
                x: 0.5,
                ..Transform::default()
            },
            ..ClipLayer::default()
        };
        canvas.draw(&solid(10, 10, [255, 0, 0, 255]), &layer);
        assert_eq!(canvas.image().get_pixel(2, 5).0, [0, 0, 0, 255]);
        assert_eq!(canvas.image().get_pixel(7, 5).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_half_scale_centres_layer() {
        let mut canvas = Canvas::new(20, 20);
        let layer = ClipLayer {
            transform: Transform {
                scale_x: 0.5,
                scale_y: 0.5,
                ..Transform::default()
            },
            ..ClipLayer::default()
        };
        canvas.draw(&solid(20, 20, [0, 255, 0, 255]), &layer);
        assert_eq!(canvas.image().get_pixel(1, 1).0, [0, 0, 0, 255]);
        assert_eq!(canvas.image().get_pixel(10, 10).0, [0, 255, 0, 255]);
        assert_eq!(canvas.image().get_pixel(18, 18).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_crop_selects_source_region() {
        // Left half red, right half blue; a maximal left crop leaves the
        // blue half filling most of the canvas.
        let mut src = solid(20, 10, [255, 0, 0, 255]);
        for y in 0..10 {
            for x in 10..20 {
                src.put_pixel(x, y, Rgba([0, 0, 255, 255]));
            }
        }
        let mut canvas = Canvas::new(10, 10);
        let layer = ClipLayer {
            crop: Crop::new(0.45, 0.0, 0.0, 0.0),
            ..ClipLayer::default()
        };
        canvas.draw(&src, &layer);
        assert_eq!(canvas.image().get_pixel(9, 5).0, [0, 0, 255, 255]);
        assert_eq!(canvas.image().get_pixel(5, 5).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_rotation_half_turn_flips() {
        let mut src = solid(10, 10, [0, 0, 0, 255]);
        src.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        let mut canvas = Canvas::new(10, 10);
        let layer = ClipLayer {
            transform: Transform {
                rotation: 180.0,
                ..Transform::default()
            },
            ..ClipLayer::default()
        };
        canvas.draw(&src, &layer);
        assert_eq!(canvas.image().get_pixel(9, 9).0, [255, 255, 255, 255]);
        assert_eq!(canvas.image().get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_effects() {
        let mut px = [1.0, 0.0, 0.0, 1.0];
        apply_effects(&mut px, &[Effect::Grayscale]);
        assert!((px[0] - 0.2126).abs() < 1e-6);
        assert_eq!(px[0], px[1]);

        let mut px = [0.5, 0.5, 0.5, 1.0];
        apply_effects(&mut px, &[Effect::Brightness { value: 0.75 }]);
        assert_eq!(px[0], 1.0);

        let mut px = [0.75, 0.25, 0.5, 1.0];
        apply_effects(&mut px, &[Effect::Contrast { value: 2.0 }]);
        assert_eq!(px, [1.0, 0.0, 0.5, 1.0]);

        let mut px = [0.75, 0.25, 0.5, 1.0];
        apply_effects(&mut px, &[Effect::Saturation { value: 1.0 }]);
        for (got, want) in px.iter().zip([0.75, 0.25, 0.5, 1.0]) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_clear_resets_black() {
        let mut canvas = Canvas::new(2, 2);
        canvas.draw(&solid(2, 2, [9, 9, 9, 255]), &ClipLayer::default());
        canvas.clear();
        assert!(canvas.image().pixels().all(|p| p.0 == [0, 0, 0, 255]));
    }
}
