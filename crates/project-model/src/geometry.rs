//! Framing geometry: crop insets, clip transforms, aspect fitting, and
//! affine maps between output and source pixel space.

use serde::{Deserialize, Serialize};

/// Largest inset allowed on any single edge.
pub const MAX_CROP: f64 = 0.45;

/// Edge insets as fractions of the source size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Crop {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Crop {
    /// Create a crop, clamping every edge to `[0, MAX_CROP]`.
    pub fn new(left: f64, right: f64, top: f64, bottom: f64) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
        .clamped()
    }

    pub fn clamped(self) -> Self {
        let c = |v: f64| if v.is_finite() { v.clamp(0.0, MAX_CROP) } else { 0.0 };
        Self {
            left: c(self.left),
            right: c(self.right),
            top: c(self.top),
            bottom: c(self.bottom),
        }
    }

    pub fn is_identity(&self) -> bool {
        let c = self.clamped();
        c.left == 0.0 && c.right == 0.0 && c.top == 0.0 && c.bottom == 0.0
    }

    /// The remaining source region, in source pixels.
    pub fn source_rect(&self, src_w: f64, src_h: f64) -> Rect {
        let c = self.clamped();
        Rect {
            x: src_w * c.left,
            y: src_h * c.top,
            w: src_w * (1.0 - c.left - c.right),
            h: src_h * (1.0 - c.top - c.bottom),
        }
    }
}

/// Placement of a clip on the output canvas.
///
/// `x`/`y` move the clip's centre by a fraction of the output width/height.
/// `rotation` is in degrees, clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transform {
    pub x: f64,
    pub y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub rotation: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
        }
    }
}

impl Transform {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// Axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px < self.x + self.w && py >= self.y && py < self.y + self.h
    }
}

/// Largest rectangle with the source aspect that fits inside the
/// destination, centred.
pub fn fit_rect(src_w: f64, src_h: f64, dst_w: f64, dst_h: f64) -> Rect {
    if src_w <= 0.0 || src_h <= 0.0 {
        return Rect {
            x: 0.0,
            y: 0.0,
            w: dst_w,
            h: dst_h,
        };
    }
    let scale = (dst_w / src_w).min(dst_h / src_h);
    let w = src_w * scale;
    let h = src_h * scale;
    Rect {
        x: (dst_w - w) / 2.0,
        y: (dst_h - h) / 2.0,
        w,
        h,
    }
}

/// 2D affine map stored as a homogeneous 3x3 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    m: [[f64; 3]; 3],
}

impl Affine {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]],
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            m: [[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Clockwise rotation in degrees (y grows downward).
    pub fn rotate_degrees(deg: f64) -> Self {
        let (s, c) = deg.to_radians().sin_cos();
        Self {
            m: [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Apply `self`, then `next`.
    pub fn then(self, next: Affine) -> Affine {
        let a = next.m;
        let b = self.m;
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
            }
        }
        Affine { m: out }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.m[0][0] * x + self.m[0][1] * y + self.m[0][2],
            self.m[1][0] * x + self.m[1][1] * y + self.m[1][2],
        )
    }

    pub fn invert(&self) -> Option<Affine> {
        let [[a, b, c], [d, e, f], _] = self.m;
        let det = a * e - b * d;
        if det.abs() < 1e-12 {
            return None;
        }
        let inv = 1.0 / det;
        Some(Affine {
            m: [
                [e * inv, -b * inv, (b * f - c * e) * inv],
                [-d * inv, a * inv, (c * d - a * f) * inv],
                [0.0, 0.0, 1.0],
            ],
        })
    }
}

/// Map from the aspect-fitted destination rectangle into output pixels,
/// applying the clip transform about the rectangle's centre.
pub fn placement(fitted: Rect, transform: &Transform, out_w: f64, out_h: f64) -> Affine {
    let (cx, cy) = fitted.center();
    Affine::translate(-cx, -cy)
        .then(Affine::scale(transform.scale_x, transform.scale_y))
        .then(Affine::rotate_degrees(transform.rotation))
        .then(Affine::translate(
            cx + transform.x * out_w,
            cy + transform.y * out_h,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_clamps_each_edge() {
        let crop = Crop::new(0.9, -0.2, 0.1, f64::NAN);
        assert_eq!(crop.left, MAX_CROP);
        assert_eq!(crop.right, 0.0);
        assert_eq!(crop.top, 0.1);
        assert_eq!(crop.bottom, 0.0);
    }

    #[test]
    fn test_crop_source_rect() {
        let rect = Crop::new(0.25, 0.25, 0.0, 0.5).source_rect(200.0, 100.0);
        assert_eq!(rect.x, 50.0);
        assert_eq!(rect.w, 100.0);
        assert_eq!(rect.y, 0.0);
        assert!((rect.h - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_rect_letterboxes() {
        let rect = fit_rect(1920.0, 1080.0, 1080.0, 1080.0);
        assert!((rect.w - 1080.0).abs() < 1e-9);
        assert!((rect.h - 607.5).abs() < 1e-9);
        assert!((rect.y - 236.25).abs() < 1e-9);
        assert_eq!(rect.x, 0.0);
    }

    #[test]
    fn test_affine_invert_round_trip() {
        let fitted = Rect {
            x: 0.0,
            y: 0.0,
            w: 100.0,
            h: 50.0,
        };
        let t = Transform {
            x: 0.1,
            y: -0.2,
            scale_x: 2.0,
            scale_y: 0.5,
            rotation: 30.0,
        };
        let fwd = placement(fitted, &t, 100.0, 50.0);
        let inv = fwd.invert().unwrap();
        let (x, y) = fwd.apply(12.0, 34.0);
        let (bx, by) = inv.apply(x, y);
        assert!((bx - 12.0).abs() < 1e-9);
        assert!((by - 34.0).abs() < 1e-9);
    }

    #[test]
    fn test_identity_transform_keeps_points() {
        let fitted = Rect {
            x: 10.0,
            y: 10.0,
            w: 80.0,
            h: 40.0,
        };
        let map = placement(fitted, &Transform::default(), 100.0, 60.0);
        assert_eq!(map.apply(10.0, 10.0), (10.0, 10.0));
        assert!(Transform::default().is_identity());
    }

    #[test]
    fn test_rotation_is_clockwise() {
        let (x, y) = Affine::rotate_degrees(90.0).apply(1.0, 0.0);
        assert!(x.abs() < 1e-9);
        assert!((y - 1.0).abs() < 1e-9);
    }
}
