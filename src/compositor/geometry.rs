//! Overlay geometry
//!
//! Pure functions mapping an [`OverlayConfig`] and canvas size to the pixel
//! square the camera occupies, its corner radius, and the centred
//! cover-crop of the camera image.

use serde::{Deserialize, Serialize};

pub const MIN_SIZE_RATIO: f32 = 0.07;
pub const MAX_SIZE_RATIO: f32 = 0.55;

/// Height the pixel-based camera sizes are expressed against
const REFERENCE_HEIGHT: f32 = 1080.0;

/// Corner of the canvas the overlay is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CameraPosition {
    TopLeft,
    TopRight,
    #[default]
    BottomLeft,
    BottomRight,
}

impl std::str::FromStr for CameraPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top-left" => Ok(CameraPosition::TopLeft),
            "top-right" => Ok(CameraPosition::TopRight),
            "bottom-left" => Ok(CameraPosition::BottomLeft),
            "bottom-right" => Ok(CameraPosition::BottomRight),
            other => Err(format!("unknown camera position: {}", other)),
        }
    }
}

/// Picture-in-picture configuration
///
/// Values are clamped into range on construction so every instance is
/// valid. Replace the whole value to change it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub position: CameraPosition,
    /// Overlay edge as a fraction of canvas height, in [0.07, 0.55]
    pub size_ratio: f32,
    /// 0.0 = square corners, 1.0 = circle
    pub corner_roundness: f32,
    /// Inset from the anchored canvas edges, in pixels
    pub padding: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            position: CameraPosition::BottomLeft,
            size_ratio: 0.25,
            corner_roundness: 1.0,
            padding: 20,
        }
    }
}

impl OverlayConfig {
    pub fn new(position: CameraPosition, size_ratio: f32, corner_roundness: f32, padding: u32) -> Self {
        Self {
            position,
            size_ratio: clamp_ratio(size_ratio),
            corner_roundness: clamp_unit(corner_roundness),
            padding,
        }
    }

    /// Build from a pixel size measured against a 1080p canvas (80..=600 px)
    pub fn from_pixel_size(position: CameraPosition, size_px: u32, corner_roundness: f32, padding: u32) -> Self {
        Self::new(position, size_px as f32 / REFERENCE_HEIGHT, corner_roundness, padding)
    }

    /// Merge a partial update into a new snapshot
    pub fn apply(&self, patch: &OverlayPatch) -> Self {
        Self::new(
            patch.position.unwrap_or(self.position),
            patch.size_ratio.unwrap_or(self.size_ratio),
            patch.corner_roundness.unwrap_or(self.corner_roundness),
            patch.padding.unwrap_or(self.padding),
        )
    }
}

/// Partial overlay update; `None` fields keep their current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayPatch {
    pub position: Option<CameraPosition>,
    pub size_ratio: Option<f32>,
    pub corner_roundness: Option<f32>,
    pub padding: Option<u32>,
}

fn clamp_ratio(ratio: f32) -> f32 {
    if ratio.is_nan() {
        return MIN_SIZE_RATIO;
    }
    ratio.clamp(MIN_SIZE_RATIO, MAX_SIZE_RATIO)
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Square overlay region on the canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayRect {
    pub x: u32,
    pub y: u32,
    pub size: u32,
    /// Corner radius in pixels, in [0, size / 2]
    pub radius: f32,
}

impl OverlayRect {
    /// Fraction of the pixel at (px, py) inside the rounded-square clip
    ///
    /// Samples the pixel centre against the rounded boundary with a
    /// one-pixel anti-aliasing band.
    pub fn coverage(&self, px: u32, py: u32) -> f32 {
        if self.size == 0 {
            return 0.0;
        }
        let cx = px as f32 + 0.5 - self.x as f32;
        let cy = py as f32 + 0.5 - self.y as f32;
        let size = self.size as f32;
        if cx < 0.0 || cy < 0.0 || cx > size || cy > size {
            return 0.0;
        }

        (0.5 - self.signed_distance(cx, cy)).clamp(0.0, 1.0)
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        self.coverage(px, py) > 0.0
    }

    /// Depth of the pixel centre inside the clip path, in pixels
    pub(crate) fn inset(&self, px: u32, py: u32) -> f32 {
        let cx = px as f32 + 0.5 - self.x as f32;
        let cy = py as f32 + 0.5 - self.y as f32;
        -self.signed_distance(cx, cy)
    }

    /// Signed distance from a rect-local point to the rounded square,
    /// negative inside
    fn signed_distance(&self, cx: f32, cy: f32) -> f32 {
        let half = self.size as f32 / 2.0;
        let r = self.radius.min(half);
        let qx = (cx - half).abs() - (half - r);
        let qy = (cy - half).abs() - (half - r);
        let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
        let inside = qx.max(qy).min(0.0);
        outside + inside - r
    }
}

/// Square of the source image that fills the overlay without letterboxing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub sx: f32,
    pub sy: f32,
    /// Edge length of the cropped square, in source pixels
    pub side: f32,
}

/// Place the overlay square on a canvas
pub fn overlay_rect(canvas_width: u32, canvas_height: u32, config: &OverlayConfig) -> OverlayRect {
    let ratio = clamp_ratio(config.size_ratio);
    let size = ((canvas_height as f32 * ratio).round() as u32).min(canvas_width.min(canvas_height));
    let padding = config.padding;

    let max_x = canvas_width - size;
    let max_y = canvas_height - size;
    let near = |limit: u32| padding.min(limit);
    let far = |limit: u32| limit.saturating_sub(padding);

    let (x, y) = match config.position {
        CameraPosition::TopLeft => (near(max_x), near(max_y)),
        CameraPosition::TopRight => (far(max_x), near(max_y)),
        CameraPosition::BottomLeft => (near(max_x), far(max_y)),
        CameraPosition::BottomRight => (far(max_x), far(max_y)),
    };

    OverlayRect {
        x,
        y,
        size,
        radius: clamp_unit(config.corner_roundness) * size as f32 / 2.0,
    }
}

/// Centred cover-crop of a `source_width` x `source_height` image into a
/// square of `size` pixels
pub fn cover_crop(source_width: u32, source_height: u32, size: u32) -> CropRect {
    if source_width == 0 || source_height == 0 || size == 0 {
        return CropRect {
            sx: 0.0,
            sy: 0.0,
            side: 0.0,
        };
    }

    let (w, h, size) = (source_width as f32, source_height as f32, size as f32);
    let scale = (size / w).max(size / h);
    let side = size / scale;

    CropRect {
        sx: (w - side) / 2.0,
        sy: (h - side) / 2.0,
        side,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSITIONS: [CameraPosition; 4] = [
        CameraPosition::TopLeft,
        CameraPosition::TopRight,
        CameraPosition::BottomLeft,
        CameraPosition::BottomRight,
    ];

    #[test]
    fn test_bottom_right_on_1080p() {
        let config = OverlayConfig::new(CameraPosition::BottomRight, 0.25, 0.0, 20);
        let rect = overlay_rect(1920, 1080, &config);

        assert_eq!(rect.size, 270);
        assert_eq!(rect.x, 1920 - 270 - 20);
        assert_eq!(rect.y, 1080 - 270 - 20);
        assert_eq!(rect.radius, 0.0);
    }

    #[test]
    fn test_position_lookup() {
        let config = OverlayConfig::new(CameraPosition::TopLeft, 0.1, 0.5, 10);
        let rect = overlay_rect(1000, 500, &config);
        assert_eq!((rect.x, rect.y, rect.size), (10, 10, 50));

        let rect = overlay_rect(1000, 500, &OverlayConfig { position: CameraPosition::TopRight, ..config });
        assert_eq!((rect.x, rect.y), (940, 10));

        let rect = overlay_rect(1000, 500, &OverlayConfig { position: CameraPosition::BottomLeft, ..config });
        assert_eq!((rect.x, rect.y), (10, 440));
        assert_eq!(rect.radius, 12.5);
    }

    #[test]
    fn test_always_contained_and_radius_bounded() {
        let canvases = [(1920, 1080), (1080, 1920), (640, 480), (100, 30), (30, 100), (1, 1)];
        let ratios = [0.0, 0.07, 0.25, 0.55, 2.0];
        let paddings = [0, 20, 5000];
        let roundness = [0.0, 0.3, 1.0, 7.0];

        for &(w, h) in &canvases {
            for &position in &POSITIONS {
                for &ratio in &ratios {
                    for &padding in &paddings {
                        for &round in &roundness {
                            let config = OverlayConfig {
                                position,
                                size_ratio: ratio,
                                corner_roundness: round,
                                padding,
                            };
                            let rect = overlay_rect(w, h, &config);
                            assert!(rect.x + rect.size <= w, "{:?} on {}x{}", config, w, h);
                            assert!(rect.y + rect.size <= h, "{:?} on {}x{}", config, w, h);
                            assert!(rect.radius >= 0.0);
                            assert!(rect.radius <= rect.size as f32 / 2.0);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let config = OverlayConfig::default();
        assert_eq!(overlay_rect(1280, 720, &config), overlay_rect(1280, 720, &config));
        assert_eq!(cover_crop(640, 480, 180), cover_crop(640, 480, 180));
    }

    #[test]
    fn test_config_clamps() {
        let config = OverlayConfig::new(CameraPosition::TopLeft, 0.9, -1.0, 0);
        assert_eq!(config.size_ratio, MAX_SIZE_RATIO);
        assert_eq!(config.corner_roundness, 0.0);

        let config = OverlayConfig::from_pixel_size(CameraPosition::TopLeft, 270, 1.0, 0);
        assert!((config.size_ratio - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_patch_merges() {
        let base = OverlayConfig::default();
        let patched = base.apply(&OverlayPatch {
            position: Some(CameraPosition::TopRight),
            size_ratio: Some(0.4),
            ..Default::default()
        });

        assert_eq!(patched.position, CameraPosition::TopRight);
        assert_eq!(patched.size_ratio, 0.4);
        assert_eq!(patched.corner_roundness, base.corner_roundness);
        assert_eq!(patched.padding, base.padding);
    }

    #[test]
    fn test_cover_crop_landscape_source() {
        let crop = cover_crop(640, 480, 240);
        assert_eq!(crop.side, 480.0);
        assert_eq!(crop.sx, 80.0);
        assert_eq!(crop.sy, 0.0);
    }

    #[test]
    fn test_cover_crop_portrait_source() {
        let crop = cover_crop(480, 640, 100);
        assert!((crop.side - 480.0).abs() < 1e-2);
        assert!(crop.sx.abs() < 1e-2);
        assert!((crop.sy - 80.0).abs() < 1e-2);
    }

    #[test]
    fn test_square_clip_covers_whole_rect() {
        let rect = overlay_rect(200, 100, &OverlayConfig::new(CameraPosition::TopLeft, 0.5, 0.0, 0));
        assert_eq!(rect.coverage(0, 0), 1.0);
        assert_eq!(rect.coverage(49, 49), 1.0);
        assert_eq!(rect.coverage(50, 0), 0.0);
    }

    #[test]
    fn test_circle_clip_excludes_corners() {
        let rect = overlay_rect(200, 100, &OverlayConfig::new(CameraPosition::TopLeft, 0.5, 1.0, 0));
        assert_eq!(rect.coverage(0, 0), 0.0);
        assert_eq!(rect.coverage(25, 25), 1.0);
        assert!(rect.contains(25, 0));
    }

    #[test]
    fn test_radius_is_continuous() {
        let mut previous = 0.0;
        for step in 0..=100 {
            let config = OverlayConfig::new(CameraPosition::TopLeft, 0.5, step as f32 / 100.0, 0);
            let rect = overlay_rect(400, 400, &config);
            assert!(rect.radius - previous <= 1.0 + 1e-3);
            previous = rect.radius;
        }
        assert_eq!(previous, 100.0);
    }

    #[test]
    fn test_position_parses_from_kebab_case() {
        assert_eq!("bottom-right".parse::<CameraPosition>().unwrap(), CameraPosition::BottomRight);
        assert!("middle".parse::<CameraPosition>().is_err());
    }
}
