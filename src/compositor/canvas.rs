//! Software render target
//!
//! RGBA canvas the compositor draws into. Owned by exactly one pipeline
//! task for the lifetime of a compositing session.

use super::geometry::{cover_crop, OverlayRect};
use crate::capture::VideoFrame;

/// Width of the translucent ring painted just inside the overlay edge
pub const RING_WIDTH: f32 = 3.0;
const RING_ALPHA: f32 = 0.3;

#[derive(Debug, Clone)]
pub struct RenderTarget {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RenderTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel at (x, y) as [R, G, B, A]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = self.offset(x, y);
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    /// Draw a frame stretched over the whole canvas
    ///
    /// Returns false, leaving the canvas untouched, for an empty frame or
    /// one whose buffer does not match its stated size.
    pub fn draw_frame(&mut self, frame: &VideoFrame) -> bool {
        if frame.is_empty() || !frame.is_well_formed() {
            return false;
        }

        if frame.width == self.width && frame.height == self.height {
            self.data.copy_from_slice(&frame.data);
            return true;
        }

        // Nearest-neighbour scale
        let (w, h) = (self.width as usize, self.height as usize);
        let (fw, fh) = (frame.width as usize, frame.height as usize);
        for y in 0..h {
            let sy = (y * fh / h).min(fh - 1);
            for x in 0..w {
                let sx = (x * fw / w).min(fw - 1);
                let src = (sy * fw + sx) * 4;
                let dst = (y * w + x) * 4;
                self.data[dst..dst + 4].copy_from_slice(&frame.data[src..src + 4]);
            }
        }
        true
    }

    /// Composite a camera frame into `rect`
    ///
    /// The camera is cover-cropped to a centred square, mirrored
    /// horizontally, clipped to the rounded rect and ringed with a faint
    /// white border inside the clip. Pixels outside `rect` are untouched.
    /// Returns false when nothing could be drawn.
    pub fn draw_overlay(&mut self, camera: &VideoFrame, rect: &OverlayRect) -> bool {
        if camera.is_empty() || !camera.is_well_formed() || rect.size == 0 {
            return false;
        }
        if rect.x + rect.size > self.width || rect.y + rect.size > self.height {
            return false;
        }

        let crop = cover_crop(camera.width, camera.height, rect.size);
        let step = crop.side / rect.size as f32;
        let (cw, ch) = (camera.width as usize, camera.height as usize);
        let size = rect.size;

        for dy in 0..size {
            let py = rect.y + dy;
            let sy = ((crop.sy + (dy as f32 + 0.5) * step) as usize).min(ch - 1);

            for dx in 0..size {
                let px = rect.x + dx;
                let coverage = rect.coverage(px, py);
                if coverage <= 0.0 {
                    continue;
                }

                // Mirror: the left edge of the overlay shows the right edge of the crop.
                let mirrored = size - 1 - dx;
                let sx = ((crop.sx + (mirrored as f32 + 0.5) * step) as usize).min(cw - 1);
                let src = (sy * cw + sx) * 4;
                let mut pixel = [
                    camera.data[src] as f32,
                    camera.data[src + 1] as f32,
                    camera.data[src + 2] as f32,
                ];

                if rect.inset(px, py) < RING_WIDTH {
                    for channel in &mut pixel {
                        *channel = 255.0 * RING_ALPHA + *channel * (1.0 - RING_ALPHA);
                    }
                }

                let dst = self.offset(px, py);
                for (i, value) in pixel.iter().enumerate() {
                    let under = self.data[dst + i] as f32;
                    self.data[dst + i] = (value * coverage + under * (1.0 - coverage)).round() as u8;
                }
                self.data[dst + 3] = 255;
            }
        }
        true
    }

    /// Copy the canvas out as a video frame
    pub fn snapshot(&self, timestamp_us: i64) -> VideoFrame {
        VideoFrame::new(self.width, self.height, self.data.clone(), timestamp_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::geometry::{overlay_rect, CameraPosition, OverlayConfig};

    fn split_camera(width: u32, height: u32) -> VideoFrame {
        let mut frame = VideoFrame::solid(width, height, [0, 0, 255, 255], 0);
        for y in 0..height {
            for x in 0..width / 2 {
                let offset = ((y * width + x) * 4) as usize;
                frame.data[offset..offset + 4].copy_from_slice(&[255, 0, 0, 255]);
            }
        }
        frame
    }

    #[test]
    fn test_draw_frame_same_size_copies() {
        let mut canvas = RenderTarget::new(4, 2);
        canvas.draw_frame(&VideoFrame::solid(4, 2, [9, 8, 7, 255], 0));
        assert_eq!(canvas.pixel(3, 1), [9, 8, 7, 255]);
    }

    #[test]
    fn test_draw_frame_scales() {
        let mut canvas = RenderTarget::new(8, 8);
        let mut frame = VideoFrame::solid(2, 2, [0, 0, 0, 255], 0);
        frame.data[4..8].copy_from_slice(&[255, 255, 255, 255]); // top-right pixel

        canvas.draw_frame(&frame);

        assert_eq!(canvas.pixel(7, 0), [255, 255, 255, 255]);
        assert_eq!(canvas.pixel(4, 3), [255, 255, 255, 255]);
        assert_eq!(canvas.pixel(3, 0), [0, 0, 0, 255]);
        assert_eq!(canvas.pixel(7, 4), [0, 0, 0, 255]);
    }

    #[test]
    fn test_malformed_frames_are_not_drawn() {
        let mut canvas = RenderTarget::new(8, 4);
        canvas.draw_frame(&VideoFrame::solid(8, 4, [5, 5, 5, 255], 0));

        let short = VideoFrame {
            width: 8,
            height: 4,
            data: vec![0; 4],
            timestamp_us: 0,
        };
        assert!(!canvas.draw_frame(&short));
        let scaled_short = VideoFrame {
            width: 16,
            height: 8,
            data: vec![0; 12],
            timestamp_us: 0,
        };
        assert!(!canvas.draw_frame(&scaled_short));

        let rect = overlay_rect(8, 4, &OverlayConfig::new(CameraPosition::TopLeft, 1.0, 0.0, 0));
        assert!(!canvas.draw_overlay(&short, &rect));
        assert_eq!(canvas.pixel(0, 0), [5, 5, 5, 255]);
        assert_eq!(canvas.pixel(7, 3), [5, 5, 5, 255]);
    }

    #[test]
    fn test_overlay_is_mirrored() {
        let mut canvas = RenderTarget::new(200, 100);
        canvas.draw_frame(&VideoFrame::solid(200, 100, [0, 255, 0, 255], 0));
        let rect = overlay_rect(200, 100, &OverlayConfig::new(CameraPosition::TopLeft, 0.5, 0.0, 0));

        canvas.draw_overlay(&split_camera(50, 50), &rect);

        // Camera left half is red; mirrored it lands on the right.
        assert_eq!(canvas.pixel(10, 25), [0, 0, 255, 255]);
        assert_eq!(canvas.pixel(40, 25), [255, 0, 0, 255]);
    }

    #[test]
    fn test_overlay_leaves_outside_untouched() {
        let mut canvas = RenderTarget::new(120, 60);
        canvas.draw_frame(&VideoFrame::solid(120, 60, [0, 255, 0, 255], 0));
        let rect = overlay_rect(120, 60, &OverlayConfig::new(CameraPosition::BottomRight, 0.5, 1.0, 5));

        canvas.draw_overlay(&VideoFrame::solid(64, 48, [255, 0, 0, 255], 0), &rect);

        for y in 0..60 {
            for x in 0..120 {
                let inside_rect = x >= rect.x && x < rect.x + rect.size && y >= rect.y && y < rect.y + rect.size;
                if !inside_rect {
                    assert_eq!(canvas.pixel(x, y), [0, 255, 0, 255], "({}, {})", x, y);
                }
            }
        }
        // Circle corners keep the screen visible.
        assert_eq!(canvas.pixel(rect.x, rect.y), [0, 255, 0, 255]);
    }

    #[test]
    fn test_ring_lightens_edge() {
        let mut canvas = RenderTarget::new(100, 100);
        let rect = overlay_rect(100, 100, &OverlayConfig::new(CameraPosition::TopLeft, 0.5, 0.0, 10));

        canvas.draw_overlay(&VideoFrame::solid(10, 10, [0, 0, 0, 255], 0), &rect);

        let edge = canvas.pixel(rect.x, rect.y + 20);
        let centre = canvas.pixel(rect.x + 25, rect.y + 25);
        assert!(edge[0] > 70 && edge[0] < 80, "ring pixel {:?}", edge);
        assert_eq!(centre, [0, 0, 0, 255]);
    }
}
