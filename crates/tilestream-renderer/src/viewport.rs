use serde::{Deserialize, Serialize};

use tilestream_core::{Extent, Point};

use crate::gpu::ScissorRect;

/// The view onto the map: what is centered, how zoomed, on how large a canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Center X in map coordinates.
    pub center_x: f64,
    /// Center Y in map coordinates (y up).
    pub center_y: f64,
    /// Map units per CSS pixel.
    pub resolution: f64,
    /// Device pixels per CSS pixel.
    pub pixel_ratio: f64,
    /// Canvas width in CSS pixels.
    pub canvas_width: f64,
    /// Canvas height in CSS pixels.
    pub canvas_height: f64,
}

impl Viewport {
    pub fn new(canvas_width: f64, canvas_height: f64) -> Self {
        Self {
            center_x: 0.0,
            center_y: 0.0,
            resolution: 1.0,
            pixel_ratio: 1.0,
            canvas_width,
            canvas_height,
        }
    }

    pub fn with_center(mut self, center: Point) -> Self {
        self.center_x = center.x;
        self.center_y = center.y;
        self
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_pixel_ratio(mut self, pixel_ratio: f64) -> Self {
        self.pixel_ratio = pixel_ratio;
        self
    }

    /// Pan the viewport by a delta in screen pixels (y down).
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.center_x -= dx * self.resolution;
        self.center_y += dy * self.resolution;
    }

    /// Zoom in (`factor > 1`) or out around a screen position.
    pub fn zoom_at(&mut self, screen_x: f64, screen_y: f64, factor: f64) {
        if factor <= 0.0 {
            return;
        }
        let before = self.screen_to_map(screen_x, screen_y);
        self.resolution /= factor;

        // Keep the point under the cursor fixed.
        let after = self.screen_to_map(screen_x, screen_y);
        self.center_x -= after.x - before.x;
        self.center_y -= after.y - before.y;
    }

    /// Center on an extent and pick the resolution that fits it.
    pub fn fit_extent(&mut self, extent: &Extent) {
        if extent.width() <= 0.0 || extent.height() <= 0.0 {
            return;
        }
        let center = extent.center();
        self.center_x = center.x;
        self.center_y = center.y;
        self.resolution = (extent.width() / self.canvas_width).max(extent.height() / self.canvas_height);
    }

    pub fn screen_to_map(&self, screen_x: f64, screen_y: f64) -> Point {
        Point::new(
            (screen_x - self.canvas_width / 2.0) * self.resolution + self.center_x,
            (self.canvas_height / 2.0 - screen_y) * self.resolution + self.center_y,
        )
    }

    pub fn map_to_screen(&self, p: &Point) -> (f64, f64) {
        (
            (p.x - self.center_x) / self.resolution + self.canvas_width / 2.0,
            (self.center_y - p.y) / self.resolution + self.canvas_height / 2.0,
        )
    }

    /// The visible area in map coordinates.
    pub fn extent(&self) -> Extent {
        let half_w = self.canvas_width * self.resolution / 2.0;
        let half_h = self.canvas_height * self.resolution / 2.0;
        Extent::new(
            self.center_x - half_w,
            self.center_y - half_h,
            self.center_x + half_w,
            self.center_y + half_h,
        )
    }

    /// Canvas size in device pixels.
    pub fn device_size(&self) -> (u32, u32) {
        (
            (self.canvas_width * self.pixel_ratio).round().max(0.0) as u32,
            (self.canvas_height * self.pixel_ratio).round().max(0.0) as u32,
        )
    }

    /// Device-pixel rectangle covered by a map extent, clipped to the canvas.
    /// `None` when nothing of it is on screen.
    pub fn scissor_for(&self, extent: &Extent) -> Option<ScissorRect> {
        let (left, top) = self.map_to_screen(&extent.top_left());
        let (right, bottom) = self.map_to_screen(&Point::new(extent.max_x, extent.min_y));
        let (width, height) = self.device_size();
        let clamp = |v: f64, max: u32| (v * self.pixel_ratio).round().clamp(0.0, f64::from(max)) as u32;

        let (x0, x1) = (clamp(left, width), clamp(right, width));
        let (y0, y1) = (clamp(top, height), clamp(bottom, height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(ScissorRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    /// Transform from coordinates relative to `origin` into device pixels.
    pub fn transform_from(&self, origin: &Point) -> [f32; 6] {
        let scale = self.pixel_ratio / self.resolution;
        let (ox, oy) = self.map_to_screen(origin);
        [
            scale as f32,
            0.0,
            0.0,
            -scale as f32,
            (ox * self.pixel_ratio) as f32,
            (oy * self.pixel_ratio) as f32,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Viewport {
        Viewport::new(512.0, 256.0)
            .with_center(Point::new(1280.0, 3328.0))
            .with_resolution(2.0)
    }

    #[test]
    fn test_screen_map_round_trip() {
        let vp = viewport();
        let p = vp.screen_to_map(10.0, 20.0);
        let (x, y) = vp.map_to_screen(&p);
        assert!((x - 10.0).abs() < 1e-9 && (y - 20.0).abs() < 1e-9);
        assert_eq!(vp.screen_to_map(0.0, 0.0), Point::new(768.0, 3584.0));
    }

    #[test]
    fn test_extent() {
        assert_eq!(viewport().extent(), Extent::new(768.0, 3072.0, 1792.0, 3584.0));
    }

    #[test]
    fn test_pan_moves_against_drag() {
        let mut vp = viewport();
        vp.pan(10.0, 10.0);
        assert_eq!((vp.center_x, vp.center_y), (1260.0, 3348.0));
    }

    #[test]
    fn test_zoom_keeps_cursor_fixed() {
        let mut vp = viewport();
        let before = vp.screen_to_map(100.0, 50.0);
        vp.zoom_at(100.0, 50.0, 2.0);
        assert!((vp.resolution - 1.0).abs() < 1e-12);
        let after = vp.screen_to_map(100.0, 50.0);
        assert!(before.distance_to(&after) < 1e-9);
    }

    #[test]
    fn test_scissor_is_clipped_to_canvas() {
        let vp = viewport().with_pixel_ratio(2.0);
        let tile = Extent::new(1024.0, 3072.0, 1536.0, 3584.0);
        assert_eq!(vp.scissor_for(&tile), Some(ScissorRect { x: 256, y: 0, width: 512, height: 512 }));

        let partly = Extent::new(512.0, 3072.0, 1024.0, 3584.0);
        assert_eq!(vp.scissor_for(&partly), Some(ScissorRect { x: 0, y: 0, width: 256, height: 512 }));
        assert_eq!(vp.scissor_for(&Extent::new(0.0, 0.0, 100.0, 100.0)), None);
    }

    #[test]
    fn test_transform_places_origin() {
        let vp = viewport();
        let t = vp.transform_from(&Point::new(1024.0, 3072.0));
        assert_eq!(t, [0.5, 0.0, 0.0, -0.5, 128.0, 256.0]);
    }

    #[test]
    fn test_fit_extent() {
        let mut vp = Viewport::new(100.0, 100.0);
        vp.fit_extent(&Extent::new(0.0, 0.0, 400.0, 200.0));
        assert_eq!((vp.center_x, vp.center_y, vp.resolution), (200.0, 100.0, 4.0));
    }
}
