//! Coordinate transforms between video-pixel, normalized and local space
//!
//! Video-pixel space is the reference resolution of the source videos with the
//! origin at the top-left. Local space is a display area of arbitrary size with
//! the vertical axis flipped:
//!
//! ```text
//! normalized = video / resolution
//! local.x    = width  * normalized.x
//! local.y    = height * (1 - normalized.y)
//! ```
//!
//! `to_video` applies the exact inverse, so a click in local space maps back to
//! the same pixel the overlay was drawn from.

use crate::types::{DisplaySize, LocalPoint, NormalizedPoint, Result, SessionError, VideoPoint};
use serde::{Deserialize, Serialize};

/// Reference resolution of the source videos
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: f32,
    pub height: f32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
        }
    }
}

/// Axis-aligned box in video-pixel space given by two corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
    pub low: VideoPoint,
    pub high: VideoPoint,
}

impl PixelBox {
    pub fn new(low: VideoPoint, high: VideoPoint) -> Self {
        Self { low, high }
    }

    /// Build from `[low_x, low_y, high_x, high_y]`
    pub fn from_corners(bbox: [f32; 4]) -> Self {
        Self {
            low: VideoPoint::new(bbox[0], bbox[1]),
            high: VideoPoint::new(bbox[2], bbox[3]),
        }
    }
}

/// Rectangle in local space, anchored at `(x, y)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Pure mapping between the three coordinate spaces
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoordinateTransform {
    resolution: Resolution,
}

impl CoordinateTransform {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn normalize(&self, p: VideoPoint) -> NormalizedPoint {
        NormalizedPoint {
            x: p.x / self.resolution.width,
            y: p.y / self.resolution.height,
        }
    }

    pub fn denormalize(&self, p: NormalizedPoint) -> VideoPoint {
        VideoPoint::new(p.x * self.resolution.width, p.y * self.resolution.height)
    }

    // Point mappings are computed in f64; round trips stay within one f32 ulp.

    /// Map a video pixel into a display area
    pub fn to_local(&self, p: VideoPoint, display: DisplaySize) -> Result<LocalPoint> {
        display.validate()?;
        finite(p.x, p.y)?;
        let nx = p.x as f64 / self.resolution.width as f64;
        let ny = p.y as f64 / self.resolution.height as f64;
        Ok(LocalPoint::new(
            (nx * display.width as f64) as f32,
            (display.height as f64 * (1.0 - ny)) as f32,
        ))
    }

    /// Map a point in a display area back to a video pixel
    pub fn to_video(&self, p: LocalPoint, display: DisplaySize) -> Result<VideoPoint> {
        display.validate()?;
        finite(p.x, p.y)?;
        let nx = p.x as f64 / display.width as f64;
        let ny = 1.0 - p.y as f64 / display.height as f64;
        Ok(VideoPoint::new(
            (nx * self.resolution.width as f64) as f32,
            (ny * self.resolution.height as f64) as f32,
        ))
    }

    /// Project a pixel box into a display area
    ///
    /// Both corners are shifted by the box half-extent before normalizing, so
    /// the anchor lands on the box center.
    pub fn box_to_local(&self, bbox: PixelBox, display: DisplaySize) -> Result<LocalRect> {
        display.validate()?;
        let half_w = (bbox.high.x - bbox.low.x) / 2.0;
        let half_h = (bbox.high.y - bbox.low.y) / 2.0;

        let low = self.normalize(VideoPoint::new(bbox.low.x + half_w, bbox.low.y + half_h));
        let high = self.normalize(VideoPoint::new(bbox.high.x + half_w, bbox.high.y + half_h));

        Ok(LocalRect {
            x: low.x * display.width,
            y: (1.0 - low.y) * display.height,
            width: (high.x - low.x) * display.width,
            height: (high.y - low.y) * display.height,
        })
    }
}

fn finite(x: f32, y: f32) -> Result<()> {
    if x.is_finite() && y.is_finite() {
        Ok(())
    } else {
        Err(SessionError::InvalidCoordinate { x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_center_maps_to_center() {
        let t = CoordinateTransform::default();
        let display = DisplaySize::new(640.0, 360.0);

        let local = t.to_local(VideoPoint::new(960.0, 540.0), display).unwrap();
        assert!(approx(local.x, 320.0));
        assert!(approx(local.y, 180.0));
    }

    #[test]
    fn test_vertical_axis_is_flipped() {
        let t = CoordinateTransform::default();
        let display = DisplaySize::new(100.0, 100.0);

        let top = t.to_local(VideoPoint::new(0.0, 0.0), display).unwrap();
        assert!(approx(top.y, 100.0));

        let video = t.to_video(LocalPoint::new(0.0, 100.0), display).unwrap();
        assert!(approx(video.y, 0.0));
    }

    #[test]
    fn test_round_trip_local_video_local() {
        let t = CoordinateTransform::default();
        let sizes = [(640.0, 360.0), (1.0, 1.0), (1920.0, 1080.0), (333.3, 77.7)];
        let fractions = [(0.0, 0.0), (0.02, 0.83), (0.999, 0.001), (0.5, 0.5), (1.0, 1.0)];

        for (w, h) in sizes {
            let display = DisplaySize::new(w, h);
            for (fx, fy) in fractions {
                let p = LocalPoint::new(fx * w, fy * h);
                let back = t.to_local(t.to_video(p, display).unwrap(), display).unwrap();
                assert!(approx(back.x, p.x) && approx(back.y, p.y), "{:?} -> {:?}", p, back);
            }
        }
    }

    #[test]
    fn test_rejects_empty_display() {
        let t = CoordinateTransform::default();
        let result = t.to_video(LocalPoint::new(1.0, 1.0), DisplaySize::new(0.0, 10.0));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_non_finite_points() {
        let t = CoordinateTransform::default();
        let display = DisplaySize::new(100.0, 100.0);

        let nan = t.to_video(LocalPoint::new(f32::NAN, 5.0), display);
        assert!(matches!(nan, Err(SessionError::InvalidCoordinate { .. })));

        let inf = t.to_local(VideoPoint::new(10.0, f32::INFINITY), display);
        assert!(matches!(inf, Err(SessionError::InvalidCoordinate { .. })));
    }

    #[test]
    fn test_box_projection() {
        let t = CoordinateTransform::default();
        let display = DisplaySize::new(1920.0, 1080.0);

        let rect = t
            .box_to_local(PixelBox::from_corners([100.0, 100.0, 300.0, 200.0]), display)
            .unwrap();

        let close = |a: f32, b: f32| (a - b).abs() < 1e-2;
        assert!(close(rect.x, 200.0));
        assert!(close(rect.y, 1080.0 - 150.0));
        assert!(close(rect.width, 200.0));
        assert!(close(rect.height, 100.0));
    }
}
