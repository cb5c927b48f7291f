//! 颜色检测 (HSV 阈值 + 最大外轮廓)
//!
//! HSV 采用 OpenCV 8 位约定: H ∈ [0,179], S/V ∈ [0,255]。

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use serde::{Deserialize, Serialize};

use crate::types::{DetectionResult, Frame, Point, Rect};

/// 最小轮廓面积 (严格大于才算命中)
pub const MIN_CONTOUR_AREA: f64 = 100.0;
/// 面积达到该值时置信度饱和为 1.0
pub const FULL_CONFIDENCE_AREA: f64 = 10_000.0;

/// HSV 颜色范围 (闭区间)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRange {
    #[serde(default)]
    pub hsv_low: [u8; 3],
    #[serde(default = "ColorRange::default_high")]
    pub hsv_high: [u8; 3],
}

impl ColorRange {
    fn default_high() -> [u8; 3] {
        [180, 255, 255]
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.hsv_low[i] <= hsv[i] && hsv[i] <= self.hsv_high[i])
    }
}

/// RGB → HSV (OpenCV 8 位约定)
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        ((h / 2.0).round() as u32 % 180) as u8,
        s.round() as u8,
        max as u8,
    ]
}

/// 生成二值掩码 (命中 = 255)
pub fn color_mask(frame: &Frame, range: &ColorRange) -> GrayImage {
    let mut mask = GrayImage::new(frame.width, frame.height);
    for y in 0..frame.height {
        let row = y as usize * frame.stride as usize;
        for x in 0..frame.width {
            let i = row + x as usize * 4;
            let px = &frame.data[i..i + 4];
            if range.contains(rgb_to_hsv(px[0], px[1], px[2])) {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }
    mask
}

/// 鞋带公式求多边形面积
fn polygon_area(points: &[imageproc::point::Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice.abs() as f64) / 2.0
}

fn bounding_rect(points: &[imageproc::point::Point<i32>]) -> Rect {
    let (mut x0, mut y0, mut x1, mut y1) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
    for p in points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1)
}

/// 颜色检测: 最大外轮廓面积 > 100 命中, 置信度 = min(面积/10000, 1)
pub fn detect_color(name: &str, frame: &Frame, range: &ColorRange) -> DetectionResult {
    let mask = color_mask(frame, range);
    let largest = find_contours::<i32>(&mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| (polygon_area(&c.points), c))
        .max_by(|a, b| a.0.total_cmp(&b.0));

    match largest {
        Some((area, contour)) if area > MIN_CONTOUR_AREA => {
            let bbox = bounding_rect(&contour.points);
            let confidence = (area / FULL_CONFIDENCE_AREA).min(1.0) as f32;
            let center = Point::new(bbox.x + bbox.width / 2, bbox.y + bbox.height / 2);
            DetectionResult::hit(name, confidence, center, bbox)
        }
        _ => DetectionResult::not_found(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: ColorRange = ColorRange {
        hsv_low: [0, 150, 150],
        hsv_high: [10, 255, 255],
    };

    fn frame_with_square(side: u32, at: (u32, u32)) -> Frame {
        let (w, h) = (200u32, 200u32);
        let mut data = [0u8, 0, 0, 255].repeat((w * h) as usize);
        for y in at.1..at.1 + side {
            for x in at.0..at.0 + side {
                let i = ((y * w + x) * 4) as usize;
                data[i..i + 4].copy_from_slice(&[230, 20, 20, 255]);
            }
        }
        Frame::from_rgba(w, h, data, 0)
    }

    #[test]
    fn test_hsv_matches_opencv_scale() {
        assert_eq!(rgb_to_hsv(255, 0, 0), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 255, 0), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 0, 255), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(128, 128, 128), [0, 0, 128]);
        assert_eq!(rgb_to_hsv(255, 0, 1)[0], 0);
    }

    #[test]
    fn test_small_blob_not_found() {
        // 10×10 像素的轮廓面积为 81
        let frame = frame_with_square(10, (50, 50));
        assert!(!detect_color("red", &frame, &RED).found);
    }

    #[test]
    fn test_blob_found_with_bbox_center() {
        let frame = frame_with_square(20, (40, 60));
        let result = detect_color("red", &frame, &RED);
        assert!(result.found);
        assert_eq!(result.region, Some(Rect::new(40, 60, 20, 20)));
        assert_eq!(result.location, Some(Point::new(50, 70)));
        assert!((result.confidence - 361.0 / 10_000.0).abs() < 1e-4);
    }

    #[test]
    fn test_confidence_clamps_to_one() {
        let frame = frame_with_square(150, (10, 10));
        let result = detect_color("red", &frame, &RED);
        assert!(result.found);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_largest_contour_wins() {
        let mut frame = frame_with_square(30, (10, 10));
        let mut data = (*frame.data).clone();
        for y in 100..150u32 {
            for x in 100..150u32 {
                let i = ((y * 200 + x) * 4) as usize;
                data[i..i + 4].copy_from_slice(&[230, 20, 20, 255]);
            }
        }
        frame.data = std::sync::Arc::new(data);
        let result = detect_color("red", &frame, &RED);
        assert_eq!(result.location, Some(Point::new(125, 125)));
    }

    #[test]
    fn test_no_match_on_empty_mask() {
        let frame = Frame::from_rgba(32, 32, vec![0; 32 * 32 * 4], 0);
        assert!(!detect_color("red", &frame, &RED).found);
    }
}
