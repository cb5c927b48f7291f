//! 模板匹配 (Template matching)
//!
//! 灰度 (r+g+b)/3 上的零均值归一化互相关, 对搜索区域内每个偏移逐一打分。
//! 窗口均值/方差取自积分图, 每个偏移只剩互相关项需要逐像素累加。

use std::path::Path;

use crate::error::ConfigError;
use crate::types::{DetectionResult, Frame, Point, Rect};

/// 命中阈值 (得分 ≥ 阈值即命中)
pub const MATCH_THRESHOLD: f32 = 0.70;

/// 预处理后的模板 (零均值灰度)
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    width: u32,
    height: u32,
    centered: Vec<f32>, // 减去均值后的灰度
    norm: f32,          // sqrt(Σ centered²)
}

/// 最佳匹配位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    pub score: f32,
    pub offset: Point, // 模板左上角在帧中的位置
}

fn gray(px: &[u8]) -> f32 {
    (px[0] as f32 + px[1] as f32 + px[2] as f32) / 3.0
}

impl Template {
    /// 从紧凑 RGBA 像素构建
    pub fn from_rgba(name: &str, width: u32, height: u32, rgba: &[u8]) -> Result<Self, ConfigError> {
        let n = width as usize * height as usize;
        if n == 0 || rgba.len() < n * 4 {
            return Err(ConfigError::Template {
                name: name.to_string(),
                reason: format!("{}x{} template with {} bytes", width, height, rgba.len()),
            });
        }
        let values: Vec<f32> = rgba.chunks_exact(4).take(n).map(gray).collect();
        let mean = values.iter().sum::<f32>() / n as f32;
        let centered: Vec<f32> = values.iter().map(|v| v - mean).collect();
        let norm = centered.iter().map(|v| v * v).sum::<f32>().sqrt();
        Ok(Self {
            name: name.to_string(),
            width,
            height,
            centered,
            norm,
        })
    }

    /// 从图片文件加载 (名称取文件名主干)
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let img = image::open(path)
            .map_err(|e| ConfigError::Template {
                name: name.clone(),
                reason: e.to_string(),
            })?
            .to_rgba8();
        Self::from_rgba(&name, img.width(), img.height(), img.as_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// 在帧的搜索区域内寻找最佳匹配; 模板放不进区域时返回 None
    pub fn best_match(&self, frame: &Frame, search: Option<Rect>) -> Option<TemplateMatch> {
        let full = Rect::new(0, 0, frame.width as i32, frame.height as i32);
        let area = search.unwrap_or(full).clamp_to(frame.width, frame.height)?;
        let (tw, th) = (self.width as i32, self.height as i32);
        if area.width < tw || area.height < th {
            return None;
        }

        // 搜索区域灰度缓存
        let aw = area.width as usize;
        let mut plane = Vec::with_capacity(aw * area.height as usize);
        for y in area.y..area.bottom() {
            let row = y as usize * frame.stride as usize;
            let start = row + area.x as usize * 4;
            plane.extend(frame.data[start..start + aw * 4].chunks_exact(4).map(gray));
        }
        let integral = Integral::new(&plane, aw, area.height as usize);

        let mut best = TemplateMatch {
            score: f32::MIN,
            offset: Point::new(0, 0),
        };
        for y in 0..=(area.height - th) {
            for x in 0..=(area.width - tw) {
                let score = self.score_at(&plane, &integral, x as usize, y as usize);
                if score > best.score {
                    best = TemplateMatch {
                        score,
                        offset: Point::new(x, y),
                    };
                }
            }
        }

        best.offset = Point::new(best.offset.x + area.x, best.offset.y + area.y);
        Some(best)
    }

    /// 匹配并转换为检测结果 (location = 偏移 + 模板中心)
    pub fn detect(&self, frame: &Frame, search: Option<Rect>, threshold: f32) -> DetectionResult {
        match self.best_match(frame, search) {
            Some(m) if m.score >= threshold => {
                let region = Rect::new(m.offset.x, m.offset.y, self.width as i32, self.height as i32);
                let center = Point::new(
                    m.offset.x + self.width as i32 / 2,
                    m.offset.y + self.height as i32 / 2,
                );
                DetectionResult::hit(&self.name, m.score, center, region)
            }
            Some(m) => {
                log::trace!("{}: 最佳得分 {:.3} 低于阈值 {:.2}", self.name, m.score, threshold);
                DetectionResult::not_found(&self.name)
            }
            None => DetectionResult::not_found(&self.name),
        }
    }

    fn score_at(&self, plane: &[f32], integral: &Integral, x: usize, y: usize) -> f32 {
        if self.norm <= f32::EPSILON {
            return 0.0;
        }
        let (tw, th) = (self.width as usize, self.height as usize);
        let (sum, sum_sq) = integral.window(x, y, tw, th);
        let var = sum_sq - sum * sum / (tw * th) as f64;
        if var <= 1e-6 {
            return 0.0;
        }

        // 模板已去均值, Σ t·(f - f̄) = Σ t·f
        let plane_w = integral.width;
        let mut cross = 0.0f64;
        for ty in 0..th {
            let row = &plane[(y + ty) * plane_w + x..(y + ty) * plane_w + x + tw];
            let trow = &self.centered[ty * tw..(ty + 1) * tw];
            cross += row
                .iter()
                .zip(trow)
                .map(|(&f, &t)| f as f64 * t as f64)
                .sum::<f64>();
        }
        (cross / (var.sqrt() * self.norm as f64)).clamp(-1.0, 1.0) as f32
    }
}

/// 灰度与灰度平方的积分图 ((w+1)×(h+1), 首行首列为 0)
struct Integral {
    width: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Integral {
    fn new(plane: &[f32], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sum = vec![0.0f64; stride * (height + 1)];
        let mut sum_sq = vec![0.0f64; stride * (height + 1)];
        for y in 0..height {
            let (mut row, mut row_sq) = (0.0f64, 0.0f64);
            for x in 0..width {
                let v = plane[y * width + x] as f64;
                row += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row;
                sum_sq[i] = sum_sq[i - stride] + row_sq;
            }
        }
        Self { width, sum, sum_sq }
    }

    /// 窗口 (x, y, w, h) 内的 (Σf, Σf²)
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let stride = self.width + 1;
        let (a, b) = (y * stride + x, y * stride + x + w);
        let (c, d) = ((y + h) * stride + x, (y + h) * stride + x + w);
        (
            self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
            self.sum_sq[d] - self.sum_sq[b] - self.sum_sq[c] + self.sum_sq[a],
        )
    }
}
