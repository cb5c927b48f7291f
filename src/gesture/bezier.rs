use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::types::Point;

/// 三次贝塞尔曲线 (手势轨迹)
///
/// 计算全程使用 f64, 只在采样输出时取整,
/// 因此 `point_at(0.0)` 与 `point_at(1.0)` 精确等于端点。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicBezier {
    pub p0: (f64, f64),
    pub p1: (f64, f64),
    pub p2: (f64, f64),
    pub p3: (f64, f64),
}

/// N(0, sigma) 采样; sigma 非正时返回 0
pub(crate) fn gauss<R: Rng + ?Sized>(rng: &mut R, sigma: f64) -> f64 {
    if !(sigma > 0.0) {
        return 0.0;
    }
    match Normal::new(0.0, sigma) {
        Ok(normal) => normal.sample(rng),
        Err(_) => 0.0,
    }
}

fn as_f64(p: Point) -> (f64, f64) {
    (p.x as f64, p.y as f64)
}

impl CubicBezier {
    pub fn new(p0: Point, p1: Point, p2: Point, p3: Point) -> Self {
        Self {
            p0: as_f64(p0),
            p1: as_f64(p1),
            p2: as_f64(p2),
            p3: as_f64(p3),
        }
    }

    /// 在两端点之间生成自然曲线
    ///
    /// 控制点位于弦长 1/3 与 2/3 处, 沿垂线方向偏移 N(0, 弦长 × variance)。
    pub fn from_endpoints<R: Rng + ?Sized>(
        start: Point,
        end: Point,
        variance: f64,
        rng: &mut R,
    ) -> Self {
        let (x0, y0) = as_f64(start);
        let (x3, y3) = as_f64(end);
        let dx = x3 - x0;
        let dy = y3 - y0;
        let dist = (dx * dx + dy * dy).sqrt();

        let (perp_x, perp_y) = if dist > 0.0 {
            (-dy / dist, dx / dist)
        } else {
            (0.0, 0.0)
        };
        let off1 = gauss(rng, dist * variance);
        let off2 = gauss(rng, dist * variance);

        Self {
            p0: (x0, y0),
            p1: (
                x0 + dx / 3.0 + perp_x * off1,
                y0 + dy / 3.0 + perp_y * off1,
            ),
            p2: (
                x0 + dx * 2.0 / 3.0 + perp_x * off2,
                y0 + dy * 2.0 / 3.0 + perp_y * off2,
            ),
            p3: (x3, y3),
        }
    }

    /// 参数 t ∈ [0,1] 处的点 (越界截断)
    pub fn point_at(&self, t: f64) -> (f64, f64) {
        let t = t.clamp(0.0, 1.0);
        let mt = 1.0 - t;
        let a = mt * mt * mt;
        let b = 3.0 * mt * mt * t;
        let c = 3.0 * mt * t * t;
        let d = t * t * t;
        (
            a * self.p0.0 + b * self.p1.0 + c * self.p2.0 + d * self.p3.0,
            a * self.p0.1 + b * self.p1.1 + c * self.p2.1 + d * self.p3.1,
        )
    }

    /// 等参数间隔采样 n 个整数点 (n < 2 按 2 处理)
    pub fn sample(&self, n: usize) -> Vec<Point> {
        let n = n.max(2);
        (0..n)
            .map(|i| {
                let (x, y) = self.point_at(i as f64 / (n - 1) as f64);
                Point::new(x.round() as i32, y.round() as i32)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_endpoints_exact() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let start = Point::new(rng.gen_range(-500..500), rng.gen_range(-500..500));
            let end = Point::new(rng.gen_range(-500..500), rng.gen_range(-500..500));
            let curve = CubicBezier::from_endpoints(start, end, 0.8, &mut rng);
            assert_eq!(curve.point_at(0.0), (start.x as f64, start.y as f64));
            assert_eq!(curve.point_at(1.0), (end.x as f64, end.y as f64));
            let pts = curve.sample(10);
            assert_eq!(pts[0], start);
            assert_eq!(pts[9], end);
        }
    }

    #[test]
    fn test_samples_follow_parameter() {
        // 无偏移时曲线退化为直线, 采样点沿参数单调
        let curve = CubicBezier::from_endpoints(
            Point::new(0, 0),
            Point::new(900, 300),
            0.0,
            &mut StdRng::seed_from_u64(1),
        );
        let pts = curve.sample(20);
        assert_eq!(pts.len(), 20);
        for w in pts.windows(2) {
            assert!(w[1].x >= w[0].x && w[1].y >= w[0].y, "{:?}", w);
        }
    }

    #[test]
    fn test_degenerate_chord() {
        let p = Point::new(5, 5);
        let curve = CubicBezier::from_endpoints(p, p, 0.15, &mut StdRng::seed_from_u64(3));
        assert!(curve.sample(4).iter().all(|q| *q == p));
        assert_eq!(curve.sample(0).len(), 2);
    }

    #[test]
    fn test_point_at_clamps() {
        let curve = CubicBezier::new(
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(20, 0),
            Point::new(30, 0),
        );
        assert_eq!(curve.point_at(-1.0), (0.0, 0.0));
        assert_eq!(curve.point_at(2.0), (30.0, 0.0));
        assert!((curve.point_at(0.5).0 - 15.0).abs() < 1e-9);
    }
}
