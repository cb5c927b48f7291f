//! 手势执行器 (GestureExecutor)
//! 把抽象动作转换为拟人化的底层输入: 坐标高斯偏移, 动作间隔抖动, 贝塞尔轨迹

use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::bezier::{gauss, CubicBezier};
use super::control::DeviceControl;
use crate::error::ControlError;
use crate::types::{Action, ActionType, Point};

const DEFAULT_LONG_PRESS_MS: i32 = 500;

/// 拟人化参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub click_offset_min: f64,    // 点击偏移标准差下限 (px)
    pub click_offset_max: f64,    // 点击偏移标准差上限 (px)
    pub gap_min_ms: u64,          // 动作最小间隔
    pub gap_max_ms: u64,          // 动作最大间隔
    pub bezier_variance: f64,     // 控制点偏移 / 弦长
    pub swipe_points: usize,
    pub drag_points: usize,
    pub swipe_jitter_ms: i32,     // 滑动时长抖动 ±
    pub long_press_jitter_ms: i32, // 长按时长抖动 ±
    pub double_tap_pause_min_ms: u64,
    pub double_tap_pause_max_ms: u64,
    pub max_duration_ms: u32,     // 长按/滑动/等待时长上限 (外部动作可能给出任意值)
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            click_offset_min: 3.0,
            click_offset_max: 7.0,
            gap_min_ms: 15,
            gap_max_ms: 50,
            bezier_variance: 0.15,
            swipe_points: 10,
            drag_points: 15,
            swipe_jitter_ms: 30,
            long_press_jitter_ms: 50,
            double_tap_pause_min_ms: 50,
            double_tap_pause_max_ms: 100,
            max_duration_ms: 10_000,
        }
    }
}

fn uniform_u64(rng: &mut StdRng, lo: u64, hi: u64) -> u64 {
    if hi <= lo {
        lo
    } else {
        rng.gen_range(lo..=hi)
    }
}

pub struct GestureExecutor {
    control: Box<dyn DeviceControl>,
    config: GestureConfig,
    rng: StdRng,
    last_action: Option<Instant>,
}

impl GestureExecutor {
    pub fn new(control: Box<dyn DeviceControl>, config: GestureConfig) -> Self {
        Self::with_rng(control, config, StdRng::from_entropy())
    }

    /// 固定种子 (结果可复现)
    pub fn with_seed(control: Box<dyn DeviceControl>, config: GestureConfig, seed: u64) -> Self {
        Self::with_rng(control, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(control: Box<dyn DeviceControl>, config: GestureConfig, rng: StdRng) -> Self {
        Self {
            control,
            config,
            rng,
            last_action: None,
        }
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    /// 保证与上一个动作之间至少间隔一个随机时长
    pub fn wait_gap(&mut self) {
        let gap = Duration::from_millis(uniform_u64(
            &mut self.rng,
            self.config.gap_min_ms,
            self.config.gap_max_ms,
        ));
        if let Some(last) = self.last_action {
            let elapsed = last.elapsed();
            if elapsed < gap {
                thread::sleep(gap - elapsed);
            }
        }
        self.last_action = Some(Instant::now());
    }

    fn randomize_point(&mut self, p: Point) -> Point {
        let (lo, hi) = (self.config.click_offset_min, self.config.click_offset_max);
        let sigma = if hi > lo { self.rng.gen_range(lo..=hi) } else { lo };
        let dx = gauss(&mut self.rng, sigma).round() as i32;
        let dy = gauss(&mut self.rng, sigma).round() as i32;
        Point::new(p.x + dx, p.y + dy)
    }

    /// 限制在 [1, max_duration_ms]
    fn clamp_duration(&self, duration_ms: i32) -> u32 {
        (duration_ms.max(1) as u32).min(self.config.max_duration_ms.max(1))
    }

    fn jitter(&mut self, duration_ms: i32, spread: i32) -> u32 {
        let j = if spread > 0 {
            self.rng.gen_range(-spread..=spread)
        } else {
            0
        };
        self.clamp_duration(duration_ms.saturating_add(j))
    }

    /// 单击, 返回实际点击坐标
    pub fn tap(&mut self, at: Point, randomize: bool) -> Result<Point, ControlError> {
        self.wait_gap();
        let p = if randomize { self.randomize_point(at) } else { at };
        self.control.tap(p.x, p.y)?;
        Ok(p)
    }

    /// 长按: 起止相同的滑动
    pub fn long_press(
        &mut self,
        at: Point,
        duration_ms: i32,
        randomize: bool,
    ) -> Result<Point, ControlError> {
        self.wait_gap();
        let (p, dur) = if randomize {
            let p = self.randomize_point(at);
            (p, self.jitter(duration_ms, self.config.long_press_jitter_ms))
        } else {
            (at, self.clamp_duration(duration_ms))
        };
        self.control.swipe(p.x, p.y, p.x, p.y, dur)?;
        Ok(p)
    }

    /// 直线滑动 (单条命令)
    pub fn swipe_linear(
        &mut self,
        start: Point,
        end: Point,
        duration_ms: i32,
        randomize: bool,
    ) -> Result<(), ControlError> {
        self.wait_gap();
        let (a, b, dur) = if randomize {
            let a = self.randomize_point(start);
            let b = self.randomize_point(end);
            (a, b, self.jitter(duration_ms, self.config.swipe_jitter_ms))
        } else {
            (start, end, self.clamp_duration(duration_ms))
        };
        self.control.swipe(a.x, a.y, b.x, b.y, dur)
    }

    /// 沿贝塞尔曲线分段滑动, 返回经过的采样点
    pub fn swipe_bezier(
        &mut self,
        start: Point,
        end: Point,
        duration_ms: i32,
        steps: usize,
        randomize: bool,
    ) -> Result<Vec<Point>, ControlError> {
        self.wait_gap();
        let (a, b, dur) = if randomize {
            let a = self.randomize_point(start);
            let b = self.randomize_point(end);
            (a, b, self.jitter(duration_ms, self.config.swipe_jitter_ms))
        } else {
            (start, end, self.clamp_duration(duration_ms))
        };

        let curve = CubicBezier::from_endpoints(a, b, self.config.bezier_variance, &mut self.rng);
        let points = curve.sample(steps);
        let step_ms = dur as f64 / (points.len() - 1) as f64;
        let step_duration = (step_ms.round() as u32).max(1);

        for seg in points.windows(2) {
            self.control
                .swipe(seg[0].x, seg[0].y, seg[1].x, seg[1].y, step_duration)?;
            thread::sleep(Duration::from_secs_f64(step_ms * 0.5 / 1000.0));
        }
        debug!("🖐 贝塞尔滑动 {:?} → {:?} ({} 段, {}ms)", a, b, points.len() - 1, dur);
        Ok(points)
    }

    /// 拖拽: 更密的贝塞尔采样
    pub fn drag(
        &mut self,
        start: Point,
        end: Point,
        duration_ms: i32,
        randomize: bool,
    ) -> Result<Vec<Point>, ControlError> {
        let steps = self.config.drag_points;
        self.swipe_bezier(start, end, duration_ms, steps, randomize)
    }

    pub fn double_tap(&mut self, at: Point) -> Result<(), ControlError> {
        self.tap(at, true)?;
        let pause = uniform_u64(
            &mut self.rng,
            self.config.double_tap_pause_min_ms,
            self.config.double_tap_pause_max_ms,
        );
        thread::sleep(Duration::from_millis(pause));
        // 第二次点击紧跟短暂停顿, 不再叠加动作间隔
        self.last_action = None;
        self.tap(at, true)?;
        Ok(())
    }

    /// 按动作类型分发
    pub fn execute(&mut self, action: &Action) -> Result<(), ControlError> {
        let randomize = action.randomize > 0.0;
        match action.kind {
            ActionType::None => Ok(()),
            ActionType::Wait => {
                if action.duration_ms > 0 {
                    let ms = self.clamp_duration(action.duration_ms);
                    thread::sleep(Duration::from_millis(ms as u64));
                }
                Ok(())
            }
            ActionType::Tap => self.tap(action.start, randomize).map(|_| ()),
            ActionType::LongPress => {
                let dur = if action.duration_ms > 0 {
                    action.duration_ms
                } else {
                    DEFAULT_LONG_PRESS_MS
                };
                self.long_press(action.start, dur, randomize).map(|_| ())
            }
            ActionType::Swipe => {
                let steps = self.config.swipe_points;
                self.swipe_bezier(action.start, action.end, action.duration_ms, steps, randomize)
                    .map(|_| ())
            }
            ActionType::Drag => self
                .drag(action.start, action.end, action.duration_ms, randomize)
                .map(|_| ()),
        }
    }

    /// 仅生成曲线点 (不发送输入)
    pub fn bezier_preview(&mut self, start: Point, end: Point, n: usize) -> Vec<Point> {
        CubicBezier::from_endpoints(start, end, self.config.bezier_variance, &mut self.rng)
            .sample(n)
    }
}
