use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// 管线公共数据结构
/// Data structures shared by every pipeline stage

// ========== 帧 ==========

/// 已解码帧 (解码线程 → 分发中心 → 共享内存/决策引擎)
///
/// 像素为紧凑 RGBA8, 通过 `Arc` 共享, 下游只读, 分发时零拷贝。
#[derive(Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub stride: u32,        // 每行字节数
    pub data: Arc<Vec<u8>>, // 使用Arc共享数据,避免复制
    pub frame_number: u64,  // 单调递增
    pub captured_at: Instant,
}

impl Frame {
    /// 从紧凑 RGBA 缓冲区构建帧 (stride = width * 4)
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>, frame_number: u64) -> Self {
        Self {
            width,
            height,
            stride: width * 4,
            data: Arc::new(data),
            frame_number,
            captured_at: Instant::now(),
        }
    }

    /// 像素缓冲区与宽高/步长是否一致
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.stride >= self.width * 4
            && self.data.len() >= self.stride as usize * self.height as usize
    }

    /// 读取单个像素, 越界返回 None
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y as usize * self.stride as usize + x as usize * 4;
        let px = self.data.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// 去掉行填充后的紧凑 RGBA 数据
    pub fn packed_rgba(&self) -> Vec<u8> {
        let row = self.width as usize * 4;
        if self.stride as usize == row {
            return self.data[..row * self.height as usize].to_vec();
        }
        let mut out = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * self.stride as usize;
            out.extend_from_slice(&self.data[start..start + row]);
        }
        out
    }

    pub fn screen_center(&self) -> Point {
        Point::new(self.width as i32 / 2, self.height as i32 / 2)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("number", &self.frame_number)
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field("stride", &self.stride)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ========== 几何 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 矩形区域 (左上角 + 宽高)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// 裁剪到 [0,w)×[0,h), 完全在外时返回 None
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = self.right().min(width as i32);
        let y1 = self.bottom().min(height as i32);
        (x1 > x0 && y1 > y0).then(|| Rect::new(x0, y0, x1 - x0, y1 - y0))
    }
}

// ========== 检测结果 ==========

/// 单个检测目标在一次 tick 中的结果
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub name: String,
    pub found: bool,
    pub confidence: f32, // [0,1]
    pub location: Option<Point>,
    pub region: Option<Rect>,
}

impl DetectionResult {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            found: false,
            confidence: 0.0,
            location: None,
            region: None,
        }
    }

    pub fn hit(name: impl Into<String>, confidence: f32, location: Point, region: Rect) -> Self {
        Self {
            name: name.into(),
            found: true,
            confidence: confidence.clamp(0.0, 1.0),
            location: Some(location),
            region: Some(region),
        }
    }
}

// ========== 动作 ==========

/// 动作类型 (数值与共享内存动作记录一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ActionType {
    #[default]
    #[serde(alias = "none")]
    None = 0,
    #[serde(alias = "tap")]
    Tap = 1,
    #[serde(alias = "swipe")]
    Swipe = 2,
    #[serde(alias = "long_press")]
    LongPress = 3,
    #[serde(alias = "drag")]
    Drag = 4,
    #[serde(alias = "wait")]
    Wait = 5,
}

impl ActionType {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::None,
            1 => Self::Tap,
            2 => Self::Swipe,
            3 => Self::LongPress,
            4 => Self::Drag,
            5 => Self::Wait,
            _ => return None,
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Tap => "TAP",
            Self::Swipe => "SWIPE",
            Self::LongPress => "LONG_PRESS",
            Self::Drag => "DRAG",
            Self::Wait => "WAIT",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 抽象动作 (由引擎或外部大脑产生, 手势执行器消费一次)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Action {
    pub kind: ActionType,
    pub start: Point,
    pub end: Point,
    pub duration_ms: i32,
    pub hold_ms: i32,
    pub randomize: f32, // >0 时启用坐标随机化
}

impl Action {
    pub fn tap(at: Point) -> Self {
        Self {
            kind: ActionType::Tap,
            start: at,
            end: at,
            randomize: 1.0,
            ..Default::default()
        }
    }

    pub fn swipe(kind: ActionType, start: Point, end: Point, duration_ms: i32) -> Self {
        Self {
            kind,
            start,
            end,
            duration_ms,
            randomize: 1.0,
            ..Default::default()
        }
    }

    pub fn long_press(at: Point, duration_ms: i32) -> Self {
        Self {
            kind: ActionType::LongPress,
            start: at,
            end: at,
            duration_ms,
            hold_ms: duration_ms,
            randomize: 1.0,
        }
    }

    pub fn wait(duration_ms: i32) -> Self {
        Self {
            kind: ActionType::Wait,
            duration_ms,
            ..Default::default()
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind == ActionType::None
    }
}

/// 外部大脑状态 (共享内存 current_state 字段)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum BrainState {
    #[default]
    Idle = 0,
    Detecting = 1,
    ActionPending = 2,
    Executing = 3,
    Paused = 4,
    Error = 5,
}

impl BrainState {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Idle,
            1 => Self::Detecting,
            2 => Self::ActionPending,
            3 => Self::Executing,
            4 => Self::Paused,
            5 => Self::Error,
            _ => return None,
        })
    }
}

impl fmt::Display for BrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Detecting => "DETECTING",
            Self::ActionPending => "ACTION_PENDING",
            Self::Executing => "EXECUTING",
            Self::Paused => "PAUSED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_respects_stride() {
        let mut frame = Frame::from_rgba(2, 2, vec![0; 24], 0);
        frame.stride = 12;
        let mut data = vec![0u8; 24];
        data[12..16].copy_from_slice(&[1, 2, 3, 4]);
        frame.data = Arc::new(data);
        assert_eq!(frame.pixel(0, 1), Some([1, 2, 3, 4]));
        assert_eq!(frame.pixel(2, 0), None);
        assert_eq!(frame.packed_rgba().len(), 16);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_rect_clamp() {
        let r = Rect::new(-10, -10, 30, 30);
        assert_eq!(r.clamp_to(15, 100), Some(Rect::new(0, 0, 15, 20)));
        assert_eq!(Rect::new(50, 50, 5, 5).clamp_to(10, 10), None);
        assert_eq!(Rect::new(0, 0, 10, 20).center(), Point::new(5, 10));
    }

    #[test]
    fn test_action_type_wire_values() {
        for v in 0..6 {
            assert_eq!(ActionType::from_u32(v).map(ActionType::as_u32), Some(v));
        }
        assert_eq!(ActionType::from_u32(6), None);
        let parsed: ActionType = serde_json::from_str("\"LONG_PRESS\"").unwrap();
        assert_eq!(parsed, ActionType::LongPress);
        let parsed: ActionType = serde_json::from_str("\"tap\"").unwrap();
        assert_eq!(parsed, ActionType::Tap);
    }

    #[test]
    fn test_brain_state_display() {
        assert_eq!(BrainState::from_u32(2), Some(BrainState::ActionPending));
        assert_eq!(BrainState::ActionPending.to_string(), "ACTION_PENDING");
        assert_eq!(BrainState::from_u32(9), None);
    }
}
