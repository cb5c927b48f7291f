//! 共享内存布局 (与原生大脑进程的 C 头文件逐字节对齐, 小端)
//!
//! ```text
//! 0      header (4096B)
//! 96       results[16] × 48B
//! 864      pending action 32B
//! 4096   frame region (RGBA8, width × height × 4)
//! ```

use crate::types::{Action, ActionType, Point, Rect};

pub const MAGIC: u32 = 0x5241_5348; // "RASH"
pub const VERSION: u32 = 1;
pub const DEFAULT_NAME: &str = "rashplayer_shm";

pub const HEADER_SIZE: usize = 4096;
pub const MAX_RESULTS: usize = 16;
pub const RESULT_SIZE: usize = 48;
pub const ACTION_SIZE: usize = 32;

/// 原生大脑默认映射的最大帧容量
pub const MAX_FRAME_WIDTH: u32 = 1920;
pub const MAX_FRAME_HEIGHT: u32 = 1080;

/// 头部字段偏移
pub mod offset {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 4;
    pub const FRAME_NUMBER: usize = 8;
    pub const FRAME_TIMESTAMP: usize = 16;
    pub const FRAME_READY: usize = 24;
    pub const RESULT_READY: usize = 28;
    pub const CURRENT_STATE: usize = 32;
    pub const FRAME_WIDTH: usize = 40;
    pub const FRAME_HEIGHT: usize = 44;
    pub const FRAME_STRIDE: usize = 48;
    pub const VISION_LATENCY: usize = 56;
    pub const BRAIN_LATENCY: usize = 64;
    pub const TOTAL_LATENCY: usize = 72;
    pub const NUM_RESULTS: usize = 88;
    pub const RESULTS: usize = 96;
    pub const ACTION: usize = 864;
}

const _: () = assert!(offset::RESULTS + MAX_RESULTS * RESULT_SIZE == offset::ACTION);
const _: () = assert!(offset::ACTION + ACTION_SIZE <= HEADER_SIZE);

/// 段总大小
pub fn segment_size(width: u32, height: u32) -> usize {
    HEADER_SIZE + frame_size(width, height)
}

pub fn frame_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// 单条识别结果记录 (48B)
///
/// | off | field |
/// |---|---|
/// | 0 | trigger_id u32 |
/// | 4 | found u8 (+3 pad) |
/// | 8 | confidence f32 |
/// | 12 | location i32×2 |
/// | 20 | bbox i32×4 (x, y, w, h) |
/// | 40 | timestamp_ns u64 |
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResultRecord {
    pub trigger_id: u32,
    pub found: bool,
    pub confidence: f32,
    pub location: Point,
    pub bbox: Rect,
    pub timestamp_ns: u64,
}

impl ResultRecord {
    pub fn encode(&self) -> [u8; RESULT_SIZE] {
        let mut b = [0u8; RESULT_SIZE];
        put_u32(&mut b, 0, self.trigger_id);
        b[4] = self.found as u8;
        put_f32(&mut b, 8, self.confidence);
        put_i32(&mut b, 12, self.location.x);
        put_i32(&mut b, 16, self.location.y);
        put_i32(&mut b, 20, self.bbox.x);
        put_i32(&mut b, 24, self.bbox.y);
        put_i32(&mut b, 28, self.bbox.width);
        put_i32(&mut b, 32, self.bbox.height);
        put_u64(&mut b, 40, self.timestamp_ns);
        b
    }

    pub fn decode(b: &[u8; RESULT_SIZE]) -> Self {
        Self {
            trigger_id: get_u32(b, 0),
            found: b[4] != 0,
            confidence: get_f32(b, 8),
            location: Point::new(get_i32(b, 12), get_i32(b, 16)),
            bbox: Rect::new(get_i32(b, 20), get_i32(b, 24), get_i32(b, 28), get_i32(b, 32)),
            timestamp_ns: get_u64(b, 40),
        }
    }
}

/// 动作记录 (32B): type, start, end, duration_ms, hold_ms, randomize
pub fn encode_action(action: &Action) -> [u8; ACTION_SIZE] {
    let mut b = [0u8; ACTION_SIZE];
    put_u32(&mut b, 0, action.kind.as_u32());
    put_i32(&mut b, 4, action.start.x);
    put_i32(&mut b, 8, action.start.y);
    put_i32(&mut b, 12, action.end.x);
    put_i32(&mut b, 16, action.end.y);
    put_i32(&mut b, 20, action.duration_ms);
    put_i32(&mut b, 24, action.hold_ms);
    put_f32(&mut b, 28, action.randomize);
    b
}

/// 解码动作记录; 未知动作类型按 NONE 处理
pub fn decode_action(b: &[u8; ACTION_SIZE]) -> Action {
    Action {
        kind: ActionType::from_u32(get_u32(b, 0)).unwrap_or(ActionType::None),
        start: Point::new(get_i32(b, 4), get_i32(b, 8)),
        end: Point::new(get_i32(b, 12), get_i32(b, 16)),
        duration_ms: get_i32(b, 20),
        hold_ms: get_i32(b, 24),
        randomize: get_f32(b, 28),
    }
}

// ========== 小端读写 ==========

fn put_u32(b: &mut [u8], off: usize, v: u32) {
    b[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_i32(b: &mut [u8], off: usize, v: i32) {
    b[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_f32(b: &mut [u8], off: usize, v: f32) {
    b[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u64(b: &mut [u8], off: usize, v: u64) {
    b[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

fn get_u32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn get_i32(b: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn get_f32(b: &[u8], off: usize) -> f32 {
    f32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn get_u64(b: &[u8], off: usize) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_record_byte_positions() {
        let rec = ResultRecord {
            trigger_id: 7,
            found: true,
            confidence: 0.5,
            location: Point::new(100, -2),
            bbox: Rect::new(1, 2, 3, 4),
            timestamp_ns: 0x0102_0304_0506_0708,
        };
        let b = rec.encode();
        assert_eq!(&b[0..4], &[7, 0, 0, 0]);
        assert_eq!(b[4], 1);
        assert_eq!(&b[8..12], &0.5f32.to_le_bytes());
        assert_eq!(&b[12..16], &[100, 0, 0, 0]);
        assert_eq!(&b[16..20], &[0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(&b[32..36], &[4, 0, 0, 0]);
        assert_eq!(&b[40..48], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(ResultRecord::decode(&b), rec);
    }

    #[test]
    fn test_action_record_unknown_type_is_none() {
        let mut b = encode_action(&Action::tap(Point::new(5, 6)));
        assert_eq!(&b[0..4], &[1, 0, 0, 0]);
        assert_eq!(decode_action(&b).start, Point::new(5, 6));
        b[0] = 42;
        assert_eq!(decode_action(&b).kind, ActionType::None);
    }

    #[test]
    fn test_segment_size() {
        assert_eq!(segment_size(2, 2), 4096 + 16);
        assert_eq!(
            segment_size(MAX_FRAME_WIDTH, MAX_FRAME_HEIGHT),
            4096 + 1920 * 1080 * 4
        );
    }
}
