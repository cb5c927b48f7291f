/// 工具模块
/// Utility modules
pub mod resize;
pub mod worker;

pub use resize::resize_rgba_into;
pub use worker::Worker;

/// 墙钟纳秒时间戳 (跨进程可比, 写入共享内存)
pub fn wall_clock_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
