/// 拟人化手势 (Humanized Gestures)
///
/// - bezier:   三次贝塞尔轨迹
/// - control:  设备输入通道 (adb / 记录)
/// - executor: 动作 → 输入命令
pub mod bezier;
pub mod control;
pub mod executor;

pub use bezier::CubicBezier;
pub use control::{AdbControl, DeviceControl, InputCommand, RecordingControl};
pub use executor::{GestureConfig, GestureExecutor};
