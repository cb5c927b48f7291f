/// 检测系统 (Detection System)
///
/// - template: 模板匹配 (归一化互相关)
/// - color:    HSV 颜色 + 轮廓
/// - detector: 统一检测接口 (本地 / 共享内存委托)
pub mod color;
pub mod detector;
pub mod template;

pub use color::ColorRange;
pub use detector::{BridgeDetector, Detector, LocalDetector};
pub use template::{Template, MATCH_THRESHOLD};
