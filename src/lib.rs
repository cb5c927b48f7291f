#![allow(clippy::type_complexity)]
pub mod bridge; // 共享内存桥
pub mod capture; // 帧分发中心
pub mod config; // 游戏状态机配置
pub mod detection; // 本地检测 / 共享内存委托检测
pub mod error; // 错误类型
pub mod fsm; // 状态机决策引擎
pub mod gesture; // 拟人化手势
pub mod input; // 视频输入系统
pub mod settings; // 运行参数
pub mod types; // 公共数据结构
pub mod utils; // 工具函数

pub use crate::bridge::SharedBridge;
pub use crate::capture::{CaptureHub, SubscriberId};
pub use crate::config::GameConfig;
pub use crate::detection::{BridgeDetector, Detector, LocalDetector};
pub use crate::fsm::{DecisionEngine, EngineCore, EngineSnapshot};
pub use crate::gesture::{GestureConfig, GestureExecutor};
pub use crate::input::{StreamClient, StreamInfo};
pub use crate::settings::RuntimeSettings;
pub use crate::types::{Action, ActionType, BrainState, DetectionResult, Frame, Point, Rect};

/// 本地时间字符串 (日志/遥测)
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{d}%m{d}%d{d}%H{d}%M{d}%S{d}%3f",
        d = delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}
