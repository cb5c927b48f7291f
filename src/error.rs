//! 错误类型 (Error types)
//!
//! 每个故障域一个枚举; 二进制入口和订阅回调统一使用 `anyhow`。

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 视频流错误
#[derive(Debug, Error)]
pub enum StreamError {
    /// 设备或传输层不可达
    #[error("connection failed: {0}")]
    Connection(String),

    /// 握手数据非法或被截断
    #[error("protocol error: {0}")]
    Protocol(String),

    /// 设备端准备步骤失败 (推送/启动/端口转发)
    #[error("setup step '{step}' failed: {reason}")]
    Setup { step: &'static str, reason: String },

    #[error("stream client is already running")]
    AlreadyRunning,

    #[error("decoder init failed: {0}")]
    Decoder(#[from] DecodeError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 单个访问单元解码失败 (丢弃该帧, 流继续)
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("h264 decoder: {0}")]
    Codec(String),

    #[error("unsupported frame geometry {width}x{height}")]
    Geometry { width: usize, height: usize },
}

/// 共享内存桥错误
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("shared memory segment not found: {0}")]
    NotFound(PathBuf),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("invalid frame size {width}x{height} (capacity {max_width}x{max_height})")]
    InvalidSize {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("frame resize failed: {0}")]
    Resize(String),

    #[error("shared memory io: {0}")]
    Io(#[from] io::Error),
}

/// 条件表达式错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unexpected token '{token}' at {pos}")]
    UnexpectedToken { token: String, pos: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("division by zero")]
    DivisionByZero,
}

/// 游戏配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("state '{state}': invalid condition '{condition}': {source}")]
    InvalidCondition {
        state: String,
        condition: String,
        #[source]
        source: ExprError,
    },

    #[error("state '{from}' references undeclared state '{to}'")]
    UnknownState { from: String, to: String },

    #[error("template '{name}': {reason}")]
    Template { name: String, reason: String },

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

/// 设备输入通道错误
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to run input command: {0}")]
    Spawn(#[from] io::Error),

    #[error("input command exited with {status}: {stderr}")]
    Command { status: String, stderr: String },
}
