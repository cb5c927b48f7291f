/// 共享内存桥 (Shared-memory Bridge)
///
/// 与外部原生"大脑"进程交换数据的固定布局通道
/// - layout: 字节偏移与记录编解码
/// - shm:    段的创建/连接与发布/消费协议
pub mod layout;
pub mod shm;

pub use layout::{ResultRecord, DEFAULT_NAME, MAX_FRAME_HEIGHT, MAX_FRAME_WIDTH, MAX_RESULTS};
pub use shm::{default_shm_dir, segment_path, BridgeResults, Latency, SharedBridge};
