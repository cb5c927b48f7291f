/// 视频输入系统 (Video Input System)
///
/// 独立解码线程, 负责设备视频流的接入与解码
/// - device:   设备隧道 (adb 部署 scrcpy-server / 直连端口)
/// - protocol: 视频握手 (设备名 + 分辨率)
/// - annexb:   H.264 Annex-B 分帧
/// - decoder:  H.264 → RGBA 解码
/// - stream:   StreamClient 连接与解码循环
pub mod annexb;
pub mod decoder;
pub mod device;
pub mod protocol;
pub mod stream;

pub use annexb::AnnexBParser;
pub use decoder::{openh264_factory, DecodedFrame, DecoderFactory, FrameDecoder, OpenH264Decoder};
pub use device::{AdbTunnel, DeviceTunnel, DirectTunnel, ScrcpyOptions};
pub use protocol::{read_handshake, StreamInfo};
pub use stream::{connect_with_retry, ConnectOptions, StreamClient, StreamEnd};
