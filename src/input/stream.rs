//! scrcpy 视频流客户端 (StreamClient)
//!
//! `start()` 同步完成隧道/连接/握手, 失败直接返回错误且不创建线程;
//! 成功后在独立解码线程上执行 recv → Annex-B 分帧 → 解码 → 回调。

use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::annexb::AnnexBParser;
use super::decoder::{openh264_factory, DecoderFactory, FrameDecoder};
use super::device::DeviceTunnel;
use super::protocol::{read_handshake, StreamInfo};
use crate::error::StreamError;
use crate::types::Frame;
use crate::utils::Worker;

const RECV_BUFFER_SIZE: usize = 64 * 1024;
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 帧回调 (在解码线程上同步调用, 必须快速返回)
pub type FrameCallback = Box<dyn FnMut(Frame) + Send>;
/// 流结束回调
pub type EndCallback = Box<dyn FnOnce(StreamEnd) + Send>;

/// 解码循环退出原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// 对端关闭 (recv 返回 0)
    Eof,
    /// 本地调用 stop()
    Stopped,
    Error(String),
}

/// 连接参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            retries: 5,
            retry_delay_ms: 500,
            connect_timeout_ms: 2000,
            handshake_timeout_ms: 5000,
            read_timeout_ms: 500,
        }
    }
}

/// 连接本地端口, 被拒绝时按固定间隔重试
pub fn connect_with_retry(addr: SocketAddr, options: &ConnectOptions) -> Result<TcpStream, StreamError> {
    let retries = options.retries.max(1);
    let mut last_err = None;
    for attempt in 1..=retries {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(options.connect_timeout_ms)) {
            Ok(sock) => return Ok(sock),
            Err(e) => {
                if attempt < retries {
                    warn!(
                        "⚠️ 连接 {} 失败: {}, {}ms后重试... ({}/{})",
                        addr, e, options.retry_delay_ms, attempt, retries
                    );
                    thread::sleep(Duration::from_millis(options.retry_delay_ms));
                }
                last_err = Some(e);
            }
        }
    }
    Err(StreamError::Connection(format!(
        "{} unreachable after {} attempts: {}",
        addr,
        retries,
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// 解码统计 (每秒输出一次)
struct DecodeStats {
    count: usize,
    total_frames: usize,
    dropped_frames: usize,
    last: Instant,
}

impl DecodeStats {
    fn new() -> Self {
        Self {
            count: 0,
            total_frames: 0,
            dropped_frames: 0,
            last: Instant::now(),
        }
    }

    fn maybe_log(&mut self) {
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed < 1.0 {
            return;
        }
        let fps = self.count as f64 / elapsed;
        let drop_rate = if self.total_frames > 0 {
            self.dropped_frames as f64 / self.total_frames as f64 * 100.0
        } else {
            0.0
        };
        info!(
            "📺 解码统计: 解码{}帧 | 实际{:.1}fps | 总帧{} | 丢弃{} ({:.1}%)",
            self.count, fps, self.total_frames, self.dropped_frames, drop_rate
        );
        self.last = Instant::now();
        self.count = 0;
    }
}

/// 解码线程上下文
struct DecodeSession {
    decoder: Box<dyn FrameDecoder>,
    on_frame: Option<FrameCallback>,
    stats: DecodeStats,
    frame_number: u64,
}

impl DecodeSession {
    fn feed(&mut self, access_unit: &[u8]) {
        self.stats.total_frames += 1;
        match self.decoder.decode(access_unit) {
            Ok(Some(img)) => {
                self.stats.count += 1;
                self.frame_number += 1;
                if self.frame_number == 1 {
                    info!("🎬 首帧解码成功: {}x{}", img.width, img.height);
                }
                let frame = Frame {
                    width: img.width,
                    height: img.height,
                    stride: img.width * 4,
                    data: img.rgba_data,
                    frame_number: self.frame_number,
                    captured_at: Instant::now(),
                };
                if let Some(cb) = self.on_frame.as_mut() {
                    cb(frame);
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.stats.dropped_frames += 1;
                if self.stats.dropped_frames <= 10 {
                    warn!("⚠️ 丢弃帧 #{}: {}", self.stats.total_frames, e);
                } else {
                    debug!("丢弃帧 #{}: {}", self.stats.total_frames, e);
                }
            }
        }
        self.stats.maybe_log();
    }
}

fn decode_loop(
    mut sock: TcpStream,
    factory: DecoderFactory,
    on_frame: Option<FrameCallback>,
    running: Arc<AtomicBool>,
) -> StreamEnd {
    let decoder = match factory() {
        Ok(d) => d,
        Err(e) => {
            error!("❌ 解码器创建失败: {}", e);
            return StreamEnd::Error(e.to_string());
        }
    };
    info!("✅ 解码线程启动 ({})", decoder.name());

    let mut session = DecodeSession {
        decoder,
        on_frame,
        stats: DecodeStats::new(),
        frame_number: 0,
    };
    let mut parser = AnnexBParser::new();
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    let end = loop {
        if !running.load(Ordering::Acquire) {
            break StreamEnd::Stopped;
        }
        match sock.read(&mut buf) {
            Ok(0) => break StreamEnd::Eof,
            Ok(n) => {
                for au in parser.push(&buf[..n]) {
                    session.feed(&au);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => {
                if !running.load(Ordering::Acquire) {
                    break StreamEnd::Stopped;
                }
                break StreamEnd::Error(e.to_string());
            }
        }
    };

    if end == StreamEnd::Eof {
        for au in parser.flush() {
            session.feed(&au);
        }
    }
    info!(
        "✅ 解码线程退出: {:?} (共解码 {} 帧)",
        end, session.frame_number
    );
    end
}

/// 视频流客户端
pub struct StreamClient {
    tunnel: Box<dyn DeviceTunnel>,
    options: ConnectOptions,
    factory: DecoderFactory,
    on_frame: Option<FrameCallback>,
    on_end: Option<EndCallback>,
    running: Arc<AtomicBool>,
    socket: Option<TcpStream>, // 用于 stop() 时打断阻塞的 recv
    worker: Option<Worker>,
    tunnel_open: bool,
    info: Option<StreamInfo>,
}

impl StreamClient {
    pub fn new(tunnel: Box<dyn DeviceTunnel>, options: ConnectOptions) -> Self {
        Self {
            tunnel,
            options,
            factory: openh264_factory(),
            on_frame: None,
            on_end: None,
            running: Arc::new(AtomicBool::new(false)),
            socket: None,
            worker: None,
            tunnel_open: false,
            info: None,
        }
    }

    /// 替换解码器实现
    pub fn with_decoder(mut self, factory: DecoderFactory) -> Self {
        self.factory = factory;
        self
    }

    /// 注册帧回调 (每次 start 前设置)
    pub fn set_frame_callback<F>(&mut self, f: F)
    where
        F: FnMut(Frame) + Send + 'static,
    {
        self.on_frame = Some(Box::new(f));
    }

    /// 注册流结束回调
    pub fn set_end_callback<F>(&mut self, f: F)
    where
        F: FnOnce(StreamEnd) + Send + 'static,
    {
        self.on_end = Some(Box::new(f));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 最近一次握手得到的设备信息
    pub fn info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    pub fn start(&mut self) -> Result<StreamInfo, StreamError> {
        if self.worker.is_some() {
            return Err(StreamError::AlreadyRunning);
        }

        info!("🎬 连接设备 {}", self.tunnel.describe());
        let addr = self.tunnel.open()?;
        self.tunnel_open = true;

        let (sock, info) = match self.connect(addr) {
            Ok(v) => v,
            Err(e) => {
                self.release_tunnel();
                return Err(e);
            }
        };
        info!(
            "✅ 已连接 {} ({}x{})",
            info.device_name, info.width, info.height
        );

        let shutdown_handle = match sock.try_clone() {
            Ok(h) => h,
            Err(e) => {
                self.release_tunnel();
                return Err(StreamError::Io(e));
            }
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let factory = Arc::clone(&self.factory);
        let on_frame = self.on_frame.take();
        let on_end = self.on_end.take();

        let worker = Worker::spawn("scrcpy-decode", move || {
            let end = decode_loop(sock, factory, on_frame, Arc::clone(&running));
            running.store(false, Ordering::Release);
            if let Some(cb) = on_end {
                cb(end);
            }
        });
        match worker {
            Ok(w) => {
                self.worker = Some(w);
                self.socket = Some(shutdown_handle);
                self.info = Some(info.clone());
                Ok(info)
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.release_tunnel();
                Err(StreamError::Io(e))
            }
        }
    }

    fn connect(&self, addr: SocketAddr) -> Result<(TcpStream, StreamInfo), StreamError> {
        let mut sock = connect_with_retry(addr, &self.options)?;
        let _ = sock.set_nodelay(true);
        sock.set_read_timeout(Some(Duration::from_millis(
            self.options.handshake_timeout_ms.max(1),
        )))?;
        let info = read_handshake(&mut sock)?;
        sock.set_read_timeout(Some(Duration::from_millis(
            self.options.read_timeout_ms.max(1),
        )))?;
        Ok((sock, info))
    }

    fn release_tunnel(&mut self) {
        if std::mem::take(&mut self.tunnel_open) {
            self.tunnel.close();
        }
    }

    /// 停止解码 (幂等, 有界等待): socket → 解码线程 → 隧道
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(sock) = self.socket.take() {
            let _ = sock.shutdown(Shutdown::Both);
        }
        if let Some(mut worker) = self.worker.take() {
            if worker.join_timeout(STOP_JOIN_TIMEOUT) {
                info!("✅ 视频流已停止");
            }
        }
        self.release_tunnel();
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}
