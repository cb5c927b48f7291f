//! 设备隧道 (Device tunnel)
//!
//! 负责把设备上的视频 socket 暴露为本地 TCP 地址:
//! - AdbTunnel: 推送并启动 scrcpy-server, 再做 adb 端口转发
//! - DirectTunnel: 已转发好的端口 (模拟器/测试)

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

const DEVICE_SERVER_PATH: &str = "/data/local/tmp/scrcpy-server.jar";
const SERVER_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// 设备隧道接口
pub trait DeviceTunnel: Send {
    /// 准备设备端并返回可连接的本地地址
    fn open(&mut self) -> Result<SocketAddr, StreamError>;

    /// 按获取的逆序释放资源 (幂等)
    fn close(&mut self);

    fn describe(&self) -> String;
}

/// scrcpy-server 启动参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrcpyOptions {
    pub adb_path: PathBuf,
    pub serial: String,
    pub server_jar: PathBuf,
    pub server_version: String,
    pub local_port: u16,
    pub max_size: u32,
    pub max_fps: u32,
    pub bit_rate: u32,
    pub warmup_ms: u64, // 启动后等待 server 就绪
}

impl Default for ScrcpyOptions {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            serial: String::new(),
            server_jar: PathBuf::from("scrcpy-server"),
            server_version: "3.3.4".to_string(),
            local_port: 27183,
            max_size: 1920,
            max_fps: 60,
            bit_rate: 4_000_000,
            warmup_ms: 1000,
        }
    }
}

impl ScrcpyOptions {
    /// app_process 启动参数 (仅视频, H.264, 正向隧道)
    pub fn server_args(&self) -> Vec<String> {
        vec![
            format!("CLASSPATH={}", DEVICE_SERVER_PATH),
            "app_process".into(),
            "/".into(),
            "com.genymobile.scrcpy.Server".into(),
            self.server_version.clone(),
            "log_level=info".into(),
            "video_codec=h264".into(),
            format!("max_size={}", self.max_size),
            format!("max_fps={}", self.max_fps),
            format!("video_bit_rate={}", self.bit_rate),
            "tunnel_forward=true".into(),
            "control=false".into(),
            "audio=false".into(),
            "cleanup=true".into(),
        ]
    }
}

/// 通过 adb 部署 scrcpy-server 并转发端口
pub struct AdbTunnel {
    options: ScrcpyOptions,
    server: Option<Child>,
    forwarded: bool,
}

impl AdbTunnel {
    pub fn new(options: ScrcpyOptions) -> Self {
        Self {
            options,
            server: None,
            forwarded: false,
        }
    }

    fn adb(&self) -> Command {
        let mut cmd = Command::new(&self.options.adb_path);
        if !self.options.serial.is_empty() {
            cmd.arg("-s").arg(&self.options.serial);
        }
        cmd
    }

    fn run(&self, step: &'static str, args: &[&str]) -> Result<(), StreamError> {
        let output = self
            .adb()
            .args(args)
            .output()
            .map_err(|e| StreamError::Setup {
                step,
                reason: e.to_string(),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(StreamError::Setup {
                step,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn forward_spec(&self) -> String {
        format!("tcp:{}", self.options.local_port)
    }

    fn push_server(&self) -> Result<(), StreamError> {
        let jar = self.options.server_jar.to_string_lossy().into_owned();
        self.run("push", &["push", &jar, DEVICE_SERVER_PATH])
    }

    fn launch_server(&mut self) -> Result<(), StreamError> {
        let mut child = self
            .adb()
            .arg("shell")
            .args(self.options.server_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| StreamError::Setup {
                step: "launch",
                reason: e.to_string(),
            })?;

        thread::sleep(Duration::from_millis(self.options.warmup_ms));
        if let Ok(Some(status)) = child.try_wait() {
            return Err(StreamError::Setup {
                step: "launch",
                reason: format!("server exited early with {}", status),
            });
        }
        self.server = Some(child);
        Ok(())
    }

    fn setup_forward(&mut self) -> Result<(), StreamError> {
        let spec = self.forward_spec();
        // 清理上次遗留的转发, 失败无妨
        let _ = self.run("forward", &["forward", "--remove", &spec]);
        self.run("forward", &["forward", &spec, "localabstract:scrcpy"])?;
        self.forwarded = true;
        Ok(())
    }

    fn stop_server(&mut self) {
        let Some(mut child) = self.server.take() else {
            return;
        };
        let _ = child.kill();
        let deadline = Instant::now() + SERVER_KILL_TIMEOUT;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                _ => {
                    warn!("⚠️ scrcpy-server 未在 {:?} 内退出", SERVER_KILL_TIMEOUT);
                    break;
                }
            }
        }
    }

    fn remove_forward(&mut self) {
        if std::mem::take(&mut self.forwarded) {
            let spec = self.forward_spec();
            if let Err(e) = self.run("forward", &["forward", "--remove", &spec]) {
                warn!("⚠️ 移除端口转发失败: {}", e);
            }
        }
    }
}

impl DeviceTunnel for AdbTunnel {
    fn open(&mut self) -> Result<SocketAddr, StreamError> {
        info!("📲 推送 scrcpy-server 到 {}", self.describe());
        self.push_server()?;

        info!("🚀 启动 scrcpy-server {}", self.options.server_version);
        self.launch_server()?;

        if let Err(e) = self.setup_forward() {
            self.close();
            return Err(e);
        }
        Ok(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::LOCALHOST,
            self.options.local_port,
        )))
    }

    /// 获取顺序为 启动服务 → 端口转发, 释放时先移除转发再结束服务
    fn close(&mut self) {
        self.remove_forward();
        self.stop_server();
    }

    fn describe(&self) -> String {
        if self.options.serial.is_empty() {
            "adb:<default>".to_string()
        } else {
            format!("adb:{}", self.options.serial)
        }
    }
}

impl Drop for AdbTunnel {
    fn drop(&mut self) {
        self.close();
    }
}

/// 已可直接连接的地址
#[derive(Debug, Clone)]
pub struct DirectTunnel {
    addr: SocketAddr,
}

impl DirectTunnel {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl DeviceTunnel for DirectTunnel {
    fn open(&mut self) -> Result<SocketAddr, StreamError> {
        Ok(self.addr)
    }

    fn close(&mut self) {}

    fn describe(&self) -> String {
        format!("tcp:{}", self.addr)
    }
}
