//! 运行参数 - 通过JSON文件调整

use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::bridge::{DEFAULT_NAME, MAX_FRAME_HEIGHT, MAX_FRAME_WIDTH};
use crate::detection::MATCH_THRESHOLD;
use crate::gesture::GestureConfig;
use crate::input::{ConnectOptions, ScrcpyOptions};

/// 视频流参数
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub scrcpy: ScrcpyOptions,
    pub connect: ConnectOptions,
    pub direct_addr: Option<String>, // 设置后跳过 adb, 直接连接该地址
}

/// 共享内存桥参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub enabled: bool,
    pub name: String,
    pub dir: Option<PathBuf>, // 默认 /dev/shm
    pub width: u32,           // 帧区容量
    pub height: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            name: DEFAULT_NAME.to_string(),
            dir: None,
            width: MAX_FRAME_WIDTH,
            height: MAX_FRAME_HEIGHT,
        }
    }
}

/// 检测方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorMode {
    /// 本地模板/颜色/区域检测
    #[default]
    Local,
    /// 交给共享内存另一端的外部进程
    Bridge,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub detector: DetectorMode,
    pub template_threshold: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            detector: DetectorMode::Local,
            template_threshold: MATCH_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureSettings {
    #[serde(flatten)]
    pub humanize: GestureConfig,
    pub seed: Option<u64>, // 固定随机种子 (复现)
    pub dry_run: bool,     // 只记录不发送
}

/// 运行参数
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub stream: StreamSettings,
    pub bridge: BridgeSettings,
    pub engine: EngineSettings,
    pub gesture: GestureSettings,
}

impl RuntimeSettings {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(settings) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    settings
                }
                Err(e) => {
                    warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let settings = Self::default();
                settings.save(path);
                settings
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    error!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => error!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️ 当前运行参数:");
        match &self.stream.direct_addr {
            Some(addr) => info!("  视频源: 直连 {}", addr),
            None => info!(
                "  视频源: adb {} (端口 {}, {}fps, {}bps)",
                if self.stream.scrcpy.serial.is_empty() {
                    "<默认设备>"
                } else {
                    self.stream.scrcpy.serial.as_str()
                },
                self.stream.scrcpy.local_port,
                self.stream.scrcpy.max_fps,
                self.stream.scrcpy.bit_rate
            ),
        }
        if self.bridge.enabled {
            info!(
                "  共享内存: {} ({}x{})",
                self.bridge.name, self.bridge.width, self.bridge.height
            );
        } else {
            info!("  共享内存: 关闭");
        }
        info!(
            "  检测方式: {:?} (模板阈值 {:.2})",
            self.engine.detector, self.engine.template_threshold
        );
        info!(
            "  手势: 偏移σ {:.0}-{:.0}px, 间隔 {}-{}ms{}",
            self.gesture.humanize.click_offset_min,
            self.gesture.humanize.click_offset_max,
            self.gesture.humanize.gap_min_ms,
            self.gesture.humanize.gap_max_ms,
            if self.gesture.dry_run { " (演练)" } else { "" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = RuntimeSettings::load(&path);
        assert_eq!(settings, RuntimeSettings::default());
        assert!(path.exists());
        assert_eq!(RuntimeSettings::load(&path), settings);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"engine": {"detector": "bridge"}, "gesture": {"gap_min_ms": 0, "seed": 7}}"#,
        )
        .unwrap();
        let s = RuntimeSettings::load(&path);
        assert_eq!(s.engine.detector, DetectorMode::Bridge);
        assert_eq!(s.engine.template_threshold, MATCH_THRESHOLD);
        assert_eq!(s.gesture.humanize.gap_min_ms, 0);
        assert_eq!(s.gesture.humanize.gap_max_ms, 50);
        assert_eq!(s.gesture.seed, Some(7));
        assert_eq!(s.stream.scrcpy.local_port, 27183);
        assert_eq!(s.bridge.name, "rashplayer_shm");
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(RuntimeSettings::load(&path), RuntimeSettings::default());
    }
}
