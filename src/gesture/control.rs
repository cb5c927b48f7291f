use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::ControlError;

const MAX_HISTORY: usize = 1024;

/// 设备输入通道 (与视频通道相互独立)
pub trait DeviceControl: Send {
    fn tap(&mut self, x: i32, y: i32) -> Result<(), ControlError>;

    fn swipe(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32)
        -> Result<(), ControlError>;
}

/// 通过 `adb shell input` 发送触控命令
#[derive(Debug, Clone)]
pub struct AdbControl {
    adb: PathBuf,
    serial: Option<String>,
}

impl AdbControl {
    pub fn new(adb: impl Into<PathBuf>, serial: Option<String>) -> Self {
        Self {
            adb: adb.into(),
            serial,
        }
    }

    fn input(&self, args: &[String]) -> Result<(), ControlError> {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(["shell", "input"]).args(args);
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(ControlError::Command {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl DeviceControl for AdbControl {
    fn tap(&mut self, x: i32, y: i32) -> Result<(), ControlError> {
        self.input(&["tap".into(), x.to_string(), y.to_string()])
    }

    fn swipe(
        &mut self,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u32,
    ) -> Result<(), ControlError> {
        self.input(&[
            "swipe".into(),
            x1.to_string(),
            y1.to_string(),
            x2.to_string(),
            y2.to_string(),
            duration_ms.to_string(),
        ])
    }
}

/// 已发出的输入命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCommand {
    Tap { x: i32, y: i32 },
    Swipe { x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32 },
}

/// 只记录不执行 (演练模式与测试), 最多保留最近 1024 条
#[derive(Debug, Clone, Default)]
pub struct RecordingControl {
    log: Arc<Mutex<Vec<InputCommand>>>,
}

impl RecordingControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出并清空已记录的命令
    pub fn drain(&self) -> Vec<InputCommand> {
        match self.log.lock() {
            Ok(mut log) => std::mem::take(&mut *log),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn push(&self, cmd: InputCommand) {
        debug!("🖐 {:?}", cmd);
        let mut log = match self.log.lock() {
            Ok(log) => log,
            Err(poisoned) => poisoned.into_inner(),
        };
        if log.len() >= MAX_HISTORY {
            log.remove(0);
        }
        log.push(cmd);
    }
}

impl DeviceControl for RecordingControl {
    fn tap(&mut self, x: i32, y: i32) -> Result<(), ControlError> {
        self.push(InputCommand::Tap { x, y });
        Ok(())
    }

    fn swipe(
        &mut self,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u32,
    ) -> Result<(), ControlError> {
        self.push(InputCommand::Swipe {
            x1,
            y1,
            x2,
            y2,
            duration_ms,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_control_shares_log() {
        let rec = RecordingControl::new();
        let mut handle = rec.clone();
        handle.tap(1, 2).unwrap();
        handle.swipe(0, 0, 5, 5, 100).unwrap();
        let cmds = rec.drain();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0], InputCommand::Tap { x: 1, y: 2 });
        assert!(rec.drain().is_empty());
    }

    #[test]
    fn test_adb_missing_binary_is_spawn_error() {
        let mut adb = AdbControl::new("/nonexistent/adb-binary", Some("emulator-5554".into()));
        assert!(matches!(adb.tap(1, 1), Err(ControlError::Spawn(_))));
    }
}
