//! 工作线程句柄 (有界 join)
//!
//! 线程退出 (包括 panic) 时通过 crossbeam 通道发出完成信号,
//! `stop` 方只等待有限时间, 超时后放弃 join 并记录警告。

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

/// 退出守卫: drop 时发送完成信号
struct DoneGuard(Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

pub struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
    done: Receiver<()>,
}

impl Worker {
    /// 启动具名工作线程
    pub fn spawn<F>(name: &str, f: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _guard = DoneGuard(tx);
            f();
        })?;
        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
            done: rx,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// 有界等待线程退出; 返回 true 表示已 join, false 表示超时 (线程被分离)
    ///
    /// 重复调用安全: 已 join 或已分离后直接返回 true。
    pub fn join_timeout(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("⚠️ 线程 {} 以 panic 退出", self.name);
                } else {
                    debug!("线程 {} 已退出", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "⚠️ 线程 {} 未在 {:?} 内退出, 放弃等待",
                    self.name, timeout
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_join_finished_worker() {
        let mut w = Worker::spawn("quick", || {}).unwrap();
        assert!(w.join_timeout(Duration::from_secs(1)));
        // 重复调用安全
        assert!(w.join_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_join_is_bounded_for_stuck_worker() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let mut w = Worker::spawn("stuck", move || {
            while !flag.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
            }
        })
        .unwrap();

        let t0 = Instant::now();
        assert!(!w.join_timeout(Duration::from_millis(50)));
        assert!(t0.elapsed() < Duration::from_secs(1));
        release.store(true, Ordering::Relaxed);
    }

    #[test]
    fn test_panicking_worker_still_signals() {
        let mut w = Worker::spawn("boom", || panic!("boom")).unwrap();
        assert!(w.join_timeout(Duration::from_secs(1)));
    }
}
