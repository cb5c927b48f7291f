//! 帧分发中心 (CaptureHub)
//!
//! 解码线程每产出一帧, 就在同一线程上依次同步调用所有订阅者。
//! 单个订阅者返回错误或 panic 只记录日志, 不影响其它订阅者。
//! 只保留最新一帧, 不排队。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};

use crate::error::StreamError;
use crate::input::{StreamClient, StreamInfo};
use crate::types::Frame;

/// 订阅句柄 (用于取消订阅)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Subscriber = Box<dyn Fn(&Frame) -> anyhow::Result<()> + Send + Sync>;

struct Entry {
    id: SubscriberId,
    callback: Subscriber,
    failures: u64,
}

/// 分发计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub frames: u64,
    pub delivered: u64,
    pub failures: u64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct CaptureHub {
    subscribers: Mutex<Vec<Entry>>,
    latest: Mutex<Option<Frame>>,
    next_id: AtomicU64,
    frames: AtomicU64,
    delivered: AtomicU64,
    failures: AtomicU64,
}

impl CaptureHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 注册订阅者
    ///
    /// 回调在分发锁内执行, 不能在回调里再调用 subscribe/unsubscribe。
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&Frame) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push(Entry {
            id,
            callback: Box::new(callback),
            failures: 0,
        });
        debug!("订阅者 {:?} 已注册", id);
        id
    }

    /// 取消订阅, 返回是否存在
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = lock(&self.subscribers);
        let before = subs.len();
        subs.retain(|e| e.id != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// 最新一帧 (像素通过 Arc 共享)
    pub fn latest_frame(&self) -> Option<Frame> {
        lock(&self.latest).clone()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            frames: self.frames.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// 分发一帧给全部订阅者
    pub fn publish(&self, frame: Frame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        *lock(&self.latest) = Some(frame.clone());

        let mut subs = lock(&self.subscribers);
        for entry in subs.iter_mut() {
            let outcome = catch_unwind(AssertUnwindSafe(|| (entry.callback)(&frame)));
            match outcome {
                Ok(Ok(())) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Ok(Err(e)) => {
                    entry.failures += 1;
                    if entry.failures <= 3 {
                        warn!("⚠️ 订阅者 {:?} 处理帧 #{} 失败: {:#}", entry.id, frame.frame_number, e);
                    } else {
                        debug!("订阅者 {:?} 处理帧失败: {:#}", entry.id, e);
                    }
                }
                Err(_) => {
                    entry.failures += 1;
                    error!("❌ 订阅者 {:?} 在帧 #{} 上 panic", entry.id, frame.frame_number);
                }
            }
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 接入视频流并启动
    pub fn start(self: &Arc<Self>, client: &mut StreamClient) -> Result<StreamInfo, StreamError> {
        let hub = Arc::clone(self);
        client.set_frame_callback(move |frame| hub.publish(frame));
        let info = client.start()?;
        info!("✅ 采集已启动, {} 个订阅者", self.subscriber_count());
        Ok(info)
    }

    pub fn stop(&self, client: &mut StreamClient) {
        client.stop();
        let stats = self.stats();
        info!(
            "✅ 采集已停止: {} 帧, 投递 {}, 失败 {}",
            stats.frames, stats.delivered, stats.failures
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn frame(n: u64) -> Frame {
        Frame::from_rgba(2, 2, vec![0; 16], n)
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let hub = CaptureHub::new();
        let a = hub.subscribe(|_| Ok(()));
        let b = hub.subscribe(|_| Ok(()));
        assert_ne!(a, b);
        assert_eq!(hub.subscriber_count(), 2);
        assert!(hub.unsubscribe(a));
        assert!(!hub.unsubscribe(a));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_panicking_subscriber_isolated() {
        let hub = CaptureHub::new();
        let seen = Arc::new(AtomicUsize::new(0));
        hub.subscribe(|_| panic!("boom"));
        let counter = Arc::clone(&seen);
        hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        for n in 1..=3 {
            hub.publish(frame(n));
        }
        assert_eq!(seen.load(Ordering::Relaxed), 3);
        assert_eq!(
            hub.stats(),
            HubStats {
                frames: 3,
                delivered: 3,
                failures: 3
            }
        );
    }

    #[test]
    fn test_latest_frame_wins() {
        let hub = CaptureHub::new();
        assert!(hub.latest_frame().is_none());
        hub.publish(frame(1));
        hub.publish(frame(2));
        assert_eq!(hub.latest_frame().map(|f| f.frame_number), Some(2));
    }
}
