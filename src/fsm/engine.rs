//! 决策引擎 (DecisionEngine)
//! 职责: 最新帧 → 检测 → 规则/简单模式决策 → 动作 + 状态迁移
//!
//! `EngineCore::tick` 是纯步进函数 (时间由调用方注入), 便于确定性测试;
//! `DecisionEngine` 在独立线程上按固定频率驱动它, 截止时间式补偿漂移。

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::expr::Variables;
use crate::config::{ActionSpec, GameConfig, DEFAULT_SWIPE_MS};
use crate::detection::Detector;
use crate::types::{Action, ActionType, DetectionResult, Frame, Point};
use crate::utils::Worker;

const DEFAULT_LONG_PRESS_MS: i32 = 500;
const DEFAULT_TAP_TARGET: &str = "tap_zone";
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 每个 tick 的观察快照 (状态, 检测, 决策文本, 待执行动作)
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub tick: u64,
    pub state: String,
    pub detections: Vec<DetectionResult>,
    pub decision: String,
    pub action: Option<Action>,
    pub transition: Option<(String, String)>,
}

/// 外部变量提取器 (游戏相关的派生变量, 覆盖默认变量)
pub trait VariableExtractor: Send {
    fn extract(&self, frame: Option<&Frame>, detections: &[DetectionResult]) -> Variables;
}

/// 由本 tick 的检测结果构建默认变量表
///
/// 每个目标: `<name>_found`; 命中时另有 `_confidence`, `_x`, `_y`,
/// 有区域时另有 `_left`, `_top`, `_right`, `_bottom`, `_width`, `_height`。
pub fn detection_variables(detections: &[DetectionResult]) -> Variables {
    let mut vars = Variables::new();
    for d in detections {
        let n = &d.name;
        vars.insert(format!("{}_found", n), if d.found { 1.0 } else { 0.0 });
        if !d.found {
            continue;
        }
        vars.insert(format!("{}_confidence", n), d.confidence as f64);
        if let Some(p) = d.location {
            vars.insert(format!("{}_x", n), p.x as f64);
            vars.insert(format!("{}_y", n), p.y as f64);
        }
        if let Some(r) = d.region {
            vars.insert(format!("{}_left", n), r.x as f64);
            vars.insert(format!("{}_top", n), r.y as f64);
            vars.insert(format!("{}_right", n), r.right() as f64);
            vars.insert(format!("{}_bottom", n), r.bottom() as f64);
            vars.insert(format!("{}_width", n), r.width as f64);
            vars.insert(format!("{}_height", n), r.height as f64);
        }
    }
    vars
}

/// 状态机核心 (只在引擎线程上变更)
pub struct EngineCore {
    config: Arc<GameConfig>,
    detector: Box<dyn Detector>,
    extractor: Option<Box<dyn VariableExtractor>>,
    current: String,
    entered_at: Instant,
    ticks: u64,
    warned: HashSet<(String, String)>, // 已告警的 (状态, 条件)
}

impl EngineCore {
    pub fn new(config: Arc<GameConfig>, detector: Box<dyn Detector>) -> Self {
        let current = config.initial_state.clone();
        Self {
            config,
            detector,
            extractor: None,
            current,
            entered_at: Instant::now(),
            ticks: 0,
            warned: HashSet::new(),
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn VariableExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn current_state(&self) -> &str {
        &self.current
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// 重置进入当前状态的时间 (引擎启动时调用)
    pub fn reset_clock(&mut self, now: Instant) {
        self.entered_at = now;
    }

    /// 当前状态的轮询频率
    pub fn polling_hz(&self) -> u32 {
        self.config.polling_hz_for(&self.current).max(1)
    }

    /// 单步推进
    pub fn tick(&mut self, frame: Option<&Frame>, now: Instant) -> EngineSnapshot {
        self.ticks += 1;
        let config = Arc::clone(&self.config);
        let mut snap = EngineSnapshot {
            tick: self.ticks,
            state: self.current.clone(),
            detections: Vec::new(),
            decision: String::new(),
            action: None,
            transition: None,
        };

        let Some(state) = config.state(&self.current) else {
            snap.decision = format!("Unknown state: {}", self.current);
            return snap;
        };

        snap.detections = match frame {
            Some(f) => self.detector.detect(f, &state.detect),
            None => state
                .detect
                .iter()
                .map(|t| DetectionResult::not_found(t.as_str()))
                .collect(),
        };

        // 外部大脑给出的动作优先于本地规则
        if let Some(action) = self.detector.take_pending_action() {
            snap.decision = format!("Brain → {}", action.kind);
            snap.action = Some(action);
            return snap;
        }

        let elapsed_ms = now.saturating_duration_since(self.entered_at).as_millis() as u64;
        let mut handled = false;

        if state.uses_rules() {
            let mut vars = detection_variables(&snap.detections);
            vars.insert("elapsed_ms".into(), elapsed_ms as f64);
            vars.insert("screen_width".into(), config.screen_width as f64);
            vars.insert("screen_height".into(), config.screen_height as f64);
            if let Some(ex) = &self.extractor {
                vars.extend(ex.extract(frame, &snap.detections));
            }

            for rule in &state.rules {
                match rule.condition.is_true(&vars) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        let key = (state.name.clone(), rule.condition.source().to_string());
                        if self.warned.insert(key) {
                            warn!("⚠️ 条件求值失败 [{}] '{}': {}", state.name, rule.condition.source(), e);
                        } else {
                            debug!("条件求值失败 '{}': {}", rule.condition.source(), e);
                        }
                        continue;
                    }
                }

                handled = true;
                snap.decision = match rule.spec.action {
                    ActionType::Wait => format!("Waiting: {}", rule.condition.source()),
                    kind => format!("{} → {}", rule.condition.source(), kind),
                };
                let first_found = snap.detections.iter().find(|d| d.found);
                snap.action = self.resolve_action(&rule.spec, first_found, Some(DEFAULT_TAP_TARGET));
                if let Some(next) = &rule.spec.next_state {
                    snap.transition = self.transition(next, now);
                }
                break;
            }
        } else if let Some(found) = snap.detections.iter().find(|d| d.found) {
            handled = true;
            snap.decision = format!("Found: {} → {}", found.name, state.on_found.action);
            snap.action = self.resolve_action(&state.on_found, Some(found), None);
            if let Some(next) = &state.on_found.next_state {
                snap.transition = self.transition(next, now);
            }
        } else {
            snap.decision = format!("Searching: {}", state.detect.join(", "));
        }

        if !handled && state.timeout_ms > 0 && elapsed_ms >= state.timeout_ms {
            match &state.on_timeout {
                Some(next) => {
                    snap.decision = format!("Timeout → {}", next);
                    snap.transition = self.transition(next, now);
                }
                None => snap.decision = "Timeout".to_string(),
            }
        }

        snap
    }

    fn transition(&mut self, to: &str, now: Instant) -> Option<(String, String)> {
        let from = std::mem::replace(&mut self.current, to.to_string());
        self.entered_at = now;
        info!("🔀 状态迁移: {} → {}", from, to);
        Some((from, to.to_string()))
    }

    /// 点击坐标解析: 命名目标 > 检测位置 > 检测区域中心 > 屏幕中心
    fn resolve_point(
        &self,
        named: Option<&str>,
        detection: Option<&DetectionResult>,
    ) -> Point {
        if let Some(name) = named {
            if let Some(t) = self.config.targets.get(name) {
                return t.point();
            }
            if let Some(r) = self.config.regions.get(name) {
                return r.rect.center();
            }
        }
        if let Some(d) = detection {
            if let Some(p) = d.location {
                return p;
            }
            if let Some(r) = d.region {
                return r.center();
            }
        }
        self.config.screen_center()
    }

    fn resolve_action(
        &self,
        spec: &ActionSpec,
        detection: Option<&DetectionResult>,
        default_target: Option<&str>,
    ) -> Option<Action> {
        let named = spec.target.as_deref().or(default_target);
        match spec.action {
            ActionType::None | ActionType::Wait => None,
            ActionType::Tap => Some(Action::tap(self.resolve_point(named, detection))),
            ActionType::LongPress => Some(Action::long_press(
                self.resolve_point(named, detection),
                spec.duration_ms.unwrap_or(DEFAULT_LONG_PRESS_MS),
            )),
            kind @ (ActionType::Swipe | ActionType::Drag) => {
                let start = self.resolve_point(named, detection);
                let end = match spec.end_target.as_deref() {
                    Some(end) => self.resolve_point(Some(end), None),
                    None => start,
                };
                Some(Action::swipe(
                    kind,
                    start,
                    end,
                    spec.duration_ms.unwrap_or(DEFAULT_SWIPE_MS),
                ))
            }
        }
    }
}

// ========== 线程驱动 ==========

type ActionCallback = Box<dyn Fn(&Action) + Send>;
type StateCallback = Box<dyn Fn(&EngineSnapshot) + Send>;

struct Shared {
    latest: Mutex<Option<Frame>>,
    state: Mutex<String>,
    running: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 决策引擎线程
pub struct DecisionEngine {
    shared: Arc<Shared>,
    core: Option<EngineCore>,
    on_action: Option<ActionCallback>,
    on_state: Option<StateCallback>,
    stop_tx: Option<Sender<()>>,
    worker: Option<Worker>,
}

impl DecisionEngine {
    pub fn new(core: EngineCore) -> Self {
        let state = core.current_state().to_string();
        Self {
            shared: Arc::new(Shared {
                latest: Mutex::new(None),
                state: Mutex::new(state),
                running: AtomicBool::new(false),
            }),
            core: Some(core),
            on_action: None,
            on_state: None,
            stop_tx: None,
            worker: None,
        }
    }

    /// 动作回调 (在引擎线程上调用, 必须快速返回)
    pub fn set_action_callback<F>(&mut self, f: F)
    where
        F: Fn(&Action) + Send + 'static,
    {
        self.on_action = Some(Box::new(f));
    }

    /// 观察者回调 (每个 tick 一次)
    pub fn set_state_callback<F>(&mut self, f: F)
    where
        F: Fn(&EngineSnapshot) + Send + 'static,
    {
        self.on_state = Some(Box::new(f));
    }

    /// 替换最新帧 (整体交换, 不原地修改)
    pub fn update_frame(&self, frame: Frame) {
        *lock(&self.shared.latest) = Some(frame);
    }

    /// 返回一个可跨线程投递帧的句柄
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn current_state(&self) -> String {
        lock(&self.shared.state).clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn start(&mut self) -> io::Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let Some(mut core) = self.core.take() else {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "decision engine cannot be restarted",
            ));
        };
        let on_action = self.on_action.take();
        let on_state = self.on_state.take();
        let shared = Arc::clone(&self.shared);
        let (stop_tx, stop_rx) = bounded(1);

        shared.running.store(true, Ordering::Release);
        core.reset_clock(Instant::now());
        info!("🧠 决策引擎启动, 初始状态: {}", core.current_state());

        let worker = Worker::spawn("fsm-engine", move || {
            run_loop(core, shared, stop_rx, on_action, on_state);
        });
        match worker {
            Ok(w) => {
                self.worker = Some(w);
                self.stop_tx = Some(stop_tx);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                error!("❌ 决策引擎线程创建失败: {}", e);
                Err(e)
            }
        }
    }

    /// 停止引擎 (幂等, 有界等待)
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(mut worker) = self.worker.take() {
            if worker.join_timeout(STOP_JOIN_TIMEOUT) {
                info!("✅ 决策引擎已停止");
            }
        }
    }
}

impl Drop for DecisionEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 帧投递句柄 (给采集订阅者使用)
#[derive(Clone)]
pub struct FrameSink {
    shared: Arc<Shared>,
}

impl FrameSink {
    pub fn update_frame(&self, frame: Frame) {
        *lock(&self.shared.latest) = Some(frame);
    }
}

fn run_loop(
    mut core: EngineCore,
    shared: Arc<Shared>,
    stop_rx: Receiver<()>,
    on_action: Option<ActionCallback>,
    on_state: Option<StateCallback>,
) {
    let mut deadline = Instant::now();
    let mut stats_at = Instant::now();
    let mut stats_ticks = 0u64;

    while shared.running.load(Ordering::Acquire) {
        let frame = lock(&shared.latest).clone();
        let snap = core.tick(frame.as_ref(), Instant::now());
        *lock(&shared.state) = core.current_state().to_string();

        if let (Some(cb), Some(action)) = (&on_action, &snap.action) {
            cb(action);
        }
        if let Some(cb) = &on_state {
            cb(&snap);
        }

        stats_ticks += 1;
        if stats_at.elapsed() >= Duration::from_secs(5) {
            let hz = stats_ticks as f64 / stats_at.elapsed().as_secs_f64();
            debug!("🧠 引擎: {:.1} tick/s, 状态 {}", hz, core.current_state());
            stats_at = Instant::now();
            stats_ticks = 0;
        }

        // 截止时间式调度: 扣除本次处理耗时, 落后超过一个周期则重新对齐
        let period = Duration::from_secs_f64(1.0 / core.polling_hz() as f64);
        deadline += period;
        let now = Instant::now();
        if deadline <= now {
            deadline = now;
            continue;
        }
        match stop_rx.recv_timeout(deadline - now) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("🧠 决策引擎线程退出 (共 {} tick)", core.ticks);
}
