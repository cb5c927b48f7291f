//! 检测器 (Detector)
//! 职责: 给定帧与目标名列表 → 每个目标一条 DetectionResult
//!
//! - LocalDetector:  本进程内模板/颜色/区域检测
//! - BridgeDetector: 帧写入共享内存, 结果由外部大脑进程回填

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use super::color::detect_color;
use super::template::MATCH_THRESHOLD;
use crate::bridge::{ResultRecord, SharedBridge};
use crate::config::GameConfig;
use crate::types::{Action, DetectionResult, Frame};

/// 检测能力 (引擎只依赖该接口)
pub trait Detector: Send {
    /// 对每个目标返回一条结果, 顺序与 `targets` 一致
    fn detect(&mut self, frame: &Frame, targets: &[String]) -> Vec<DetectionResult>;

    /// 取走外部大脑给出的待执行动作 (本地检测器永远没有)
    fn take_pending_action(&mut self) -> Option<Action> {
        None
    }

    fn kind(&self) -> &'static str;
}

/// 本地检测: 模板 > 颜色 > 静态区域 > 未找到
pub struct LocalDetector {
    config: Arc<GameConfig>,
    threshold: f32,
}

impl LocalDetector {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self {
            config,
            threshold: MATCH_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    fn detect_one(&self, frame: &Frame, target: &str) -> DetectionResult {
        if let Some(template) = self.config.templates.get(target) {
            return template.detect(frame, self.config.search_region(target), self.threshold);
        }
        if let Some(range) = self.config.colors.get(target) {
            return detect_color(target, frame, range);
        }
        if let Some(region) = self.config.regions.get(target) {
            // 静态区域: 恒为找到, 位置取区域中心
            return DetectionResult::hit(target, 1.0, region.rect.center(), region.rect);
        }
        debug!("{}: 无模板/颜色/区域定义", target);
        DetectionResult::not_found(target)
    }
}

impl Detector for LocalDetector {
    fn detect(&mut self, frame: &Frame, targets: &[String]) -> Vec<DetectionResult> {
        targets.iter().map(|t| self.detect_one(frame, t)).collect()
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

/// 委托外部大脑: 每个新帧写入共享内存, 非阻塞轮询结果
///
/// 大脑更新前保留上一次结果 (last-known), 保证 tick 间结果连续。
pub struct BridgeDetector {
    bridge: SharedBridge,
    names: HashMap<u32, String>, // trigger_id → 目标名
    last: HashMap<String, DetectionResult>,
    pending: Option<Action>,
    last_published: Option<u64>,
    publish_errors: u64,
}

impl BridgeDetector {
    pub fn new(bridge: SharedBridge, triggers: &HashMap<String, u32>) -> Self {
        Self {
            bridge,
            names: triggers.iter().map(|(n, id)| (*id, n.clone())).collect(),
            last: HashMap::new(),
            pending: None,
            last_published: None,
            publish_errors: 0,
        }
    }

    pub fn bridge(&self) -> &SharedBridge {
        &self.bridge
    }

    fn absorb(&mut self, rec: &ResultRecord) {
        let Some(name) = self.names.get(&rec.trigger_id) else {
            debug!("未映射的 trigger_id {}", rec.trigger_id);
            return;
        };
        let result = if rec.found {
            DetectionResult::hit(name.as_str(), rec.confidence, rec.location, rec.bbox)
        } else {
            DetectionResult::not_found(name.as_str())
        };
        self.last.insert(name.clone(), result);
    }
}

impl Detector for BridgeDetector {
    fn detect(&mut self, frame: &Frame, targets: &[String]) -> Vec<DetectionResult> {
        if self.last_published != Some(frame.frame_number) {
            match self.bridge.write_frame(frame) {
                Ok(_) => self.last_published = Some(frame.frame_number),
                Err(e) => {
                    self.publish_errors += 1;
                    if self.publish_errors <= 10 {
                        warn!("⚠️ 帧写入共享内存失败: {}", e);
                    }
                }
            }
        }

        if let Some(update) = self.bridge.read_results() {
            for rec in &update.results {
                self.absorb(rec);
            }
            if update.action.is_some() {
                self.pending = update.action;
            }
        }

        targets
            .iter()
            .map(|t| {
                self.last
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| DetectionResult::not_found(t.as_str()))
            })
            .collect()
    }

    fn take_pending_action(&mut self) -> Option<Action> {
        self.pending.take()
    }

    fn kind(&self) -> &'static str {
        "bridge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BrainState, Point, Rect};

    const CONFIG: &str = r#"{
        "initial_state": "menu",
        "states": {"menu": {}},
        "regions": {"button": {"x": 100, "y": 200, "width": 50, "height": 20}},
        "colors": {"red": {"hsv_low": [0, 150, 150], "hsv_high": [10, 255, 255]}},
        "triggers": {"button": 1, "red": 2}
    }"#;

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_local_precedence_and_unknown() {
        let cfg = Arc::new(GameConfig::from_json_str(CONFIG).unwrap());
        let mut det = LocalDetector::new(cfg);
        let frame = Frame::from_rgba(64, 64, vec![0; 64 * 64 * 4], 1);
        let out = det.detect(&frame, &targets(&["button", "red", "ghost"]));
        assert_eq!(out.len(), 3);
        assert!(out[0].found);
        assert_eq!(out[0].confidence, 1.0);
        assert_eq!(out[0].location, Some(Point::new(125, 210)));
        assert!(!out[1].found);
        assert_eq!(out[2], DetectionResult::not_found("ghost"));
        assert!(det.take_pending_action().is_none());
    }

    #[test]
    fn test_bridge_detector_keeps_last_known() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GameConfig::from_json_str(CONFIG).unwrap();
        let host = SharedBridge::create(dir.path(), "det", 8, 8).unwrap();
        let mut brain = SharedBridge::attach(dir.path(), "det").unwrap();
        let mut det = BridgeDetector::new(host, &cfg.triggers);

        let frame = Frame::from_rgba(8, 8, vec![7; 256], 1);
        let names = targets(&["button", "red"]);
        assert!(det.detect(&frame, &names).iter().all(|r| !r.found));
        assert_eq!(brain.take_frame().unwrap().frame_number, 1);

        let rec = ResultRecord {
            trigger_id: 1,
            found: true,
            confidence: 0.8,
            location: Point::new(3, 4),
            bbox: Rect::new(1, 2, 4, 4),
            timestamp_ns: 0,
        };
        let unknown = ResultRecord {
            trigger_id: 99,
            ..rec
        };
        let action = Action::tap(Point::new(3, 4));
        brain.publish_results(&[rec, unknown], Some(&action), BrainState::ActionPending, 0, 0);

        let out = det.detect(&frame, &names);
        assert!(out[0].found);
        assert_eq!(out[0].location, Some(Point::new(3, 4)));
        assert!(!out[1].found);
        assert_eq!(det.take_pending_action(), Some(action));
        assert_eq!(det.take_pending_action(), None);

        // 同一帧不重复发布; 大脑未更新时保留上次结果
        let again = det.detect(&frame, &names);
        assert!(again[0].found);
        assert!(brain.take_frame().is_none());
    }
}
