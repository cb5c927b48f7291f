//! 共享内存桥端到端: 引擎一侧写帧, 模拟的大脑进程回填结果与动作

use std::sync::Arc;
use std::time::Instant;

use rashplayer::bridge::{ResultRecord, SharedBridge};
use rashplayer::fsm::EngineCore;
use rashplayer::{Action, ActionType, BrainState, BridgeDetector, Frame, GameConfig, Point, Rect};

const GAME: &str = r#"{
    "initial_state": "menu",
    "triggers": {"play_button": 7, "bird": 9},
    "states": {
        "menu": {
            "detect": ["play_button"],
            "on_found": {"action": "TAP", "next_state": "game"}
        },
        "game": {"detect": ["bird"]}
    }
}"#;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn frame(n: u64) -> Frame {
    Frame::from_rgba(8, 8, vec![200; 8 * 8 * 4], n)
}

fn found(trigger_id: u32, x: i32, y: i32) -> ResultRecord {
    ResultRecord {
        trigger_id,
        found: true,
        confidence: 0.93,
        location: Point::new(x, y),
        bbox: Rect::new(x - 5, y - 5, 10, 10),
        timestamp_ns: 1,
    }
}

#[test]
fn test_brain_results_drive_transition() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let owner = SharedBridge::create(dir.path(), "pipeline_shm", 16, 16).unwrap();
    let mut brain = SharedBridge::attach(dir.path(), "pipeline_shm").unwrap();
    assert_eq!((brain.width(), brain.height()), (16, 16));

    let game = Arc::new(GameConfig::from_json_str(GAME).unwrap());
    let detector = BridgeDetector::new(owner, &game.triggers);
    let mut core = EngineCore::new(Arc::clone(&game), Box::new(detector));

    // 大脑尚未回应: 目标未找到, 停留在 menu
    let now = Instant::now();
    let snap = core.tick(Some(&frame(1)), now);
    assert_eq!(snap.action, None);
    assert_eq!(core.current_state(), "menu");

    let published = brain.take_frame().expect("frame published by engine");
    assert_eq!(published.frame_number, 1);
    assert_eq!((published.width, published.height), (16, 16));
    assert!(brain.take_frame().is_none());

    brain.publish_results(&[found(7, 120, 340)], None, BrainState::Detecting, 1_000, 2_000);
    let snap = core.tick(Some(&frame(1)), now);
    assert_eq!(snap.action, Some(Action::tap(Point::new(120, 340))));
    assert_eq!(snap.transition, Some(("menu".into(), "game".into())));
    assert_eq!(core.current_state(), "game");
    assert!(!brain.result_ready());
    assert_eq!(brain.get_latency().vision_us, 1);
    assert_eq!(brain.get_latency().brain_us, 2);
}

#[test]
fn test_brain_action_takes_precedence() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let owner = SharedBridge::create(dir.path(), "brain_shm", 16, 16).unwrap();
    let mut brain = SharedBridge::attach(dir.path(), "brain_shm").unwrap();

    let game = Arc::new(GameConfig::from_json_str(GAME).unwrap());
    let mut core = EngineCore::new(Arc::clone(&game), Box::new(BridgeDetector::new(owner, &game.triggers)));

    let now = Instant::now();
    core.tick(Some(&frame(1)), now);
    let action = Action::swipe(ActionType::Swipe, Point::new(10, 10), Point::new(10, 300), 250);
    brain.publish_results(
        &[found(7, 50, 50)],
        Some(&action),
        BrainState::ActionPending,
        0,
        0,
    );

    let snap = core.tick(Some(&frame(2)), now);
    assert_eq!(snap.action, Some(action));
    assert_eq!(snap.decision, "Brain → SWIPE");
    assert_eq!(snap.transition, None);
    assert_eq!(core.current_state(), "menu");
    assert_eq!(brain.get_state(), BrainState::ActionPending);

    // 结果保持到大脑下一次更新: 下一个 tick 走简单模式
    let snap = core.tick(Some(&frame(3)), now);
    assert_eq!(snap.action, Some(Action::tap(Point::new(50, 50))));
    assert_eq!(core.current_state(), "game");
}

#[test]
fn test_attach_missing_segment_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(SharedBridge::attach(dir.path(), "absent_shm").is_err());
}
