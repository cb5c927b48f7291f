use clap::Parser;
/// RashPlayer 游戏自动化主程序
///
/// 线程划分: 解码线程 (视频流 + 帧分发) → 决策线程 (检测 + 状态机) → 手势线程
///
/// 直接运行: cargo run --release --bin rashplayer -- -g games/flappy_bird
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use log::{debug, info, warn};
use mimalloc::MiMalloc;

use rashplayer::bridge::{default_shm_dir, SharedBridge};
use rashplayer::detection::{BridgeDetector, Detector, LocalDetector};
use rashplayer::fsm::{DecisionEngine, EngineCore};
use rashplayer::gesture::{AdbControl, DeviceControl, GestureExecutor, RecordingControl};
use rashplayer::input::{AdbTunnel, DeviceTunnel, DirectTunnel, StreamClient};
use rashplayer::settings::{DetectorMode, RuntimeSettings};
use rashplayer::types::Action;
use rashplayer::utils::Worker;
use rashplayer::{CaptureHub, GameConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const ACTION_QUEUE: usize = 4;
const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// RashPlayer 游戏自动化
#[derive(Parser, Debug)]
#[command(author, version, about = "RashPlayer 游戏自动化管线", long_about = None)]
struct Args {
    /// 游戏配置目录 (main.json, locations.json, colors.json, assets/)
    #[arg(short, long)]
    game: PathBuf,

    /// 运行参数文件 (不存在时自动生成)
    #[arg(short, long, default_value = "settings.json")]
    settings: PathBuf,

    /// 设备序列号 (adb -s)
    #[arg(long)]
    serial: Option<String>,

    /// 直连已转发的视频端口, 跳过 adb 部署 (例如 127.0.0.1:27183)
    #[arg(long)]
    direct: Option<String>,

    /// 检测方式: local 或 bridge
    #[arg(long)]
    detector: Option<String>,

    /// 同时把帧发布到共享内存 (供外部观察者使用)
    #[arg(long)]
    bridge: bool,

    /// 只记录手势, 不发送到设备
    #[arg(long)]
    dry_run: bool,

    /// 固定手势随机种子
    #[arg(long)]
    seed: Option<u64>,
}

fn apply_overrides(settings: &mut RuntimeSettings, args: &Args) -> Result<()> {
    if let Some(serial) = &args.serial {
        settings.stream.scrcpy.serial = serial.clone();
    }
    if args.direct.is_some() {
        settings.stream.direct_addr = args.direct.clone();
    }
    if let Some(mode) = &args.detector {
        settings.engine.detector = match mode.to_lowercase().as_str() {
            "local" => DetectorMode::Local,
            "bridge" => DetectorMode::Bridge,
            other => bail!("未知检测方式: {} (可选 local / bridge)", other),
        };
    }
    if args.bridge {
        settings.bridge.enabled = true;
    }
    if args.dry_run {
        settings.gesture.dry_run = true;
    }
    if args.seed.is_some() {
        settings.gesture.seed = args.seed;
    }
    Ok(())
}

/// 手势线程: 逐个执行动作, 通道关闭时退出
fn gesture_loop(mut executor: GestureExecutor, actions: Receiver<Action>) {
    info!("🖐 手势线程启动");
    let mut executed = 0u64;
    for action in actions.iter() {
        match executor.execute(&action) {
            Ok(()) => {
                executed += 1;
                debug!("🖐 已执行 {} {:?}", action.kind, action.start);
            }
            Err(e) => warn!("⚠️ 手势执行失败 ({}): {}", action.kind, e),
        }
    }
    info!("🖐 手势线程退出 (共执行 {} 个动作)", executed);
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = RuntimeSettings::load(&args.settings);
    apply_overrides(&mut settings, &args)?;
    settings.print_summary();

    let game = Arc::new(
        GameConfig::load_dir(&args.game)
            .with_context(|| format!("加载游戏配置失败: {}", args.game.display()))?,
    );
    game.print_summary();

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("设置 Ctrl+C 处理失败")?;
    }

    // ========== 检测器 ==========
    let shm_dir = settings.bridge.dir.clone().unwrap_or_else(default_shm_dir);
    let detector: Box<dyn Detector> = match settings.engine.detector {
        DetectorMode::Local => Box::new(
            LocalDetector::new(Arc::clone(&game)).with_threshold(settings.engine.template_threshold),
        ),
        DetectorMode::Bridge => {
            let bridge = SharedBridge::create(
                &shm_dir,
                &settings.bridge.name,
                settings.bridge.width,
                settings.bridge.height,
            )
            .context("创建共享内存失败")?;
            info!("🧠 检测交给外部大脑: {}", bridge.path().display());
            Box::new(BridgeDetector::new(bridge, &game.triggers))
        }
    };

    // 本地检测时可选地把帧同时发布给外部观察者
    let observer = if settings.bridge.enabled && settings.engine.detector == DetectorMode::Local {
        let bridge = SharedBridge::create(
            &shm_dir,
            &settings.bridge.name,
            settings.bridge.width,
            settings.bridge.height,
        )
        .context("创建共享内存失败")?;
        info!("📤 帧发布到共享内存: {}", bridge.path().display());
        Some(Arc::new(Mutex::new(bridge)))
    } else {
        None
    };

    // ========== 手势线程 ==========
    let control: Box<dyn DeviceControl> = if settings.gesture.dry_run {
        Box::new(RecordingControl::new())
    } else {
        let serial = Some(settings.stream.scrcpy.serial.clone()).filter(|s| !s.is_empty());
        Box::new(AdbControl::new(settings.stream.scrcpy.adb_path.clone(), serial))
    };
    let humanize = settings.gesture.humanize.clone();
    let executor = match settings.gesture.seed {
        Some(seed) => GestureExecutor::with_seed(control, humanize, seed),
        None => GestureExecutor::new(control, humanize),
    };
    let (action_tx, action_rx) = bounded::<Action>(ACTION_QUEUE);
    let mut gesture_worker =
        Worker::spawn("gesture", move || gesture_loop(executor, action_rx)).context("创建手势线程失败")?;

    // ========== 决策引擎 ==========
    let mut engine = DecisionEngine::new(EngineCore::new(Arc::clone(&game), detector));
    engine.set_action_callback(move |action| {
        // 手势线程忙时丢弃, 不阻塞决策
        if action_tx.try_send(*action).is_err() {
            debug!("手势队列已满, 丢弃 {}", action.kind);
        }
    });
    engine.set_state_callback(|snap| {
        if let Some((from, to)) = &snap.transition {
            info!("🔀 [{}] {} → {}: {}", snap.tick, from, to, snap.decision);
        } else if snap.action.is_some() {
            debug!("[{}] {}: {}", snap.tick, snap.state, snap.decision);
        }
    });

    // ========== 视频流与分发 ==========
    let tunnel: Box<dyn DeviceTunnel> = match &settings.stream.direct_addr {
        Some(addr) => Box::new(DirectTunnel::new(
            addr.parse().with_context(|| format!("无效地址: {}", addr))?,
        )),
        None => Box::new(AdbTunnel::new(settings.stream.scrcpy.clone())),
    };
    let mut client = StreamClient::new(tunnel, settings.stream.connect.clone());
    {
        let running = Arc::clone(&running);
        client.set_end_callback(move |end| {
            warn!("⚠️ 视频流结束: {:?}", end);
            running.store(false, Ordering::SeqCst);
        });
    }

    let hub = CaptureHub::new();
    let sink = engine.frame_sink();
    hub.subscribe(move |frame| {
        sink.update_frame(frame.clone());
        Ok(())
    });
    let observer_id = observer.as_ref().map(|bridge| {
        let bridge = Arc::clone(bridge);
        hub.subscribe(move |frame| {
            let mut bridge = bridge.lock().map_err(|_| anyhow::anyhow!("共享内存锁已损坏"))?;
            bridge.write_frame(frame)?;
            Ok(())
        })
    });

    engine.start().context("启动决策引擎失败")?;
    let info = match hub.start(&mut client) {
        Ok(info) => info,
        Err(e) => {
            engine.stop();
            return Err(e).context("启动视频流失败");
        }
    };
    info!(
        "🎬 运行中: {} {}x{}, 初始状态 {}",
        info.device_name,
        info.width,
        info.height,
        engine.current_state()
    );

    let mut last_status = Instant::now();
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
        if last_status.elapsed() >= STATUS_INTERVAL {
            let stats = hub.stats();
            info!(
                "📊 状态 {} | 帧 {} | 投递 {} | 失败 {}",
                engine.current_state(),
                stats.frames,
                stats.delivered,
                stats.failures
            );
            last_status = Instant::now();
        }
    }

    info!("🛑 正在退出...");
    hub.stop(&mut client);
    engine.stop(); // 引擎线程退出时动作发送端随之释放, 手势线程收到通道关闭
    gesture_worker.join_timeout(SHUTDOWN_TIMEOUT);

    if let (Some(id), Some(bridge)) = (observer_id, observer) {
        hub.unsubscribe(id);
        drop(client);
        match Arc::try_unwrap(bridge) {
            Ok(m) => {
                let bridge = m.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Err(e) = bridge.destroy() {
                    warn!("⚠️ 删除共享内存失败: {}", e);
                }
            }
            Err(_) => warn!("⚠️ 共享内存仍被占用, 保留段文件"),
        }
    }
    info!("✅ 已退出");
    Ok(())
}
