/// 共享内存桥监视器
///
/// 附着到已有的共享内存段, 周期性打印帧号、大脑状态和三段延迟。
/// 只读遥测字段, 不会清除 frame_ready / result_ready 标志。
///
/// 直接运行: cargo run --release --bin bridge-monitor -- --name rashplayer_shm
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use mimalloc::MiMalloc;

use rashplayer::bridge::{default_shm_dir, SharedBridge, DEFAULT_NAME};
use rashplayer::gen_time_string;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "共享内存桥监视器", long_about = None)]
struct Args {
    /// 共享内存名称
    #[arg(short, long, default_value = DEFAULT_NAME)]
    name: String,

    /// 段文件所在目录 (默认 /dev/shm)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// 刷新间隔 (毫秒)
    #[arg(short, long, default_value_t = 1000)]
    interval_ms: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let dir = args.dir.unwrap_or_else(default_shm_dir);
    let bridge = SharedBridge::attach(&dir, &args.name)
        .with_context(|| format!("附着共享内存失败: {}/{}", dir.display(), args.name))?;
    info!(
        "📡 已附着 {} ({}x{})",
        bridge.path().display(),
        bridge.width(),
        bridge.height()
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("设置 Ctrl+C 处理失败")?;
    }

    let interval = Duration::from_millis(args.interval_ms.max(10));
    let mut last_frame = bridge.frame_number();
    while running.load(Ordering::SeqCst) {
        thread::sleep(interval);

        let frame_number = bridge.frame_number();
        let fps = (frame_number.wrapping_sub(last_frame)) as f64 / interval.as_secs_f64();
        last_frame = frame_number;
        let latency = bridge.get_latency();

        info!(
            "[{}] 帧 #{} ({:.1} fps) | 状态 {:?} | 视觉 {}µs 大脑 {}µs 总计 {}µs | 帧{} 结果{}",
            gen_time_string(":"),
            frame_number,
            fps,
            bridge.get_state(),
            latency.vision_us,
            latency.brain_us,
            latency.total_us,
            if bridge.frame_ready() { "●" } else { "○" },
            if bridge.result_ready() { "●" } else { "○" },
        );
    }

    info!("✅ 监视器已退出");
    Ok(())
}
