//! 共享内存桥 (SharedBridge)
//!
//! 帧方向: 本进程写帧 → frame_ready=1 (最后写, Release)
//! 结果方向: 大脑写结果 → result_ready=1; 本进程 Acquire 检查标志, 读取后清零 (最后写)
//!
//! 两端位于不同进程, 只能依赖映射内存上的原子操作, 不能用进程内锁。

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info, warn};
use memmap2::{MmapMut, MmapOptions};

use super::layout::{self, offset, ResultRecord, ACTION_SIZE, HEADER_SIZE, MAX_RESULTS, RESULT_SIZE};
use crate::error::BridgeError;
use crate::types::{Action, ActionType, BrainState, Frame};
use crate::utils::{resize_rgba_into, wall_clock_ns};

/// 三段延迟 (微秒)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Latency {
    pub vision_us: i64,
    pub brain_us: i64,
    pub total_us: i64,
}

/// 一次成功的结果读取
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeResults {
    pub results: Vec<ResultRecord>,
    pub action: Option<Action>, // NONE 时为 None
    pub state: BrainState,
    pub frame_number: u64,
}

/// 共享内存段默认目录 (Linux 上 shm_open 的落点)
pub fn default_shm_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/dev/shm")
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::temp_dir()
    }
}

/// POSIX 名称 ("/rashplayer_shm") → 目录下的文件路径
pub fn segment_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name.trim_start_matches('/'))
}

pub struct SharedBridge {
    path: PathBuf,
    mmap: MmapMut,
    base: *mut u8, // 指向 mmap 起始地址, 所有读写都经由该指针
    width: u32,
    height: u32,
    owner: bool,
}

// SAFETY: base 只指向本结构持有的 mmap, 随结构一起移动, 不与其它线程共享
unsafe impl Send for SharedBridge {}

impl SharedBridge {
    /// 创建新段 (删除同名旧段, 头部清零后写入 magic/version/尺寸)
    pub fn create(dir: &Path, name: &str, width: u32, height: u32) -> Result<Self, BridgeError> {
        if width == 0 || height == 0 || width > 8192 || height > 8192 {
            return Err(BridgeError::InvalidSize {
                width,
                height,
                max_width: 8192,
                max_height: 8192,
            });
        }

        let path = segment_path(dir, name);
        if path.exists() {
            warn!("⚠️ 发现残留共享内存段 {}, 删除后重建", path.display());
            fs::remove_file(&path)?;
        }

        let total = layout::segment_size(width, height);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(total as u64)?;

        // SAFETY: 文件刚由本进程截断并设为 total 字节, 映射长度与之一致
        let mut mmap = unsafe { MmapOptions::new().len(total).map_mut(&file)? };
        let base = mmap.as_mut_ptr();
        let mut bridge = Self {
            path,
            mmap,
            base,
            width,
            height,
            owner: true,
        };

        // SAFETY: total = HEADER_SIZE + 帧区 ≥ HEADER_SIZE
        unsafe { ptr::write_bytes(bridge.base, 0, HEADER_SIZE) };
        bridge.put_u32(offset::MAGIC, layout::MAGIC);
        bridge.put_u32(offset::VERSION, layout::VERSION);
        bridge.put_i32(offset::FRAME_WIDTH, width as i32);
        bridge.put_i32(offset::FRAME_HEIGHT, height as i32);
        bridge.put_i32(offset::FRAME_STRIDE, (width * 4) as i32);
        bridge.put_u32(offset::CURRENT_STATE, BrainState::Idle as u32);

        info!(
            "✅ 共享内存已创建: {} ({}x{}, {} 字节)",
            bridge.path.display(),
            width,
            height,
            total
        );
        Ok(bridge)
    }

    /// 连接已存在的段; 段不存在 → NotFound, magic/version/尺寸不符 → ProtocolMismatch
    pub fn attach(dir: &Path, name: &str) -> Result<Self, BridgeError> {
        let path = segment_path(dir, name);
        if !path.exists() {
            return Err(BridgeError::NotFound(path));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len() as usize;
        if len < HEADER_SIZE {
            return Err(BridgeError::ProtocolMismatch(format!(
                "segment is {} bytes, header needs {}",
                len, HEADER_SIZE
            )));
        }

        // SAFETY: len 取自文件元数据; 另一端只会在头部标志约定下写入
        let mut mmap = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        let base = mmap.as_mut_ptr();
        let mut bridge = Self {
            path,
            mmap,
            base,
            width: 0,
            height: 0,
            owner: false,
        };

        let magic = bridge.get_u32(offset::MAGIC);
        if magic != layout::MAGIC {
            return Err(BridgeError::ProtocolMismatch(format!(
                "bad magic 0x{:08x}, expected 0x{:08x}",
                magic,
                layout::MAGIC
            )));
        }
        let version = bridge.get_u32(offset::VERSION);
        if version != layout::VERSION {
            return Err(BridgeError::ProtocolMismatch(format!(
                "version {} unsupported, expected {}",
                version,
                layout::VERSION
            )));
        }

        let width = bridge.get_i32(offset::FRAME_WIDTH);
        let height = bridge.get_i32(offset::FRAME_HEIGHT);
        if width <= 0 || height <= 0 || layout::segment_size(width as u32, height as u32) > len {
            return Err(BridgeError::ProtocolMismatch(format!(
                "frame {}x{} does not fit a {} byte segment",
                width, height, len
            )));
        }
        bridge.width = width as u32;
        bridge.height = height as u32;

        info!(
            "✅ 已连接共享内存: {} ({}x{})",
            bridge.path.display(),
            width,
            height
        );
        Ok(bridge)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    // ========== 帧方向 ==========

    /// 发布一帧: 缩放到段容量 → 拷贝像素 → frame_number+1 → 时间戳 → frame_ready=1 (最后)
    pub fn write_frame(&mut self, frame: &Frame) -> Result<u64, BridgeError> {
        if !frame.is_valid() {
            return Err(BridgeError::InvalidSize {
                width: frame.width,
                height: frame.height,
                max_width: self.width,
                max_height: self.height,
            });
        }

        let packed;
        let src: &[u8] = if frame.stride == frame.width * 4 {
            &frame.data
        } else {
            packed = frame.packed_rgba();
            &packed
        };

        // SAFETY: create/attach 已保证 HEADER_SIZE + frame_size(w, h) ≤ mmap.len(),
        // 且 &mut self 保证本进程内没有其它借用
        let region = unsafe {
            std::slice::from_raw_parts_mut(
                self.base.add(HEADER_SIZE),
                layout::frame_size(self.width, self.height),
            )
        };
        resize_rgba_into(src, frame.width, frame.height, region, self.width, self.height)?;

        let frame_number = self.get_u64(offset::FRAME_NUMBER).wrapping_add(1);
        self.put_u64(offset::FRAME_NUMBER, frame_number);
        self.put_i64(offset::FRAME_TIMESTAMP, wall_clock_ns());
        self.flag(offset::FRAME_READY).store(1u32.to_le(), Ordering::Release);
        Ok(frame_number)
    }

    /// 非阻塞轮询结果; 未就绪时返回 None 且无副作用
    pub fn read_results(&mut self) -> Option<BridgeResults> {
        if u32::from_le(self.flag(offset::RESULT_READY).load(Ordering::Acquire)) == 0 {
            return None;
        }

        let num = (self.get_u32(offset::NUM_RESULTS) as usize).min(MAX_RESULTS);
        let results = (0..num)
            .map(|i| {
                let rec: [u8; RESULT_SIZE] = self.get_bytes(offset::RESULTS + i * RESULT_SIZE);
                ResultRecord::decode(&rec)
            })
            .collect();
        let action: [u8; ACTION_SIZE] = self.get_bytes(offset::ACTION);
        let action = layout::decode_action(&action);

        let out = BridgeResults {
            results,
            action: (action.kind != ActionType::None).then_some(action),
            state: self.get_state(),
            frame_number: self.get_u64(offset::FRAME_NUMBER),
        };

        self.flag(offset::RESULT_READY).store(0, Ordering::Release);
        Some(out)
    }

    // ========== 遥测 (无同步读取, 仅供显示) ==========

    pub fn get_latency(&self) -> Latency {
        Latency {
            vision_us: self.get_i64(offset::VISION_LATENCY) / 1000,
            brain_us: self.get_i64(offset::BRAIN_LATENCY) / 1000,
            total_us: self.get_i64(offset::TOTAL_LATENCY) / 1000,
        }
    }

    /// 未知状态值按 ERROR 报告
    pub fn get_state(&self) -> BrainState {
        BrainState::from_u32(self.get_u32(offset::CURRENT_STATE)).unwrap_or(BrainState::Error)
    }

    pub fn frame_number(&self) -> u64 {
        self.get_u64(offset::FRAME_NUMBER)
    }

    pub fn frame_timestamp_ns(&self) -> i64 {
        self.get_i64(offset::FRAME_TIMESTAMP)
    }

    pub fn frame_ready(&self) -> bool {
        u32::from_le(self.flag(offset::FRAME_READY).load(Ordering::Acquire)) != 0
    }

    pub fn result_ready(&self) -> bool {
        u32::from_le(self.flag(offset::RESULT_READY).load(Ordering::Acquire)) != 0
    }

    /// 拷贝出当前帧区域
    pub fn frame_pixels(&self) -> Vec<u8> {
        let n = layout::frame_size(self.width, self.height);
        let mut out = vec![0u8; n];
        // SAFETY: 帧区范围同 write_frame, out 长度为 n
        unsafe { ptr::copy_nonoverlapping(self.base.add(HEADER_SIZE), out.as_mut_ptr(), n) };
        out
    }

    // ========== 大脑一侧 ==========

    /// 取走已发布的帧 (Acquire 检查 frame_ready, 拷贝后清零)
    pub fn take_frame(&mut self) -> Option<Frame> {
        if u32::from_le(self.flag(offset::FRAME_READY).load(Ordering::Acquire)) == 0 {
            return None;
        }
        let frame_number = self.get_u64(offset::FRAME_NUMBER);
        let pixels = self.frame_pixels();
        self.flag(offset::FRAME_READY).store(0, Ordering::Release);
        Some(Frame::from_rgba(self.width, self.height, pixels, frame_number))
    }

    /// 发布识别结果与待执行动作, result_ready=1 最后写
    pub fn publish_results(
        &mut self,
        results: &[ResultRecord],
        action: Option<&Action>,
        state: BrainState,
        vision_latency_ns: i64,
        brain_latency_ns: i64,
    ) {
        if results.len() > MAX_RESULTS {
            debug!("结果数 {} 超过上限, 截断为 {}", results.len(), MAX_RESULTS);
        }
        let n = results.len().min(MAX_RESULTS);
        for (i, rec) in results.iter().take(n).enumerate() {
            self.put_bytes(offset::RESULTS + i * RESULT_SIZE, &rec.encode());
        }
        self.put_u32(offset::NUM_RESULTS, n as u32);

        let action = action.copied().unwrap_or_default();
        self.put_bytes(offset::ACTION, &layout::encode_action(&action));

        let total = (wall_clock_ns() - self.frame_timestamp_ns()).max(0);
        self.put_i64(offset::VISION_LATENCY, vision_latency_ns);
        self.put_i64(offset::BRAIN_LATENCY, brain_latency_ns);
        self.put_i64(offset::TOTAL_LATENCY, total);
        self.put_u32(offset::CURRENT_STATE, state as u32);

        self.flag(offset::RESULT_READY).store(1u32.to_le(), Ordering::Release);
    }

    pub fn set_state(&mut self, state: BrainState) {
        self.put_u32(offset::CURRENT_STATE, state as u32);
    }

    /// 只解除映射, 段文件保留给另一端
    pub fn detach(self) {
        debug!("共享内存已解除映射: {}", self.path.display());
    }

    /// 解除映射并删除段文件 (仅创建者)
    pub fn destroy(self) -> Result<(), BridgeError> {
        let path = self.path.clone();
        let owner = self.owner;
        drop(self);
        if owner && path.exists() {
            fs::remove_file(&path)?;
            info!("🧹 共享内存已删除: {}", path.display());
        }
        Ok(())
    }

    // ========== 原始读写 ==========

    fn flag(&self, off: usize) -> &AtomicU32 {
        debug_assert!(off % 4 == 0 && off + 4 <= HEADER_SIZE);
        // SAFETY: mmap 按页对齐, 标志偏移为头部内的 4 字节对齐常量
        unsafe { &*(self.base.add(off) as *const AtomicU32) }
    }

    fn get_bytes<const N: usize>(&self, off: usize) -> [u8; N] {
        debug_assert!(off + N <= self.mmap.len());
        let mut b = [0u8; N];
        // SAFETY: off 为头部/结果区常量偏移, 均小于 HEADER_SIZE ≤ mmap.len()
        unsafe { ptr::copy_nonoverlapping(self.base.add(off), b.as_mut_ptr(), N) };
        b
    }

    fn put_bytes(&mut self, off: usize, bytes: &[u8]) {
        debug_assert!(off + bytes.len() <= self.mmap.len());
        // SAFETY: 同 get_bytes
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(off), bytes.len()) };
    }

    fn get_u32(&self, off: usize) -> u32 {
        u32::from_le_bytes(self.get_bytes(off))
    }

    fn get_i32(&self, off: usize) -> i32 {
        i32::from_le_bytes(self.get_bytes(off))
    }

    fn get_u64(&self, off: usize) -> u64 {
        u64::from_le_bytes(self.get_bytes(off))
    }

    fn get_i64(&self, off: usize) -> i64 {
        i64::from_le_bytes(self.get_bytes(off))
    }

    fn put_u32(&mut self, off: usize, v: u32) {
        self.put_bytes(off, &v.to_le_bytes());
    }

    fn put_i32(&mut self, off: usize, v: i32) {
        self.put_bytes(off, &v.to_le_bytes());
    }

    fn put_u64(&mut self, off: usize, v: u64) {
        self.put_bytes(off, &v.to_le_bytes());
    }

    fn put_i64(&mut self, off: usize, v: i64) {
        self.put_bytes(off, &v.to_le_bytes());
    }
}
