//! 游戏配置 (Game configuration graph)
//!
//! 目录结构:
//! ```text
//! games/<game>/
//!   main.json        名称/初始状态/轮询频率/屏幕尺寸/状态表/触发器编号
//!   locations.json   点击目标与区域 (可选)
//!   colors.json      HSV 颜色范围 (可选)
//!   assets/*.png     模板图片, 文件名主干即检测目标名
//! ```
//! 加载后只读; 规则条件在此编译, 规则按优先级降序稳定排序。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::detection::color::ColorRange;
use crate::detection::template::Template;
use crate::error::ConfigError;
use crate::fsm::expr::Condition;
use crate::types::{ActionType, Point, Rect};

pub const DEFAULT_POLLING_HZ: u32 = 60;
pub const DEFAULT_SCREEN_WIDTH: u32 = 1080;
pub const DEFAULT_SCREEN_HEIGHT: u32 = 2400;
pub const DEFAULT_SWIPE_MS: i32 = 300;

const TEMPLATE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

// ========== 文件格式 ==========

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScreenFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActionFile {
    action: ActionType,
    target: Option<String>,
    end_target: Option<String>,
    duration_ms: Option<i32>,
    next_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    condition: String,
    #[serde(default)]
    action: ActionType,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    end_target: Option<String>,
    #[serde(default)]
    duration_ms: Option<i32>,
    #[serde(default)]
    next_state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StateFile {
    detect: OneOrMany,
    on_found: ActionFile,
    timeout_ms: u64,
    on_timeout: Option<String>,
    logic: Vec<RuleFile>,
    polling_hz: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GameFile {
    name: Option<String>,
    version: Option<String>,
    initial_state: Option<String>,
    polling_hz: Option<u32>,
    screen: ScreenFile,
    triggers: HashMap<String, u32>,
    states: HashMap<String, StateFile>,
    // 也可以直接写在 main.json 中
    targets: HashMap<String, TapTarget>,
    regions: HashMap<String, RegionFile>,
    colors: HashMap<String, ColorRange>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LocationsFile {
    targets: HashMap<String, TapTarget>,
    regions: HashMap<String, RegionFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ColorsFile {
    colors: HashMap<String, ColorRange>,
}

#[derive(Debug, Deserialize)]
struct RegionFile {
    #[serde(default)]
    x: i32,
    #[serde(default)]
    y: i32,
    #[serde(default = "default_region_side")]
    width: i32,
    #[serde(default = "default_region_side")]
    height: i32,
    #[serde(default)]
    description: String,
}

fn default_region_side() -> i32 {
    100
}

// ========== 编译后的配置 ==========

/// 命名点击目标
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TapTarget {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default)]
    pub description: String,
}

impl TapTarget {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// 命名区域
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub rect: Rect,
    pub description: String,
}

/// 动作描述 (简单模式的 on_found 与规则共用)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionSpec {
    pub action: ActionType,
    pub target: Option<String>,
    pub end_target: Option<String>,
    pub duration_ms: Option<i32>,
    pub next_state: Option<String>,
}

/// 已编译规则
#[derive(Debug, Clone)]
pub struct Rule {
    pub condition: Condition,
    pub priority: i32,
    pub spec: ActionSpec,
}

#[derive(Debug, Clone)]
pub struct StateConfig {
    pub name: String,
    pub detect: Vec<String>,
    pub on_found: ActionSpec,
    pub timeout_ms: u64,
    pub on_timeout: Option<String>,
    pub rules: Vec<Rule>, // 优先级降序
    pub polling_hz: Option<u32>,
}

impl StateConfig {
    /// 有规则即走规则模式, 否则走简单模式
    pub fn uses_rules(&self) -> bool {
        !self.rules.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    pub name: String,
    pub version: String,
    pub initial_state: String,
    pub polling_hz: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub states: HashMap<String, StateConfig>,
    pub targets: HashMap<String, TapTarget>,
    pub regions: HashMap<String, Region>,
    pub colors: HashMap<String, ColorRange>,
    pub templates: HashMap<String, Template>,
    pub triggers: HashMap<String, u32>, // 目标名 → 共享内存 trigger_id
    pub path: Option<PathBuf>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl ActionSpec {
    fn compile(file: ActionFile) -> Self {
        Self {
            action: file.action,
            target: non_empty(file.target),
            end_target: non_empty(file.end_target),
            duration_ms: file.duration_ms,
            next_state: non_empty(file.next_state),
        }
    }
}

impl GameConfig {
    /// 从游戏目录加载 (main.json + 可选 locations.json / colors.json / assets/)
    pub fn load_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut game: GameFile = read_json(&dir.join("main.json"))?;

        let locations = dir.join("locations.json");
        if locations.exists() {
            let loc: LocationsFile = read_json(&locations)?;
            game.targets.extend(loc.targets);
            game.regions.extend(loc.regions);
        }
        let colors = dir.join("colors.json");
        if colors.exists() {
            let c: ColorsFile = read_json(&colors)?;
            game.colors.extend(c.colors);
        }

        let fallback_name = dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("game")
            .to_string();
        let mut config = Self::compile(game, fallback_name)?;
        config.templates = load_templates(&dir.join("assets"))?;
        config.path = Some(dir.to_path_buf());

        info!(
            "✅ 游戏配置已加载: {} v{} ({} 个状态, {} 个模板)",
            config.name,
            config.version,
            config.states.len(),
            config.templates.len()
        );
        Ok(config)
    }

    /// 从单个 JSON 文本加载 (不含模板)
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let game: GameFile = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::compile(game, "game".to_string())
    }

    fn compile(game: GameFile, fallback_name: String) -> Result<Self, ConfigError> {
        let mut states = HashMap::with_capacity(game.states.len());
        for (name, file) in game.states {
            let mut rules = Vec::with_capacity(file.logic.len());
            for rule in file.logic {
                let condition =
                    Condition::compile(&rule.condition).map_err(|source| ConfigError::InvalidCondition {
                        state: name.clone(),
                        condition: rule.condition.clone(),
                        source,
                    })?;
                rules.push(Rule {
                    condition,
                    priority: rule.priority,
                    spec: ActionSpec {
                        action: rule.action,
                        target: non_empty(rule.target),
                        end_target: non_empty(rule.end_target),
                        duration_ms: rule.duration_ms,
                        next_state: non_empty(rule.next_state),
                    },
                });
            }
            // 稳定排序: 同优先级保持声明顺序
            rules.sort_by_key(|r| std::cmp::Reverse(r.priority));

            if file.polling_hz == Some(0) {
                return Err(ConfigError::Invalid {
                    field: format!("states.{}.polling_hz", name),
                    reason: "must be positive".into(),
                });
            }

            states.insert(
                name.clone(),
                StateConfig {
                    name,
                    detect: file.detect.into_vec(),
                    on_found: ActionSpec::compile(file.on_found),
                    timeout_ms: file.timeout_ms,
                    on_timeout: non_empty(file.on_timeout),
                    rules,
                    polling_hz: file.polling_hz,
                },
            );
        }

        let polling_hz = game.polling_hz.unwrap_or(DEFAULT_POLLING_HZ);
        if polling_hz == 0 {
            return Err(ConfigError::Invalid {
                field: "polling_hz".into(),
                reason: "must be positive".into(),
            });
        }

        let config = Self {
            name: game.name.unwrap_or(fallback_name),
            version: game.version.unwrap_or_else(|| "1.0".into()),
            initial_state: non_empty(game.initial_state).unwrap_or_else(|| "menu".into()),
            polling_hz,
            screen_width: game.screen.width.unwrap_or(DEFAULT_SCREEN_WIDTH),
            screen_height: game.screen.height.unwrap_or(DEFAULT_SCREEN_HEIGHT),
            states,
            targets: game.targets,
            regions: game
                .regions
                .into_iter()
                .map(|(k, r)| {
                    (
                        k,
                        Region {
                            rect: Rect::new(r.x, r.y, r.width, r.height),
                            description: r.description,
                        },
                    )
                })
                .collect(),
            colors: game.colors,
            templates: HashMap::new(),
            triggers: game.triggers,
            path: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// 所有状态引用必须指向已声明状态
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.states.is_empty() && !self.states.contains_key(&self.initial_state) {
            return Err(ConfigError::UnknownState {
                from: "<initial_state>".into(),
                to: self.initial_state.clone(),
            });
        }
        for state in self.states.values() {
            let refs = state
                .on_timeout
                .iter()
                .chain(state.on_found.next_state.iter())
                .chain(state.rules.iter().filter_map(|r| r.spec.next_state.as_ref()));
            for to in refs {
                if !self.states.contains_key(to) {
                    return Err(ConfigError::UnknownState {
                        from: state.name.clone(),
                        to: to.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn state(&self, name: &str) -> Option<&StateConfig> {
        self.states.get(name)
    }

    pub fn screen_center(&self) -> Point {
        Point::new(self.screen_width as i32 / 2, self.screen_height as i32 / 2)
    }

    /// 模板搜索区域: 名为 `<target>_search` 的区域
    pub fn search_region(&self, target: &str) -> Option<Rect> {
        self.regions.get(&format!("{}_search", target)).map(|r| r.rect)
    }

    /// 某状态的轮询频率 (状态覆盖全局)
    pub fn polling_hz_for(&self, state: &str) -> u32 {
        self.state(state)
            .and_then(|s| s.polling_hz)
            .unwrap_or(self.polling_hz)
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎮 游戏: {} v{}", self.name, self.version);
        info!("  初始状态: {}", self.initial_state);
        info!("  轮询频率: {} Hz", self.polling_hz);
        info!("  屏幕: {}x{}", self.screen_width, self.screen_height);
        let mut names: Vec<_> = self.states.keys().collect();
        names.sort();
        for name in names {
            let s = &self.states[name];
            info!(
                "  状态 {}: 检测 {:?}, {} 条规则, 超时 {} ms → {}",
                name,
                s.detect,
                s.rules.len(),
                s.timeout_ms,
                s.on_timeout.as_deref().unwrap_or("-")
            );
        }
    }
}

fn load_templates(dir: &Path) -> Result<HashMap<String, Template>, ConfigError> {
    let mut templates = HashMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(templates),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TEMPLATE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if !is_image {
            continue;
        }
        match Template::load(&path) {
            Ok(t) => {
                info!("  📷 模板 {} ({}x{})", t.name, t.width(), t.height());
                templates.insert(t.name.clone(), t);
            }
            Err(e) => warn!("⚠️ 跳过模板 {}: {}", path.display(), e),
        }
    }
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAPPY: &str = r#"{
        "name": "flappy",
        "initial_state": "menu",
        "screen": {"width": 1080, "height": 1920},
        "states": {
            "menu": {
                "detect": "play_button",
                "on_found": {"action": "TAP", "next_state": "playing"},
                "timeout_ms": 5000,
                "on_timeout": "menu"
            },
            "playing": {
                "detect": ["bird", "pipe"],
                "logic": [
                    {"condition": "true", "action": "WAIT", "priority": 0},
                    {"condition": "bird_y > pipe_y", "action": "TAP", "priority": 10, "target": "tap_zone"},
                    {"condition": "pipe_found == 0", "action": "TAP", "priority": 10}
                ],
                "polling_hz": 30
            }
        },
        "targets": {"tap_zone": {"x": 540, "y": 1200}},
        "regions": {"play_button_search": {"x": 0, "y": 1000}}
    }"#;

    #[test]
    fn test_load_inline_config() {
        let cfg = GameConfig::from_json_str(FLAPPY).unwrap();
        assert_eq!(cfg.name, "flappy");
        assert_eq!(cfg.screen_height, 1920);
        assert_eq!(cfg.polling_hz, 60);
        assert_eq!(cfg.polling_hz_for("playing"), 30);
        assert_eq!(cfg.polling_hz_for("menu"), 60);

        let menu = cfg.state("menu").unwrap();
        assert_eq!(menu.detect, vec!["play_button"]);
        assert!(!menu.uses_rules());
        assert_eq!(menu.on_found.next_state.as_deref(), Some("playing"));

        // 缺省宽高 100
        assert_eq!(
            cfg.search_region("play_button"),
            Some(Rect::new(0, 1000, 100, 100))
        );
    }

    #[test]
    fn test_rules_sorted_by_priority_stable() {
        let cfg = GameConfig::from_json_str(FLAPPY).unwrap();
        let rules = &cfg.state("playing").unwrap().rules;
        let order: Vec<_> = rules.iter().map(|r| r.condition.source()).collect();
        assert_eq!(order, vec!["bird_y > pipe_y", "pipe_found == 0", "true"]);
    }

    #[test]
    fn test_invalid_condition_rejected() {
        let json = r#"{"initial_state": "a", "states": {"a": {"logic": [{"condition": "x >", "action": "TAP"}]}}}"#;
        assert!(matches!(
            GameConfig::from_json_str(json),
            Err(ConfigError::InvalidCondition { .. })
        ));
    }

    #[test]
    fn test_unknown_state_rejected() {
        let json = r#"{"initial_state": "a", "states": {"a": {"on_timeout": "nowhere", "timeout_ms": 10}}}"#;
        assert!(matches!(
            GameConfig::from_json_str(json),
            Err(ConfigError::UnknownState { .. })
        ));
        let json = r#"{"initial_state": "b", "states": {"a": {}}}"#;
        assert!(matches!(
            GameConfig::from_json_str(json),
            Err(ConfigError::UnknownState { .. })
        ));
    }

    #[test]
    fn test_empty_next_state_ignored() {
        let json = r#"{"initial_state": "a", "states": {"a": {"on_found": {"action": "TAP", "next_state": ""}}}}"#;
        let cfg = GameConfig::from_json_str(json).unwrap();
        assert_eq!(cfg.state("a").unwrap().on_found.next_state, None);
        assert_eq!(cfg.screen_width, DEFAULT_SCREEN_WIDTH);
        assert_eq!(cfg.screen_height, DEFAULT_SCREEN_HEIGHT);
    }

    #[test]
    fn test_load_dir_with_sidecar_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("main.json"),
            r#"{"initial_state": "menu", "states": {"menu": {"detect": ["coin", "gem"]}}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("locations.json"),
            r#"{"targets": {"tap_zone": {"x": 1, "y": 2}}, "regions": {"coin_search": {"x": 0, "y": 0, "width": 50, "height": 60}}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("colors.json"),
            r#"{"colors": {"gem": {"hsv_low": [40, 100, 100]}}}"#,
        )
        .unwrap();
        fs::create_dir(dir.path().join("assets")).unwrap();
        image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]))
            .save(dir.path().join("assets").join("coin.png"))
            .unwrap();

        let cfg = GameConfig::load_dir(dir.path()).unwrap();
        assert_eq!(cfg.targets["tap_zone"].point(), Point::new(1, 2));
        assert_eq!(cfg.search_region("coin"), Some(Rect::new(0, 0, 50, 60)));
        assert_eq!(cfg.colors["gem"].hsv_high, [180, 255, 255]);
        assert!(cfg.templates.contains_key("coin"));
        assert_eq!(cfg.path.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_missing_main_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            GameConfig::load_dir(dir.path()),
            Err(ConfigError::Io { .. })
        ));
    }
}
