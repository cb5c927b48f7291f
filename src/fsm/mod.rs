/// 有限状态机决策系统 (FSM Decision System)
///
/// - expr:   规则条件编译与求值
/// - engine: 状态机核心与引擎线程
pub mod engine;
pub mod expr;

pub use engine::{
    detection_variables, DecisionEngine, EngineCore, EngineSnapshot, FrameSink, VariableExtractor,
};
pub use expr::{Condition, Variables};
