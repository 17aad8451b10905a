//! # sing-box 目标
//!
//! sing-box 的路由规则是 JSON 对象而不是规则行：
//! - [`group`]: 把规则条件按字段名分组
//! - [`rule_set`]: 把条件较多的规则提取为 rule-set
//! - [`compiler`]: 调用 sing-box 把 rule-set 编译成二进制
//! - [`generator`]: 组装完整配置

pub mod compiler;
pub mod generator;
pub mod group;
pub mod rule;
pub mod rule_set;

pub use compiler::{RuleSetArtifact, SingBoxCompiler};
pub use generator::{SingBoxDocument, SingBoxGenerator};
pub use rule::{LogicalMode, RuleAction, RuleNode, SingBoxRule};
pub use rule_set::{Extractor, RuleSetLiteral};
