//! # rule-gen
//!
//! 把路由规则（“匹配这个域名 / IP / 进程，走那个出站”）翻译成
//! Clash、Quantumult X 和 sing-box 三种客户端的配置。
//!
//! ## 流程
//! 规则来源 -> [`rule::parser`] -> [`rule::Matcher`] 列表 ->
//! - Clash / Quantumult X: [`rule::formatter`] 渲染为规则行
//! - sing-box: [`sing_box`] 分组为 JSON 规则，可选提取编译 rule-set

pub mod config;
pub mod error;
pub mod fetch;
pub mod generate;
pub mod rule;
pub mod sing_box;

pub use error::{Result, RuleError};
