//! # 规则模块
//!
//! 此模块负责：
//! 1. 规则类型注册表与中间表示（[`Matcher`]）
//! 2. 从各种规则源解析规则条件
//! 3. 渲染为 Clash / Quantumult X 的规则行

pub mod formatter;
pub mod kind;
pub mod matcher;
pub mod parser;
pub mod route;

pub use formatter::{create_formatter, LineFormatter, OutputFormat, RenderedRules};
pub use kind::MatcherKind;
pub use matcher::Matcher;
pub use parser::{resolve_filter, FilterSpec};
pub use route::{Destination, DestinationTable, RouteRule};
