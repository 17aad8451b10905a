//! # 错误类型
//!
//! 规则核心（解析、渲染、规则集提取与编译）统一使用 [`RuleError`]。
//! 生成流程和 CLI 层在此之上用 anyhow 附加上下文。

use thiserror::Error;

/// 规则核心可能出现的错误
#[derive(Error, Debug)]
pub enum RuleError {
    /// 规则字面量或规则列表格式错误
    #[error("parse error: {0}")]
    Parse(String),

    /// 非空输入却没有解析出任何规则
    #[error("got empty parsing result from: {0}")]
    Empty(String),

    /// 需要区分 resolve / no-resolve 的规则没有显式指定
    #[error("rule `{0}` must explicitly specify `resolve` or `no-resolve`")]
    UnresolvedResolve(String),

    /// 无法判定 IP 网段属于 IPv4 还是 IPv6
    #[error("ambiguous IP family: {0}")]
    AmbiguousIpFamily(String),

    /// 未注册的规则类型
    #[error("{0} was not registered as a matcher kind")]
    UnknownKind(String),

    /// 目标客户端不支持该规则类型（可恢复：只丢弃这一条）
    #[error("{kind} is not supported by {target}")]
    UnsupportedByTarget { kind: String, target: String },

    /// 规则指向了不存在的出站 / 策略组
    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    /// 规则集标签冲突（内部不变量被破坏）
    #[error("rule-set tag conflict: {0}")]
    RuleSetConflict(String),

    /// 外部规则集编译工具不可用或执行失败
    #[error("rule-set compiler error: {0}")]
    CompilerTool(String),

    /// 拉取远程规则列表失败
    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuleError {
    /// 是否为可恢复的“目标不支持”错误
    pub fn is_unsupported(&self) -> bool {
        matches!(self, RuleError::UnsupportedByTarget { .. })
    }
}

pub type Result<T, E = RuleError> = std::result::Result<T, E>;
