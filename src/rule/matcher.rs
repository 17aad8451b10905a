//! # 规则条件（中间表示）
//!
//! 一个 [`Matcher`] 是一条与目标客户端无关的路由条件，例如
//! “域名后缀等于 example.com”。各目标客户端的具体写法在渲染时才决定。

use std::fmt;
use std::hash::{Hash, Hasher};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde_json::Value;

use super::formatter::OutputFormat;
use super::kind::MatcherKind;
use crate::error::{Result, RuleError};

// ========================================
// 规则条件
// ========================================

/// 一条路由条件
///
/// 相等性与哈希只看 `(kind, value)`，不看 `resolve`：
/// 两条仅 resolve 标记不同的条件在去重时被视为同一条。
#[derive(Debug, Clone)]
pub struct Matcher {
    kind: MatcherKind,
    value: Option<String>,
    resolve: Option<bool>,
}

impl Matcher {
    /// 创建规则条件并校验取值
    pub fn new(kind: MatcherKind, value: impl Into<String>, resolve: Option<bool>) -> Result<Self> {
        if kind == MatcherKind::Match {
            return Err(RuleError::Parse("MATCH rule does not take a value".to_string()));
        }

        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(RuleError::Parse(format!("{} rule requires a value", kind)));
        }
        let value = normalize_value(kind, value)?;

        Ok(Self {
            kind,
            value: Some(value),
            resolve,
        })
    }

    /// 兜底规则：没有取值，且总是被视为需要解析（排在最后）
    pub fn match_all() -> Self {
        Self {
            kind: MatcherKind::Match,
            value: None,
            resolve: Some(true),
        }
    }

    /// 域名列表条目（`+.example.com`、`*.example.*`、`example.com`）
    pub fn domain_list_item(pattern: impl Into<String>) -> Result<Self> {
        Self::new(MatcherKind::DomainListItem, pattern, None)
    }

    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn resolve(&self) -> Option<bool> {
        self.resolve
    }

    /// 设置 resolve 标记（兜底规则保持不变）
    pub fn set_resolve(&mut self, resolve: Option<bool>) {
        if self.kind != MatcherKind::Match {
            self.resolve = resolve;
        }
    }

    /// 渲染后是否会触发域名解析
    pub fn requires_resolution(&self) -> bool {
        self.kind.may_require_resolution() && self.resolve == Some(true)
    }

    // ========================================
    // 行格式渲染（Clash / Quantumult X）
    // ========================================

    /// 渲染为行格式字段：`[写法, 取值?, "no-resolve"?]`
    ///
    /// 目标不支持该类型时返回 [`RuleError::UnsupportedByTarget`]；
    /// 需要区分解析的类型未设置 resolve 时返回 [`RuleError::UnresolvedResolve`]。
    pub fn line_fields(&self, format: OutputFormat) -> Result<Vec<String>> {
        let (kind, value) = match self.kind {
            MatcherKind::DomainListItem => {
                let (kind, value) = self.decompose_domain_item();
                (kind, Some(value))
            }
            kind => (kind, self.value.clone()),
        };

        let spelling = kind
            .spelling(format)
            .ok_or_else(|| self.unsupported(format))?;

        let mut fields = vec![spelling.to_string()];
        if let Some(value) = value {
            fields.push(value);
        }

        if self.kind.may_require_resolution() && self.kind != MatcherKind::Match {
            match self.resolve {
                None => return Err(RuleError::UnresolvedResolve(self.to_string())),
                Some(false) => fields.push("no-resolve".to_string()),
                Some(true) => {}
            }
        }

        Ok(fields)
    }

    /// Clash 写法，如 `IP-CIDR,10.0.0.0/8,no-resolve`
    pub fn clash_rule(&self) -> Result<String> {
        Ok(self.line_fields(OutputFormat::Clash)?.join(","))
    }

    /// Quantumult X 写法，如 `host-suffix,example.com`
    pub fn quantumult_rule(&self) -> Result<String> {
        Ok(self.line_fields(OutputFormat::QuantumultX)?.join(","))
    }

    // ========================================
    // sing-box 渲染
    // ========================================

    /// 渲染为 sing-box 规则字段 `(字段名, 取值)`
    pub fn sing_box_field(&self) -> Result<(&'static str, Value)> {
        let value = self.value.clone().unwrap_or_default();
        match self.kind {
            MatcherKind::DomainListItem => Ok(match classify_domain_item(&value) {
                DomainPattern::Suffix(suffix) => ("domain_suffix", Value::from(suffix)),
                DomainPattern::Wildcard(pattern) => {
                    ("domain_regex", Value::from(wildcard_to_regex(pattern)))
                }
                DomainPattern::Exact(domain) => ("domain", Value::from(domain)),
            }),
            MatcherKind::DomainWildcard => {
                Ok(("domain_regex", Value::from(wildcard_to_regex(&value))))
            }
            MatcherKind::DstPort | MatcherKind::SrcPort => {
                let (single, range) = if self.kind == MatcherKind::DstPort {
                    ("port", "port_range")
                } else {
                    ("source_port", "source_port_range")
                };
                match value.split_once('-') {
                    Some((lo, hi)) => Ok((range, Value::from(format!("{}:{}", lo, hi)))),
                    None => {
                        let port: u16 = value
                            .parse()
                            .map_err(|e| RuleError::Parse(format!("invalid port '{value}': {e}")))?;
                        Ok((single, Value::from(port)))
                    }
                }
            }
            kind => {
                let key = kind
                    .sing_box()
                    .ok_or_else(|| self.unsupported(OutputFormat::SingBox))?;
                Ok((key, Value::from(value)))
            }
        }
    }

    /// 把域名列表条目拆成具体的规则类型
    fn decompose_domain_item(&self) -> (MatcherKind, String) {
        let value = self.value.as_deref().unwrap_or_default();
        match classify_domain_item(value) {
            DomainPattern::Suffix(suffix) => (MatcherKind::DomainSuffix, suffix.to_string()),
            DomainPattern::Wildcard(pattern) => {
                let pattern = match pattern.strip_prefix("+.") {
                    Some(rest) => format!("*.{rest}"),
                    None => pattern.to_string(),
                };
                (MatcherKind::DomainWildcard, pattern)
            }
            DomainPattern::Exact(domain) => (MatcherKind::Domain, domain.to_string()),
        }
    }

    fn unsupported(&self, format: OutputFormat) -> RuleError {
        RuleError::UnsupportedByTarget {
            kind: self.kind.to_string(),
            target: format.to_string(),
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.value == other.value
    }
}

impl Eq for Matcher {}

impl Hash for Matcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.value.hash(state);
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref value) = self.value {
            write!(f, ",{}", value)?;
        }
        match (self.kind.may_require_resolution(), self.resolve) {
            (true, Some(false)) => write!(f, ",no-resolve"),
            _ => Ok(()),
        }
    }
}

// ========================================
// 取值校验
// ========================================

/// 校验取值，返回规范化后的写法（端口范围为 `lo-hi`）
fn normalize_value(kind: MatcherKind, value: String) -> Result<String> {
    match kind {
        MatcherKind::IpCidr => {
            value.parse::<Ipv4Net>().map_err(|_| {
                RuleError::AmbiguousIpFamily(format!("{value} is not an IPv4 network"))
            })?;
        }
        MatcherKind::IpCidr6 => {
            value.parse::<Ipv6Net>().map_err(|_| {
                RuleError::AmbiguousIpFamily(format!("{value} is not an IPv6 network"))
            })?;
        }
        MatcherKind::SrcIpCidr => {
            value
                .parse::<IpNet>()
                .map_err(|e| RuleError::Parse(format!("invalid CIDR '{value}': {e}")))?;
        }
        MatcherKind::DstPort | MatcherKind::SrcPort => {
            let port = |s: &str| {
                s.trim()
                    .parse::<u16>()
                    .map_err(|e| RuleError::Parse(format!("invalid port '{value}': {e}")))
            };
            return match value.split_once('-') {
                None => Ok(port(&value)?.to_string()),
                Some((lo, hi)) => {
                    let (lo, hi) = (port(lo)?, port(hi)?);
                    if lo > hi {
                        return Err(RuleError::Parse(format!("invalid port range '{value}'")));
                    }
                    Ok(format!("{lo}-{hi}"))
                }
            };
        }
        _ => {}
    }
    Ok(value)
}

// ========================================
// 域名列表条目
// ========================================

/// 域名列表条目的三种形态
#[derive(Debug, PartialEq, Eq)]
enum DomainPattern<'a> {
    /// `+.example.com` 或 `.example.com`：域名及其子域名
    Suffix(&'a str),
    /// 含 `*`：任意子串通配
    Wildcard(&'a str),
    /// 完整域名
    Exact(&'a str),
}

fn classify_domain_item(value: &str) -> DomainPattern<'_> {
    if value.contains('*') {
        DomainPattern::Wildcard(value)
    } else if let Some(suffix) = value.strip_prefix("+.").or_else(|| value.strip_prefix('.')) {
        DomainPattern::Suffix(suffix)
    } else {
        DomainPattern::Exact(value)
    }
}

/// 通配符转成锚定的正则：`*` -> `.*`，`?` -> `.`，开头的 `+.` 匹配零或多级子域名
fn wildcard_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    let rest = match pattern.strip_prefix("+.") {
        Some(rest) => {
            regex.push_str(r"(.+\.)?");
            rest
        }
        None => pattern,
    };
    for c in rest.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    regex
}
