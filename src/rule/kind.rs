//! # 规则类型注册表
//!
//! 三种目标客户端对同一种规则有各自的写法，例如域名后缀在 Clash 里是
//! `DOMAIN-SUFFIX`，在 Quantumult X 里是 `host-suffix`，在 sing-box 里是
//! `domain_suffix`。这里把所有写法映射到同一个 [`MatcherKind`]。
//!
//! 注册表在第一次使用时从 [`MatcherKind::ALL`] 构建，之后只读。

use std::collections::HashMap;
use std::fmt;

use ipnet::Ipv6Net;
use log::debug;
use once_cell::sync::Lazy;

use super::formatter::OutputFormat;
use crate::error::{Result, RuleError};

// ========================================
// 规则类型
// ========================================

/// 规则类型（中间表示的标签）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatcherKind {
    /// 进程名
    ProcessName,
    /// Android 包名
    PackageName,
    /// 完整域名
    Domain,
    /// 域名后缀
    DomainSuffix,
    /// 域名关键字
    DomainKeyword,
    /// 域名正则
    DomainRegex,
    /// 域名通配符（`*` 匹配任意字符）
    DomainWildcard,
    /// 域名列表条目（`+.` 后缀 / `*` 通配 / 完整域名，渲染时再拆分）
    DomainListItem,
    /// GeoIP 国家代码
    GeoIp,
    /// IPv4 网段
    IpCidr,
    /// IPv6 网段
    IpCidr6,
    /// 源 IP 网段
    SrcIpCidr,
    /// 源端口
    SrcPort,
    /// 目标端口
    DstPort,
    /// HTTP User-Agent
    UserAgent,
    /// 兜底规则
    Match,
}

impl MatcherKind {
    /// 注册顺序：同一个归一化写法先注册者优先
    pub const ALL: [MatcherKind; 16] = [
        MatcherKind::ProcessName,
        MatcherKind::PackageName,
        MatcherKind::Domain,
        MatcherKind::DomainSuffix,
        MatcherKind::DomainKeyword,
        MatcherKind::DomainRegex,
        MatcherKind::DomainWildcard,
        MatcherKind::DomainListItem,
        MatcherKind::GeoIp,
        MatcherKind::IpCidr,
        MatcherKind::IpCidr6,
        MatcherKind::SrcIpCidr,
        MatcherKind::SrcPort,
        MatcherKind::DstPort,
        MatcherKind::UserAgent,
        MatcherKind::Match,
    ];

    /// Clash 写法
    pub fn clash(self) -> Option<&'static str> {
        match self {
            MatcherKind::ProcessName => Some("PROCESS-NAME"),
            MatcherKind::PackageName => None,
            MatcherKind::Domain => Some("DOMAIN"),
            MatcherKind::DomainSuffix => Some("DOMAIN-SUFFIX"),
            MatcherKind::DomainKeyword => Some("DOMAIN-KEYWORD"),
            MatcherKind::DomainRegex => Some("DOMAIN-REGEX"),
            MatcherKind::DomainWildcard => Some("DOMAIN-WILDCARD"),
            MatcherKind::DomainListItem => None,
            MatcherKind::GeoIp => Some("GEOIP"),
            MatcherKind::IpCidr => Some("IP-CIDR"),
            MatcherKind::IpCidr6 => Some("IP-CIDR6"),
            MatcherKind::SrcIpCidr => Some("SRC-IP-CIDR"),
            MatcherKind::SrcPort => Some("SRC-PORT"),
            MatcherKind::DstPort => Some("DST-PORT"),
            MatcherKind::UserAgent => None,
            MatcherKind::Match => Some("MATCH"),
        }
    }

    /// Quantumult X 写法
    pub fn quantumult(self) -> Option<&'static str> {
        match self {
            MatcherKind::Domain => Some("host"),
            MatcherKind::DomainSuffix => Some("host-suffix"),
            MatcherKind::DomainKeyword => Some("host-keyword"),
            MatcherKind::DomainWildcard => Some("host-wildcard"),
            MatcherKind::GeoIp => Some("geoip"),
            MatcherKind::IpCidr => Some("ip-cidr"),
            MatcherKind::IpCidr6 => Some("ip6-cidr"),
            MatcherKind::UserAgent => Some("user-agent"),
            MatcherKind::Match => Some("final"),
            MatcherKind::ProcessName
            | MatcherKind::PackageName
            | MatcherKind::DomainRegex
            | MatcherKind::DomainListItem
            | MatcherKind::SrcIpCidr
            | MatcherKind::SrcPort
            | MatcherKind::DstPort => None,
        }
    }

    /// sing-box 规则字段名
    ///
    /// 端口类规则在取值为范围时会改用 `*_range` 字段，见 `Matcher::sing_box_field`。
    pub fn sing_box(self) -> Option<&'static str> {
        match self {
            MatcherKind::ProcessName => Some("process_name"),
            MatcherKind::PackageName => Some("package_name"),
            MatcherKind::Domain => Some("domain"),
            MatcherKind::DomainSuffix => Some("domain_suffix"),
            MatcherKind::DomainKeyword => Some("domain_keyword"),
            MatcherKind::DomainRegex => Some("domain_regex"),
            MatcherKind::DomainWildcard => Some("domain_regex"),
            MatcherKind::IpCidr | MatcherKind::IpCidr6 => Some("ip_cidr"),
            MatcherKind::SrcIpCidr => Some("source_ip_cidr"),
            MatcherKind::SrcPort => Some("source_port"),
            MatcherKind::DstPort => Some("port"),
            MatcherKind::DomainListItem
            | MatcherKind::GeoIp
            | MatcherKind::UserAgent
            | MatcherKind::Match => None,
        }
    }

    /// 指定目标客户端下的写法
    pub fn spelling(self, format: OutputFormat) -> Option<&'static str> {
        match format {
            OutputFormat::Clash => self.clash(),
            OutputFormat::QuantumultX => self.quantumult(),
            OutputFormat::SingBox => self.sing_box(),
        }
    }

    /// 该规则是否可能触发域名解析（需要显式指定 resolve / no-resolve）
    pub fn may_require_resolution(self) -> bool {
        matches!(
            self,
            MatcherKind::GeoIp | MatcherKind::IpCidr | MatcherKind::IpCidr6 | MatcherKind::Match
        )
    }

    /// 进程身份类规则
    pub fn is_process(self) -> bool {
        matches!(self, MatcherKind::ProcessName | MatcherKind::PackageName)
    }

    /// 是否可用于 DNS 规则
    pub fn is_dns_compatible(self) -> bool {
        matches!(
            self,
            MatcherKind::Domain
                | MatcherKind::DomainSuffix
                | MatcherKind::DomainKeyword
                | MatcherKind::DomainRegex
                | MatcherKind::DomainWildcard
                | MatcherKind::DomainListItem
                | MatcherKind::ProcessName
        )
    }

    /// 是否有取值（只有兜底规则没有）
    pub fn has_value(self) -> bool {
        !matches!(self, MatcherKind::Match)
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ========================================
// 注册表
// ========================================

/// 写法 -> 规则类型 的查找表
#[derive(Debug, Default)]
pub struct Registry {
    table: HashMap<String, MatcherKind>,
}

impl Registry {
    /// 构建包含全部规则类型的注册表
    pub fn build() -> Self {
        let mut registry = Self::default();
        for kind in MatcherKind::ALL {
            registry.register(kind);
        }
        registry
    }

    /// 注册一个规则类型的全部写法
    ///
    /// 重复注册是幂等的；同一个归一化写法已被别的类型占用时保留先注册者。
    pub fn register(&mut self, kind: MatcherKind) {
        let spellings = [kind.clash(), kind.quantumult(), kind.sing_box()];
        for spelling in spellings.into_iter().flatten() {
            let key = normalize(spelling);
            match self.table.get(&key) {
                Some(existing) if *existing != kind => {
                    debug!("{} is already registered as {}, skip for {}", spelling, existing, kind);
                }
                Some(_) => {}
                None => {
                    self.table.insert(key, kind);
                }
            }
        }
    }

    /// 查找写法对应的规则类型
    pub fn lookup(&self, token: &str) -> Result<MatcherKind> {
        self.table
            .get(&normalize(token))
            .copied()
            .ok_or_else(|| RuleError::UnknownKind(token.to_string()))
    }

    pub fn contains(&self, token: &str) -> bool {
        self.table.contains_key(&normalize(token))
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::build);

/// 在全局注册表中查找规则类型
pub fn lookup(token: &str) -> Result<MatcherKind> {
    REGISTRY.lookup(token)
}

/// 按取值修正查找结果：sing-box 的 `ip_cidr` 同时用于 IPv4 和 IPv6
pub fn refine(kind: MatcherKind, token: &str, value: &str) -> MatcherKind {
    let shared = MatcherKind::IpCidr.sing_box().unwrap_or_default();
    if kind == MatcherKind::IpCidr
        && token.trim().eq_ignore_ascii_case(shared)
        && value.trim().parse::<Ipv6Net>().is_ok()
    {
        MatcherKind::IpCidr6
    } else {
        kind
    }
}

/// 判断 sing-box 规则对象中的字段是否为匹配条件字段
pub fn is_matcher_key(key: &str) -> bool {
    // 端口范围字段不在注册表里（它们只是端口规则的另一种取值形态）
    matches!(key, "port_range" | "source_port_range") || REGISTRY.contains(key)
}

/// 归一化：转小写并按 `-` / `_` 切分
fn normalize(token: &str) -> String {
    token
        .trim()
        .to_lowercase()
        .split(|c| c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
