//! # 规则源解析
//!
//! 把各种规则源解析成有序的 [`Matcher`] 列表：
//! - 单条规则字面量：`DOMAIN-SUFFIX,example.com`、`IP-CIDR,10.0.0.0/8,no-resolve`
//! - Clash classical 规则列表（YAML `payload` 或逐行文本）
//! - Clash ipcidr 列表（每行一个网段）
//! - 域名列表（`+.` 后缀 / `*` 通配）
//! - dnsmasq 配置（`server=/<domain>/...`）
//! - Quantumult X 规则列表（逐行文本）
//!
//! 远程文档通过 [`Fetch`] 拿到，解析器本身不做网络请求。

use std::fmt;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::kind::{self, MatcherKind};
use super::matcher::Matcher;
use crate::error::{Result, RuleError};
use crate::fetch::Fetch;

/// 文本规则列表的注释前缀
const COMMENT_BEGINS: [&str; 3] = ["#", ";", "//"];

static IPV4_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+){3}").unwrap());
static DNSMASQ_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"server=/([^/]+)/.*").unwrap());

// ========================================
// 规则源描述
// ========================================

/// 远程规则列表的格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// `payload:` 列表
    Yaml,
    /// 逐行文本
    #[default]
    Text,
}

/// 一条规则来源：字面量字符串，或者带 `type` 的结构化描述
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterSpec {
    Literal(String),
    Source(SourceSpec),
}

/// 结构化规则来源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// `clash-classical` / `clash-ipcidr` / `domain-list` / `dnsmasq` / `quantumult`
    /// 或任意已注册的规则写法
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<PayloadFormat>,
    /// 没有写 resolve 标记的规则使用的默认值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve: Option<bool>,
    /// 严格模式：对需要解析的规则，缺少 resolve 标记视为错误
    #[serde(default)]
    pub literal: bool,
    /// 单条规则的参数：`value` 或 `[value, resolve]`
    #[serde(default, alias = "arg", skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_yaml::Value>,
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSpec::Literal(s) => write!(f, "{}", s),
            FilterSpec::Source(src) => match src.url {
                Some(ref url) => write!(f, "{}({})", src.kind, url),
                None => write!(f, "{}", src.kind),
            },
        }
    }
}

impl From<&str> for FilterSpec {
    fn from(s: &str) -> Self {
        FilterSpec::Literal(s.to_string())
    }
}

// ========================================
// 入口
// ========================================

/// 把一条规则来源解析成规则列表
///
/// `for_dns` 为 true 时只保留可用于 DNS 规则的条件（域名类和进程名）。
pub fn resolve_filter(
    spec: &FilterSpec,
    fetcher: &dyn Fetch,
    for_dns: bool,
) -> Result<Vec<Matcher>> {
    let mut matchers = match spec {
        FilterSpec::Literal(literal) => vec![parse_literal(literal)?],
        FilterSpec::Source(src) => resolve_source(src, fetcher)?,
    };

    if matchers.is_empty() {
        return Err(RuleError::Empty(spec.to_string()));
    }
    debug!("parsed {} matchers from {}", matchers.len(), spec);

    if for_dns {
        matchers.retain(|m| m.kind().is_dns_compatible());
    }
    Ok(matchers)
}

fn resolve_source(src: &SourceSpec, fetcher: &dyn Fetch) -> Result<Vec<Matcher>> {
    match src.kind.as_str() {
        "clash-classical" => {
            let lines = fetch_payload(src, fetcher, None)?;
            parse_classical(&lines, src.resolve, src.literal)
        }
        "clash-ipcidr" => {
            // 先检查参数再拉取
            let resolve = src.resolve.ok_or_else(|| {
                RuleError::UnresolvedResolve(format!("clash-ipcidr list {}", url_of(src)))
            })?;
            let lines = fetch_payload(src, fetcher, None)?;
            parse_ipcidr(&lines, Some(resolve))
        }
        "domain-list" => {
            let lines = fetch_payload(src, fetcher, None)?;
            parse_domain_list(&lines)
        }
        "dnsmasq" => {
            let lines = fetch_payload(src, fetcher, Some(PayloadFormat::Text))?;
            parse_dnsmasq(&lines)
        }
        "quantumult" => {
            let lines = fetch_payload(src, fetcher, Some(PayloadFormat::Text))?;
            parse_target_list(&lines)
        }
        token => {
            let kind = kind::lookup(token)?;
            if kind == MatcherKind::Match {
                return Ok(vec![Matcher::match_all()]);
            }
            let (value, flag) = split_args(src)?;
            let kind = kind::refine(kind, token, &value);
            Ok(vec![Matcher::new(kind, value, flag.or(src.resolve))?])
        }
    }
}

fn url_of(src: &SourceSpec) -> &str {
    src.url.as_deref().unwrap_or("<missing url>")
}

/// 拉取并切分远程文档
fn fetch_payload(
    src: &SourceSpec,
    fetcher: &dyn Fetch,
    format: Option<PayloadFormat>,
) -> Result<Vec<String>> {
    let url = src
        .url
        .as_deref()
        .ok_or_else(|| RuleError::Parse(format!("`url` is required for {} filters", src.kind)))?;
    let format = format.or(src.format).unwrap_or_default();
    let content = fetcher.fetch(url)?;
    read_payload(&content, format)
}

/// 从结构化来源的 `args` 中取出取值和可选的 resolve 标记
fn split_args(src: &SourceSpec) -> Result<(String, Option<bool>)> {
    use serde_yaml::Value;

    let missing = || RuleError::Parse(format!("{} filter requires `args`", src.kind));
    match src.args.as_ref().ok_or_else(missing)? {
        Value::Sequence(items) => {
            let value = items.first().and_then(scalar_to_string).ok_or_else(missing)?;
            let flag = match items.get(1) {
                None => None,
                Some(Value::Bool(b)) => Some(*b),
                Some(other) => {
                    let text = scalar_to_string(other).unwrap_or_default();
                    Some(parse_resolve_flag(&text).ok_or_else(|| {
                        RuleError::Parse(format!("invalid resolve flag `{}` in {}", text, src.kind))
                    })?)
                }
            };
            Ok((value, flag))
        }
        other => Ok((scalar_to_string(other).ok_or_else(missing)?, None)),
    }
}

pub(crate) fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ========================================
// 文档切分
// ========================================

/// 把远程文档切成规则行
///
/// - `yaml`: 读取顶层 `payload` 列表
/// - `text`: 逐行读取，跳过空行和以 `#` / `;` / `//` 开头的注释
pub fn read_payload(content: &str, format: PayloadFormat) -> Result<Vec<String>> {
    match format {
        PayloadFormat::Yaml => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;
            let payload = yaml
                .get("payload")
                .and_then(|v| v.as_sequence())
                .ok_or_else(|| RuleError::Parse("missing 'payload' sequence in YAML".into()))?;
            payload
                .iter()
                .map(|item| {
                    scalar_to_string(item)
                        .map(|s| s.trim().to_string())
                        .ok_or_else(|| RuleError::Parse("payload entry must be a string".into()))
                })
                .collect()
        }
        PayloadFormat::Text => Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter(|line| !COMMENT_BEGINS.iter().any(|c| line.starts_with(c)))
            .map(str::to_string)
            .collect()),
    }
}

// ========================================
// 各格式解析器
// ========================================

/// 解析单条规则字面量：`<type>,<value>[,resolve|no-resolve]` 或 `<type>`
///
/// 没有 resolve 标记时 `resolve` 保持为空，由调用方决定。
pub fn parse_literal(literal: &str) -> Result<Matcher> {
    let fields: Vec<&str> = literal.split(',').map(str::trim).collect();
    let kind = kind::lookup(fields[0])?;
    let args = &fields[1..];

    if kind == MatcherKind::Match {
        if !args.is_empty() {
            return Err(RuleError::Parse(format!(
                "{} rule does not take a value: {}",
                fields[0], literal
            )));
        }
        return Ok(Matcher::match_all());
    }

    let resolve = match args {
        [] => {
            return Err(RuleError::Parse(format!("missing value in rule: {literal}")));
        }
        [_] => None,
        [_, flag] => Some(parse_resolve_flag(flag).ok_or_else(|| {
            RuleError::Parse(format!(
                "cannot parse the last part ({flag}) of rule {literal}, \
                 expect either `no-resolve` or `resolve`"
            ))
        })?),
        _ => {
            return Err(RuleError::Parse(format!("too many fields in rule: {literal}")));
        }
    };

    Matcher::new(kind::refine(kind, fields[0], args[0]), args[0], resolve)
}

/// 解析 Clash classical 规则行
///
/// 每行格式为 `<type>,<value>[,...][,no-resolve|resolve]`，中间的策略名等字段忽略。
/// 行尾带 resolve 标记时以标记为准，否则使用 `default_resolve`。
/// `literal` 为 true 时不使用默认值：需要解析的规则缺少标记即报错。
pub fn parse_classical(
    lines: &[String],
    default_resolve: Option<bool>,
    literal: bool,
) -> Result<Vec<Matcher>> {
    let fallback = if literal { None } else { default_resolve };
    let mut matchers = Vec::with_capacity(lines.len());

    for line in lines {
        let matcher = parse_rule_line(line, fallback)?;
        if literal && matcher.kind().may_require_resolution() && matcher.resolve().is_none() {
            return Err(RuleError::UnresolvedResolve(line.clone()));
        }
        matchers.push(matcher);
    }

    Ok(matchers)
}

/// 解析 Quantumult X 规则列表（`host-suffix, example.com, proxy` 等）
///
/// 与 classical 解析相同，但不做 resolve 默认值填充。
pub fn parse_target_list(lines: &[String]) -> Result<Vec<Matcher>> {
    lines.iter().map(|line| parse_rule_line(line, None)).collect()
}

fn parse_rule_line(line: &str, fallback: Option<bool>) -> Result<Matcher> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let kind = kind::lookup(fields[0])?;

    if kind == MatcherKind::Match {
        return Ok(Matcher::match_all());
    }

    let args = &fields[1..];
    let value = args
        .first()
        .ok_or_else(|| RuleError::Parse(format!("got unparsable rule {line}")))?;
    let flag = if args.len() > 1 {
        args.last().and_then(|last| parse_resolve_flag(last))
    } else {
        None
    };

    Matcher::new(kind::refine(kind, fields[0], value), *value, flag.or(fallback))
}

/// 解析 Clash ipcidr 列表：每行一个网段，按是否形如 `a.b.c.d` 区分 IPv4 / IPv6
pub fn parse_ipcidr(lines: &[String], resolve: Option<bool>) -> Result<Vec<Matcher>> {
    let resolve =
        resolve.ok_or_else(|| RuleError::UnresolvedResolve("clash-ipcidr list".to_string()))?;
    let mut matchers = Vec::with_capacity(lines.len());

    for line in lines {
        let kind = if IPV4_RE.is_match(line) {
            line.parse::<ipnet::Ipv4Net>()
                .map_err(|_| RuleError::AmbiguousIpFamily(line.clone()))?;
            MatcherKind::IpCidr
        } else {
            line.parse::<ipnet::Ipv6Net>()
                .map_err(|_| RuleError::AmbiguousIpFamily(line.clone()))?;
            MatcherKind::IpCidr6
        };
        matchers.push(Matcher::new(kind, line.as_str(), Some(resolve))?);
    }

    Ok(matchers)
}

/// 解析域名列表：条目原样保存，渲染时再按 `+.` / `*` 拆分
pub fn parse_domain_list(lines: &[String]) -> Result<Vec<Matcher>> {
    lines.iter().map(|line| Matcher::domain_list_item(line.as_str())).collect()
}

/// 解析 dnsmasq 配置：`server=/<domain>/...` 转为域名后缀，其他行忽略
pub fn parse_dnsmasq(lines: &[String]) -> Result<Vec<Matcher>> {
    lines
        .iter()
        .filter_map(|line| DNSMASQ_RE.captures(line))
        .map(|caps| Matcher::new(MatcherKind::DomainSuffix, &caps[1], None))
        .collect()
}

fn parse_resolve_flag(flag: &str) -> Option<bool> {
    match flag.to_lowercase().as_str() {
        "no-resolve" => Some(false),
        "resolve" => Some(true),
        _ => None,
    }
}

// ========================================
// 测试模块
// ========================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;

    fn lines(content: &str) -> Vec<String> {
        read_payload(content, PayloadFormat::Text).unwrap()
    }

    #[test]
    fn test_parse_literal() {
        let m = parse_literal("IP-CIDR,10.0.0.0/8,no-resolve").unwrap();
        assert_eq!(m.kind(), MatcherKind::IpCidr);
        assert_eq!(m.value(), Some("10.0.0.0/8"));
        assert_eq!(m.resolve(), Some(false));

        let m = parse_literal("DOMAIN-SUFFIX,example.com").unwrap();
        assert_eq!(m.kind(), MatcherKind::DomainSuffix);
        assert_eq!(m.resolve(), None);

        let m = parse_literal("GEOIP,CN,resolve").unwrap();
        assert_eq!(m.resolve(), Some(true));

        assert_eq!(parse_literal("MATCH").unwrap(), Matcher::match_all());
    }

    #[test]
    fn test_parse_literal_errors() {
        assert!(matches!(
            parse_literal("IP-CIDR,10.0.0.0/8,PROXY"),
            Err(RuleError::Parse(_))
        ));
        assert!(matches!(parse_literal("DOMAIN"), Err(RuleError::Parse(_))));
        assert!(matches!(parse_literal("MATCH,PROXY"), Err(RuleError::Parse(_))));
        assert!(matches!(parse_literal("IP-ASN,13335"), Err(RuleError::UnknownKind(_))));
    }

    #[test]
    fn test_parse_literal_ip_family() {
        let err = parse_literal("IP-CIDR,2001:db8::/32,no-resolve").unwrap_err();
        assert!(matches!(err, RuleError::AmbiguousIpFamily(_)));
        let err = parse_literal("IP-CIDR6,10.0.0.0/8,no-resolve").unwrap_err();
        assert!(matches!(err, RuleError::AmbiguousIpFamily(_)));

        let m = parse_literal("ip_cidr,2001:db8::/32,no-resolve").unwrap();
        assert_eq!(m.kind(), MatcherKind::IpCidr6);
        let m = parse_literal("ip_cidr,10.0.0.0/8,no-resolve").unwrap();
        assert_eq!(m.kind(), MatcherKind::IpCidr);
    }

    #[test]
    fn test_read_payload_text_skips_comments() {
        let content = "# comment\n; another\n// third\n\n  DOMAIN,a.com  \nDOMAIN,b.com\n";
        assert_eq!(lines(content), vec!["DOMAIN,a.com", "DOMAIN,b.com"]);
    }

    #[test]
    fn test_read_payload_yaml() {
        let yaml = "payload:\n  - DOMAIN-SUFFIX,google.com\n  - ' IP-CIDR,1.1.1.0/24 '\n";
        let payload = read_payload(yaml, PayloadFormat::Yaml).unwrap();
        assert_eq!(payload, vec!["DOMAIN-SUFFIX,google.com", "IP-CIDR,1.1.1.0/24"]);

        assert!(read_payload("something_else: true", PayloadFormat::Yaml).is_err());
    }

    #[test]
    fn test_parse_classical_default_resolve() {
        let content = r#"
DOMAIN-SUFFIX,google.com,Proxy
IP-CIDR,192.168.0.0/16,DIRECT,no-resolve
IP-CIDR,10.0.0.0/8
GEOIP,CN,resolve
"#;
        let matchers = parse_classical(&lines(content), Some(true), false).unwrap();
        assert_eq!(matchers.len(), 4);
        assert_eq!(matchers[0].kind(), MatcherKind::DomainSuffix);
        assert_eq!(matchers[0].value(), Some("google.com"));
        assert_eq!(matchers[1].resolve(), Some(false));
        assert_eq!(matchers[2].resolve(), Some(true));
        assert_eq!(matchers[3].resolve(), Some(true));
    }

    #[test]
    fn test_parse_classical_literal_mode() {
        let ok = lines("IP-CIDR,10.0.0.0/8,no-resolve\nDOMAIN,a.com");
        let matchers = parse_classical(&ok, Some(true), true).unwrap();
        assert_eq!(matchers[0].resolve(), Some(false));

        let missing = lines("DOMAIN,a.com\nIP-CIDR,10.0.0.0/8");
        let err = parse_classical(&missing, Some(true), true).unwrap_err();
        assert!(matches!(err, RuleError::UnresolvedResolve(l) if l == "IP-CIDR,10.0.0.0/8"));
    }

    #[test]
    fn test_parse_classical_unparsable() {
        assert!(parse_classical(&lines("DOMAIN"), None, false).is_err());
        assert!(parse_classical(&lines("UNKNOWN,example.com"), None, false).is_err());
    }

    #[test]
    fn test_parse_ipcidr() {
        let content = "192.168.1.0/24\n10.0.0.0/8\n2001:db8::/32\n";
        let matchers = parse_ipcidr(&lines(content), Some(false)).unwrap();
        assert_eq!(matchers.len(), 3);
        assert_eq!(matchers[0].kind(), MatcherKind::IpCidr);
        assert_eq!(matchers[1].kind(), MatcherKind::IpCidr);
        assert_eq!(matchers[2].kind(), MatcherKind::IpCidr6);
        assert!(matchers.iter().all(|m| m.resolve() == Some(false)));
    }

    #[test]
    fn test_parse_ipcidr_requires_resolve() {
        let err = parse_ipcidr(&lines("10.0.0.0/8"), None).unwrap_err();
        assert!(matches!(err, RuleError::UnresolvedResolve(_)));
    }

    #[test]
    fn test_parse_ipcidr_ambiguous_family() {
        let err = parse_ipcidr(&lines("::ffff:1.2.3.4/128"), Some(true)).unwrap_err();
        assert!(matches!(err, RuleError::AmbiguousIpFamily(_)));
        let err = parse_ipcidr(&lines("not-an-ip"), Some(true)).unwrap_err();
        assert!(matches!(err, RuleError::AmbiguousIpFamily(_)));
    }

    #[test]
    fn test_parse_domain_list() {
        let matchers = parse_domain_list(&lines("+.example.com\n*.example.*\nfoo.com")).unwrap();
        assert_eq!(matchers.len(), 3);
        assert!(matchers.iter().all(|m| m.kind() == MatcherKind::DomainListItem));
        assert_eq!(matchers[0].value(), Some("+.example.com"));
    }

    #[test]
    fn test_parse_dnsmasq() {
        let content = r#"
server=/baidu.com/114.114.114.114
server=/qq.com/114.114.114.114
ipset=/example.com/gfwlist
"#;
        let matchers = parse_dnsmasq(&lines(content)).unwrap();
        assert_eq!(matchers.len(), 2);
        assert_eq!(matchers[0].kind(), MatcherKind::DomainSuffix);
        assert_eq!(matchers[1].value(), Some("qq.com"));
    }

    #[test]
    fn test_parse_target_list() {
        let content = "host-suffix, example.com, proxy\nip-cidr, 10.0.0.0/8, direct\nip6-cidr, 2001:db8::/32, direct, no-resolve";
        let matchers = parse_target_list(&lines(content)).unwrap();
        assert_eq!(matchers[0].kind(), MatcherKind::DomainSuffix);
        assert_eq!(matchers[1].kind(), MatcherKind::IpCidr);
        assert_eq!(matchers[1].resolve(), None);
        assert_eq!(matchers[2].resolve(), Some(false));
    }

    #[test]
    fn test_resolve_filter_sources() {
        let fetcher = MemoryFetcher::new()
            .with(
                "https://rules/classical.yaml",
                "payload:\n  - DOMAIN,a.com\n  - IP-CIDR,1.0.0.0/8\n",
            )
            .with("https://rules/cn.txt", "1.0.1.0/24\n1.0.2.0/23\n")
            .with("https://rules/dnsmasq.conf", "server=/cn.example/1.1.1.1\n");

        let spec: FilterSpec = serde_yaml::from_str(
            "{type: clash-classical, url: 'https://rules/classical.yaml', format: yaml, resolve: false}",
        )
        .unwrap();
        let matchers = resolve_filter(&spec, &fetcher, false).unwrap();
        assert_eq!(matchers.len(), 2);
        assert_eq!(matchers[1].resolve(), Some(false));

        let spec: FilterSpec = serde_yaml::from_str(
            "{type: clash-ipcidr, url: 'https://rules/cn.txt', resolve: true}",
        )
        .unwrap();
        assert_eq!(resolve_filter(&spec, &fetcher, false).unwrap().len(), 2);

        let spec: FilterSpec =
            serde_yaml::from_str("{type: dnsmasq, url: 'https://rules/dnsmasq.conf'}").unwrap();
        assert_eq!(resolve_filter(&spec, &fetcher, false).unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_filter_token_with_args() {
        let fetcher = MemoryFetcher::new();
        let spec: FilterSpec =
            serde_yaml::from_str("{type: IP-CIDR, args: [10.0.0.0/8, false]}").unwrap();
        let matchers = resolve_filter(&spec, &fetcher, false).unwrap();
        assert_eq!(matchers[0].resolve(), Some(false));

        let spec: FilterSpec = serde_yaml::from_str("{type: DST-PORT, arg: 443}").unwrap();
        let matchers = resolve_filter(&spec, &fetcher, false).unwrap();
        assert_eq!(matchers[0].value(), Some("443"));

        let spec: FilterSpec = serde_yaml::from_str("{type: MATCH}").unwrap();
        assert_eq!(resolve_filter(&spec, &fetcher, false).unwrap()[0], Matcher::match_all());
    }

    #[test]
    fn test_resolve_filter_empty_result() {
        let fetcher = MemoryFetcher::new()
            .with("https://rules/empty.conf", "# nothing here\nipset=/a.com/x\n");
        let spec: FilterSpec =
            serde_yaml::from_str("{type: dnsmasq, url: 'https://rules/empty.conf'}").unwrap();
        let err = resolve_filter(&spec, &fetcher, false).unwrap_err();
        assert!(matches!(err, RuleError::Empty(_)));
    }

    #[test]
    fn test_resolve_filter_ipcidr_checks_resolve_before_fetch() {
        // 没有对应文档：若先拉取会得到 Fetch 错误
        let fetcher = MemoryFetcher::new();
        let spec: FilterSpec =
            serde_yaml::from_str("{type: clash-ipcidr, url: 'https://rules/cn.txt'}").unwrap();
        let err = resolve_filter(&spec, &fetcher, false).unwrap_err();
        assert!(matches!(err, RuleError::UnresolvedResolve(_)));
    }

    #[test]
    fn test_resolve_filter_for_dns() {
        let fetcher = MemoryFetcher::new().with(
            "https://rules/mixed.list",
            "DOMAIN,a.com\nIP-CIDR,10.0.0.0/8,no-resolve\nPROCESS-NAME,curl\n",
        );
        let spec: FilterSpec =
            serde_yaml::from_str("{type: clash-classical, url: 'https://rules/mixed.list'}")
                .unwrap();
        let matchers = resolve_filter(&spec, &fetcher, true).unwrap();
        let kinds: Vec<_> = matchers.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec![MatcherKind::Domain, MatcherKind::ProcessName]);
    }

    #[test]
    fn test_fetch_error_propagates() {
        let fetcher = MemoryFetcher::new();
        let spec: FilterSpec =
            serde_yaml::from_str("{type: domain-list, url: 'https://rules/missing.txt'}").unwrap();
        assert!(matches!(
            resolve_filter(&spec, &fetcher, false),
            Err(RuleError::Fetch(_))
        ));
    }
}
