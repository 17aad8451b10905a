//! # 规则格式化器
//!
//! 把路由规则渲染成行格式的目标配置（Clash、Quantumult X）。
//! sing-box 使用 JSON 规则对象，见 `crate::sing_box`。
//!
//! ## 渲染顺序
//! 目标客户端自上而下匹配规则，只有遇到需要 IP 的规则才会解析域名。
//! 因此所有不需要解析的规则都排在需要解析的规则之前，之后再按
//! `写法,取值` 去重（保留第一次出现的规则）。

use std::collections::HashSet;
use std::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::kind::MatcherKind;
use super::matcher::Matcher;
use super::parser::scalar_to_string;
use super::route::{Destination, RouteRule};
use crate::error::Result;

// ========================================
// 输出格式
// ========================================

/// 目标客户端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Clash / mihomo (YAML)
    #[value(name = "clash")]
    #[serde(rename = "clash")]
    Clash,
    /// Quantumult X (行格式)
    #[value(name = "quantumult")]
    #[serde(rename = "quantumult")]
    QuantumultX,
    /// sing-box (JSON)
    #[value(name = "sing-box")]
    #[serde(rename = "sing-box")]
    SingBox,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Clash => write!(f, "clash"),
            OutputFormat::QuantumultX => write!(f, "quantumult"),
            OutputFormat::SingBox => write!(f, "sing-box"),
        }
    }
}

// ========================================
// 渲染结果
// ========================================

/// 行格式渲染结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenderedRules {
    /// 最终规则行（已排序、去重）
    pub lines: Vec<String>,
    /// 被去掉的重复规则数
    pub duplicates: usize,
    /// 目标不支持而被丢弃的条件数
    pub unsupported: usize,
}

/// 行格式规则格式化 trait
pub trait LineFormatter {
    /// 目标客户端
    fn format(&self) -> OutputFormat;

    /// 去向在目标配置中的写法
    fn destination_name(&self, destination: &Destination) -> String;

    /// 渲染单个条件，返回 `(去重键, 规则行)`
    ///
    /// 去向插在末尾的 `no-resolve` 之前，否则追加在最后。
    fn format_matcher(
        &self,
        matcher: &Matcher,
        destination: &Destination,
    ) -> Result<(String, String)> {
        let mut fields = matcher.line_fields(self.format())?;
        let key = match fields.iter().position(|f| f == "no-resolve") {
            Some(pos) => fields[..pos].join(","),
            None => fields.join(","),
        };

        let name = self.destination_name(destination);
        if fields.last().map(String::as_str) == Some("no-resolve") {
            let pos = fields.len() - 1;
            fields.insert(pos, name);
        } else {
            fields.push(name);
        }

        Ok((key, fields.join(",")))
    }

    /// 渲染整组路由规则：先不需解析、后需解析，兜底规则最后，然后去重
    fn format_rules(&self, rules: &[RouteRule]) -> Result<RenderedRules> {
        let mut no_resolve = Vec::new();
        let mut resolve = Vec::new();
        let mut fallback = Vec::new();
        let mut unsupported = 0;

        for rule in rules {
            for matcher in &rule.matchers {
                match self.format_matcher(matcher, &rule.destination) {
                    Ok(entry) if matcher.kind() == MatcherKind::Match => fallback.push(entry),
                    Ok(entry) if matcher.requires_resolution() => resolve.push(entry),
                    Ok(entry) => no_resolve.push(entry),
                    Err(e) if e.is_unsupported() => {
                        warn!("skip `{}` for {}: {}", matcher, rule.destination, e);
                        unsupported += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let mut seen = HashSet::new();
        let mut lines = Vec::with_capacity(no_resolve.len() + resolve.len() + 1);
        let mut duplicates = 0;
        for (key, line) in no_resolve.into_iter().chain(resolve).chain(fallback) {
            if seen.insert(key) {
                lines.push(line);
            } else {
                duplicates += 1;
            }
        }

        if duplicates > 0 {
            info!("Filtered out {} duplications in {} rules.", duplicates, self.format());
        }

        Ok(RenderedRules {
            lines,
            duplicates,
            unsupported,
        })
    }

    /// 规则文件扩展名
    fn file_extension(&self) -> &'static str;

    /// 生成完整的配置文件内容
    fn generate_file_content(&self, header: &str, rendered: &RenderedRules) -> Result<String>;
}

// ========================================
// Clash 格式化器
// ========================================

/// Clash 格式化器
///
/// `options` 是原样写入配置顶层的其他字段（`port`、`proxies`、`proxy-groups` 等）。
#[derive(Debug, Default)]
pub struct ClashFormatter {
    pub options: serde_yaml::Mapping,
}

impl LineFormatter for ClashFormatter {
    fn format(&self) -> OutputFormat {
        OutputFormat::Clash
    }

    fn destination_name(&self, destination: &Destination) -> String {
        match destination {
            Destination::Outbound(name) => name.clone(),
            Destination::Reject => "REJECT".to_string(),
        }
    }

    fn file_extension(&self) -> &'static str {
        "yaml"
    }

    fn generate_file_content(&self, header: &str, rendered: &RenderedRules) -> Result<String> {
        let mut conf = self.options.clone();
        if conf.remove("rules").is_some() {
            warn!("`rules` in clash options is overwritten by generated rules");
        }
        let rules = rendered
            .lines
            .iter()
            .cloned()
            .map(serde_yaml::Value::String)
            .collect();
        conf.insert("rules".into(), serde_yaml::Value::Sequence(rules));

        let body = serde_yaml::to_string(&conf)?;
        Ok(format!("{}\n{}", header, body))
    }
}

// ========================================
// Quantumult X 格式化器
// ========================================

/// Quantumult X 必须存在的配置段
const QUANTUMULT_SECTIONS: [&str; 11] = [
    "general",
    "dns",
    "policy",
    "server_local",
    "server_remote",
    "filter_local",
    "filter_remote",
    "rewrite_local",
    "rewrite_remote",
    "task_local",
    "mitm",
];

/// Quantumult X 格式化器
///
/// `sections` 按顺序写出：映射写成 `key=value`（列表以逗号连接），
/// 列表逐行原样写出，空值只写段名。`[filter_local]` 由生成的规则填充。
#[derive(Debug, Default)]
pub struct QuantumultFormatter {
    pub sections: serde_yaml::Mapping,
}

impl LineFormatter for QuantumultFormatter {
    fn format(&self) -> OutputFormat {
        OutputFormat::QuantumultX
    }

    fn destination_name(&self, destination: &Destination) -> String {
        match destination {
            Destination::Outbound(name) => name.clone(),
            Destination::Reject => "reject".to_string(),
        }
    }

    fn file_extension(&self) -> &'static str {
        "conf"
    }

    fn generate_file_content(&self, header: &str, rendered: &RenderedRules) -> Result<String> {
        use serde_yaml::Value;

        let mut content = format!("{}\n", header);
        let mut written = HashSet::new();

        for (name, section) in &self.sections {
            let name = scalar_to_string(name).unwrap_or_default();
            if name == "filter_local" {
                warn!("`filter_local` in quantumult sections is overwritten by generated rules");
                continue;
            }
            content.push_str(&format!("[{}]\n", name));
            match section {
                Value::Mapping(entries) => {
                    for (k, v) in entries {
                        let v = match v {
                            Value::Sequence(items) => items
                                .iter()
                                .filter_map(scalar_to_string)
                                .collect::<Vec<_>>()
                                .join(","),
                            other => scalar_to_string(other).unwrap_or_default(),
                        };
                        let k = scalar_to_string(k).unwrap_or_default();
                        content.push_str(&format!("{}={}\n", k, v));
                    }
                }
                Value::Sequence(lines) => {
                    for line in lines.iter().filter_map(scalar_to_string) {
                        content.push_str(&line);
                        content.push('\n');
                    }
                }
                _ => {}
            }
            written.insert(name);
        }

        content.push_str("[filter_local]\n");
        for line in &rendered.lines {
            content.push_str(line);
            content.push('\n');
        }
        written.insert("filter_local".to_string());

        for section in QUANTUMULT_SECTIONS {
            if !written.contains(section) {
                content.push_str(&format!("[{}]\n", section));
            }
        }

        Ok(content)
    }
}

/// 根据格式类型创建行格式化器（sing-box 不是行格式，返回 None）
pub fn create_formatter(format: OutputFormat) -> Option<Box<dyn LineFormatter>> {
    match format {
        OutputFormat::Clash => Some(Box::new(ClashFormatter::default())),
        OutputFormat::QuantumultX => Some(Box::new(QuantumultFormatter::default())),
        OutputFormat::SingBox => None,
    }
}
