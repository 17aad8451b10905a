//! # 生成配置
//!
//! 一个 YAML 文件描述一次生成：
//!
//! ```yaml
//! destinations: [Streaming, 🇯🇵 Japan]     # 除 PROXY / DIRECT / REJECT 外的去向
//! rules:
//!   - destination: Streaming
//!     filters:
//!       - DOMAIN-SUFFIX,netflix.com
//!       - {type: clash-classical, url: https://example.com/stream.yaml, format: yaml, resolve: false}
//! targets:
//!   - name: clash
//!     type: clash
//!     options: {mode: rule}                  # 原样写入的其他字段
//!   - name: quantumult
//!     type: quantumult
//!     options: {general: {...}, policy: [...]}
//!   - name: sing-box
//!     type: sing-box
//!     options: {dns: {...}, route: {...}}    # JSON 模板
//!     sing_box:
//!       split_dst_ip: true
//!       rule_set: {enabled: true, base_url: https://example.com/rule-set/}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::rule::formatter::OutputFormat;
use crate::rule::kind::{self, MatcherKind};
use crate::rule::parser::FilterSpec;
use crate::rule::route::Destination;
use crate::sing_box::compiler::DEFAULT_BINARY;
use crate::sing_box::rule::LogicalMode;
use crate::sing_box::rule_set::DEFAULT_MIN_SIZE;

/// Quantumult X 内置了名为 PROXY 的策略，规则中的 PROXY 需要改名
pub const QUANTUMULT_PROXY_NAME: &str = "PROXY-PER-REGION";

// ========================================
// 顶层配置
// ========================================

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateConfig {
    /// 额外的去向名（代理、策略组）
    #[serde(default)]
    pub destinations: Vec<String>,
    /// 路由规则，按顺序输出
    pub rules: Vec<RuleConfig>,
    /// 输出目标
    pub targets: Vec<TargetConfig>,
}

impl GenerateConfig {
    /// 从 YAML 文件读取
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// 一条路由规则
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub destination: Destination,
    pub filters: Vec<FilterSpec>,
}

// ========================================
// 输出目标
// ========================================

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub format: OutputFormat,
    /// 输出文件名，缺省为 `<name>.<扩展名>`
    #[serde(default)]
    pub file: Option<String>,
    /// 去向改名：占位名 -> 目标中的实际名称
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
    /// 原样写入目标配置的内容：
    /// Clash 为顶层字段，Quantumult X 为配置段，sing-box 为 JSON 模板
    #[serde(default)]
    pub options: serde_yaml::Mapping,
    #[serde(default)]
    pub sing_box: SingBoxOptions,
}

impl TargetConfig {
    /// 实际生效的改名表（Quantumult X 默认把 PROXY 改为 PROXY-PER-REGION）
    pub fn effective_renames(&self) -> BTreeMap<String, String> {
        let mut renames = self.renames.clone();
        if self.format == OutputFormat::QuantumultX {
            renames
                .entry("PROXY".to_string())
                .or_insert_with(|| QUANTUMULT_PROXY_NAME.to_string());
        }
        renames
    }
}

// ========================================
// sing-box 选项
// ========================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SingBoxOptions {
    /// 保留的进程类条件（`PROCESS-NAME` / `package_name` 等写法），缺省全部丢弃
    pub included_process_kinds: Option<Vec<String>>,
    /// 进程组与其他条件的组合方式
    pub process_mode: LogicalMode,
    /// 把目标 IP 规则排到所有规则之后
    pub split_dst_ip: bool,
    pub rule_set: RuleSetOptions,
}

impl SingBoxOptions {
    /// 解析保留的进程类条件
    pub fn process_kinds(&self) -> crate::error::Result<Option<Vec<MatcherKind>>> {
        self.included_process_kinds
            .as_ref()
            .map(|tokens| {
                tokens
                    .iter()
                    .map(|t| kind::lookup(t))
                    .collect::<crate::error::Result<Vec<_>>>()
            })
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleSetOptions {
    #[serde(default)]
    pub enabled: bool,
    /// 提取阈值
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    /// 发布 `.srs` 的地址前缀
    #[serde(default)]
    pub base_url: String,
    /// 客户端下载 rule-set 使用的出站
    #[serde(default)]
    pub download_detour: Option<String>,
    /// sing-box 可执行文件
    #[serde(default = "default_binary")]
    pub binary: String,
    /// 相对输出目录的 rule-set 子目录
    #[serde(default = "default_rule_set_dir")]
    pub dir: String,
}

fn default_min_size() -> usize {
    DEFAULT_MIN_SIZE
}

fn default_binary() -> String {
    DEFAULT_BINARY.to_string()
}

fn default_rule_set_dir() -> String {
    "rule-set".to_string()
}

impl Default for RuleSetOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            min_size: default_min_size(),
            base_url: String::new(),
            download_detour: None,
            binary: default_binary(),
            dir: default_rule_set_dir(),
        }
    }
}

// ========================================
// 测试模块
// ========================================
#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
destinations: [Streaming]
rules:
  - destination: Streaming
    filters:
      - DOMAIN-SUFFIX,netflix.com
      - {type: clash-ipcidr, url: "https://rules/netflix.txt", resolve: false}
  - destination: REJECT
    filters: ["DOMAIN-KEYWORD,ads"]
targets:
  - name: clash
    type: clash
    options: {mode: rule}
  - name: qx
    type: quantumult
  - name: sing-box
    type: sing-box
    file: config.json
    sing_box:
      included_process_kinds: [PROCESS-NAME]
      rule_set: {enabled: true, base_url: "https://example.com/rs/"}
"#;

    #[test]
    fn test_parse_config() {
        let config: GenerateConfig = serde_yaml::from_str(CONFIG).unwrap();
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[1].destination, Destination::Reject);
        assert!(matches!(config.rules[0].filters[0], FilterSpec::Literal(_)));
        assert!(matches!(config.rules[0].filters[1], FilterSpec::Source(_)));

        let targets = &config.targets;
        assert_eq!(targets[0].format, OutputFormat::Clash);
        assert_eq!(targets[1].format, OutputFormat::QuantumultX);
        assert_eq!(targets[2].file.as_deref(), Some("config.json"));

        let sing_box = &targets[2].sing_box;
        assert!(sing_box.rule_set.enabled);
        assert_eq!(sing_box.rule_set.min_size, DEFAULT_MIN_SIZE);
        assert_eq!(sing_box.rule_set.binary, "sing-box");
        assert_eq!(sing_box.process_mode, LogicalMode::Or);
        assert_eq!(
            sing_box.process_kinds().unwrap(),
            Some(vec![MatcherKind::ProcessName])
        );
    }

    #[test]
    fn test_effective_renames() {
        let config: GenerateConfig = serde_yaml::from_str(CONFIG).unwrap();
        assert!(config.targets[0].effective_renames().is_empty());
        assert_eq!(
            config.targets[1].effective_renames().get("PROXY").map(String::as_str),
            Some(QUANTUMULT_PROXY_NAME)
        );
    }

    #[test]
    fn test_unknown_process_kind() {
        let options: SingBoxOptions =
            serde_yaml::from_str("included_process_kinds: [PROCESS-PATH]").unwrap();
        assert!(options.process_kinds().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = GenerateConfig::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
    }
}
