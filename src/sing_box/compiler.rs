//! # rule-set 编译
//!
//! 通过执行外部 `sing-box` 命令把 rule-set 源文件编译成二进制 `.srs`：
//! 1. `sing-box version` 查询版本，决定源文件格式版本
//! 2. 写出 `<tag>.json`
//! 3. `sing-box rule-set compile --output <tag>.srs <tag>.json`
//!
//! 命令不存在、版本无法识别或退出码非零都直接返回 [`RuleError::CompilerTool`]，不重试。

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::rule_set::RuleSetLiteral;
use crate::error::{Result, RuleError};

/// 默认的 sing-box 可执行文件
pub const DEFAULT_BINARY: &str = "sing-box";

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"sing-box version (\d+)\.(\d+)\.(\d+)").unwrap());

// ========================================
// 版本
// ========================================

/// sing-box 版本号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    /// 从 `sing-box version` 的输出中解析版本号
    pub fn parse(output: &str) -> Result<Self> {
        let caps = VERSION_RE.captures(output).ok_or_else(|| {
            RuleError::CompilerTool(format!(
                "unrecognized version output: {}",
                output.lines().next().unwrap_or_default()
            ))
        })?;
        let number = |i: usize| -> Result<u32> {
            caps[i]
                .parse()
                .map_err(|e| {
                    RuleError::CompilerTool(format!("invalid version number '{}': {e}", &caps[i]))
                })
        };
        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
        })
    }

    /// 该版本支持的 rule-set 源文件格式版本
    ///
    /// 1.11+ 为 3，1.10 为 2，更早为 1。
    pub fn format_version(&self) -> u8 {
        match (self.major, self.minor) {
            (1, minor) if minor >= 11 => 3,
            (1, 10) => 2,
            (1, _) | (0, _) => 1,
            _ => 3,
        }
    }
}

// ========================================
// 编译结果
// ========================================

/// `route.rule_set` 中的远程 rule-set 描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRuleSet {
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_detour: Option<String>,
}

/// 编译产物
#[derive(Debug, Clone)]
pub struct RuleSetArtifact {
    pub tag: String,
    /// `.srs` 文件路径
    pub path: PathBuf,
    /// 文件大小（字节）
    pub size: u64,
    pub descriptor: RemoteRuleSet,
}

// ========================================
// 编译器
// ========================================

/// 调用 sing-box 命令编译 rule-set
#[derive(Debug, Clone)]
pub struct SingBoxCompiler {
    binary: PathBuf,
    output_dir: PathBuf,
    base_url: String,
    download_detour: Option<String>,
}

impl SingBoxCompiler {
    /// - `output_dir`: 源文件和 `.srs` 的输出目录
    /// - `base_url`: 发布 `.srs` 的地址前缀，下载地址为 `base_url + tag + ".srs"`
    /// - `download_detour`: 客户端下载 rule-set 时使用的出站
    pub fn new(
        binary: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        base_url: impl Into<String>,
        download_detour: Option<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            output_dir: output_dir.into(),
            base_url: base_url.into(),
            download_detour,
        }
    }

    /// 查询 sing-box 版本
    pub fn version(&self) -> Result<ToolVersion> {
        let output = Command::new(&self.binary)
            .arg("version")
            .output()
            .map_err(|e| {
                RuleError::CompilerTool(format!(
                    "failed to execute {} version: {e}",
                    self.binary.display()
                ))
            })?;

        if !output.status.success() {
            return Err(RuleError::CompilerTool(format!(
                "{} version failed with status: {}",
                self.binary.display(),
                output.status
            )));
        }

        ToolVersion::parse(&String::from_utf8_lossy(&output.stdout))
    }

    /// 编译一组 rule-set（只查询一次版本）
    pub fn compile_all(&self, literals: &[RuleSetLiteral]) -> Result<Vec<RuleSetArtifact>> {
        if literals.is_empty() {
            return Ok(Vec::new());
        }

        let version = self.version()?;
        let format_version = version.format_version();
        debug!(
            "sing-box {}.{}.{}, rule-set source version {}",
            version.major, version.minor, version.patch, format_version
        );

        fs::create_dir_all(&self.output_dir)?;
        let artifacts = literals
            .iter()
            .map(|literal| self.compile(literal, format_version))
            .collect::<Result<Vec<_>>>()?;

        info!("compiled {} rule-sets into {}", artifacts.len(), self.output_dir.display());
        Ok(artifacts)
    }

    /// 编译单个 rule-set
    pub fn compile(&self, literal: &RuleSetLiteral, format_version: u8) -> Result<RuleSetArtifact> {
        let source = self.output_dir.join(format!("{}.json", literal.tag));
        let target = self.output_dir.join(format!("{}.srs", literal.tag));

        let content = serde_json::to_string_pretty(&literal.to_source(format_version))?;
        fs::write(&source, content)?;

        let output = Command::new(&self.binary)
            .args(["rule-set", "compile", "--output"])
            .arg(&target)
            .arg(&source)
            .output()
            .map_err(|e| {
                RuleError::CompilerTool(format!(
                    "failed to execute {} rule-set compile: {e}",
                    self.binary.display()
                ))
            })?;

        if !output.status.success() {
            return Err(RuleError::CompilerTool(format!(
                "compiling rule-set {} failed with status {}: {}",
                literal.tag,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let size = file_size(&target)?;
        debug!("compiled rule-set {} ({} bytes)", literal.tag, size);

        Ok(RuleSetArtifact {
            tag: literal.tag.clone(),
            path: target,
            size,
            descriptor: RemoteRuleSet {
                tag: literal.tag.clone(),
                kind: "remote".to_string(),
                format: "binary".to_string(),
                url: format!("{}{}.srs", self.base_url, literal.tag),
                download_detour: self.download_detour.clone(),
            },
        })
    }
}

fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path).map(|m| m.len()).map_err(|e| {
        RuleError::CompilerTool(format!("compiled rule-set {} is missing: {e}", path.display()))
    })
}

// ========================================
// 测试模块
// ========================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::sing_box::rule::{DefaultRule, RuleNode};
    use serde_json::json;

    fn literal(tag: &str) -> RuleSetLiteral {
        let mut rule = DefaultRule::default();
        rule.push("domain_suffix", json!("example.com"));
        RuleSetLiteral {
            tag: tag.to_string(),
            content: RuleNode::Default(rule),
        }
    }

    #[test]
    fn test_parse_version() {
        let output = "sing-box version 1.11.4\n\nEnvironment: go1.23.4 linux/amd64\n";
        let version = ToolVersion::parse(output).unwrap();
        assert_eq!(
            version,
            ToolVersion {
                major: 1,
                minor: 11,
                patch: 4
            }
        );
        assert!(ToolVersion::parse("clash 1.0").is_err());
    }

    #[test]
    fn test_format_version() {
        let v = |minor| ToolVersion {
            major: 1,
            minor,
            patch: 0,
        };
        assert_eq!(v(8).format_version(), 1);
        assert_eq!(v(9).format_version(), 1);
        assert_eq!(v(10).format_version(), 2);
        assert_eq!(v(11).format_version(), 3);
        assert_eq!(v(12).format_version(), 3);
    }

    #[test]
    fn test_nothing_to_compile() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = SingBoxCompiler::new(
            dir.path().join("no-such-sing-box"),
            dir.path(),
            "https://example.com/rules/",
            None,
        );
        // 没有 rule-set 时不调用命令
        assert!(compiler.compile_all(&[]).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_compile_with_fake_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("sing-box");

        let missing = SingBoxCompiler::new(&binary, dir.path(), "https://example.com/rules/", None);
        assert!(matches!(missing.version(), Err(RuleError::CompilerTool(_))));
        assert!(matches!(
            missing.compile_all(&[literal("proxy-0")]),
            Err(RuleError::CompilerTool(_))
        ));

        let script = r#"#!/bin/sh
case "$1" in
  version) echo "sing-box version 1.10.7" ;;
  rule-set)
    case "$4" in *fail-0.srs) echo "bad rule" >&2; exit 1 ;; esac
    cp "$5" "$4" ;;
  *) exit 2 ;;
esac
"#;
        fs::write(&binary, script).unwrap();
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();

        let out = dir.path().join("rule-set");
        let compiler = SingBoxCompiler::new(
            &binary,
            &out,
            "https://example.com/rules/",
            Some("🇯🇵 Japan".to_string()),
        );

        let artifacts = compiler.compile_all(&[literal("proxy-0"), literal("direct-1")]).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].path, out.join("proxy-0.srs"));
        assert!(artifacts[0].size > 0);

        let source: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("proxy-0.json")).unwrap()).unwrap();
        assert_eq!(source["version"], json!(2));

        assert_eq!(
            serde_json::to_value(&artifacts[1].descriptor).unwrap(),
            json!({
                "tag": "direct-1",
                "type": "remote",
                "format": "binary",
                "url": "https://example.com/rules/direct-1.srs",
                "download_detour": "🇯🇵 Japan",
            })
        );

        let err = compiler.compile_all(&[literal("fail-0")]).unwrap_err();
        assert!(matches!(err, RuleError::CompilerTool(msg) if msg.contains("bad rule")));
    }
}
