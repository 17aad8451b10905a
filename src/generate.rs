//! # 生成流程
//!
//! 1. 读取生成配置，解析全部规则来源（同一 url 只拉取一次）
//! 2. 每个输出目标拿到一份独立的规则副本，按目标改名后渲染
//! 3. 整个文件一次写出
//!
//! 某个目标失败不影响其他目标，全部处理完后整体报告失败。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use log::{error, info, warn};

use crate::config::{GenerateConfig, TargetConfig};
use crate::fetch::{CachingFetcher, Fetch};
use crate::rule::formatter::{ClashFormatter, LineFormatter, OutputFormat, QuantumultFormatter};
use crate::rule::parser::resolve_filter;
use crate::rule::route::{DestinationTable, RouteRule};
use crate::sing_box::compiler::SingBoxCompiler;
use crate::sing_box::generator::SingBoxGenerator;

/// 文件头中的时间使用 UTC+8
const HEADER_UTC_OFFSET_SECS: i32 = 8 * 3600;

// ========================================
// 选项与结果
// ========================================

/// 一次生成的选项
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// 生成配置文件
    pub config: PathBuf,
    /// 输出目录
    pub output_dir: PathBuf,
    /// 只生成这些目标（为空时生成全部）
    pub targets: Vec<String>,
    /// 是否允许提取编译 rule-set
    pub rule_set: bool,
}

/// 单个目标的生成结果
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub name: String,
    pub path: PathBuf,
    /// 输出的规则数
    pub rules: usize,
    /// 去掉的重复规则数
    pub duplicates: usize,
    /// 目标不支持而丢弃的条件数
    pub unsupported: usize,
    /// 编译出的 rule-set 数
    pub rule_sets: usize,
}

// ========================================
// 入口
// ========================================

/// 读取配置并生成所有目标
pub fn run(options: &GenerateOptions, fetcher: &dyn Fetch) -> Result<Vec<TargetReport>> {
    let config = GenerateConfig::load(&options.config)?;
    let source = options.config.display().to_string();
    generate(&config, &source, options, fetcher)
}

/// 按已加载的配置生成
///
/// `source` 只用于写入文件头。
pub fn generate(
    config: &GenerateConfig,
    source: &str,
    options: &GenerateOptions,
    fetcher: &dyn Fetch,
) -> Result<Vec<TargetReport>> {
    for name in &options.targets {
        if !config.targets.iter().any(|t| &t.name == name) {
            bail!("Unknown target: {}", name);
        }
    }

    let fetcher = CachingFetcher::new(fetcher);
    let destinations = DestinationTable::new(config.destinations.iter().cloned());
    let rules = resolve_rules(config, &destinations, &fetcher)?;

    let header = header(source, now()?);
    let selected: Vec<&TargetConfig> = config
        .targets
        .iter()
        .filter(|t| options.targets.is_empty() || options.targets.contains(&t.name))
        .collect();

    let mut reports = Vec::with_capacity(selected.len());
    let mut failed = Vec::new();
    for target in &selected {
        match generate_target(target, &rules, config, &header, options, &fetcher) {
            Ok(report) => {
                info!(
                    "Generated {} ({} rules) -> {}",
                    report.name,
                    report.rules,
                    report.path.display()
                );
                reports.push(report);
            }
            Err(e) => {
                error!("Failed to generate {}: {:#}", target.name, e);
                failed.push(target.name.as_str());
            }
        }
    }

    if !failed.is_empty() {
        bail!(
            "{} of {} targets failed: {}",
            failed.len(),
            selected.len(),
            failed.join(", ")
        );
    }
    Ok(reports)
}

/// 解析配置中的全部路由规则
pub fn resolve_rules(
    config: &GenerateConfig,
    destinations: &DestinationTable,
    fetcher: &dyn Fetch,
) -> Result<Vec<RouteRule>> {
    let mut rules = Vec::with_capacity(config.rules.len());

    for (i, rule) in config.rules.iter().enumerate() {
        destinations
            .check(&rule.destination)
            .with_context(|| format!("Rule #{} is invalid", i))?;

        let mut matchers = Vec::new();
        for filter in &rule.filters {
            let parsed = resolve_filter(filter, fetcher, false).with_context(|| {
                format!("Failed to resolve filter `{}` for {}", filter, rule.destination)
            })?;
            matchers.extend(parsed);
        }
        rules.push(RouteRule::new(rule.destination.clone(), matchers));
    }

    Ok(rules)
}

// ========================================
// 单个目标
// ========================================

fn generate_target(
    target: &TargetConfig,
    rules: &[RouteRule],
    config: &GenerateConfig,
    header: &str,
    options: &GenerateOptions,
    fetcher: &dyn Fetch,
) -> Result<TargetReport> {
    // 每个目标独立的副本，改名不会影响其他目标
    let renames = target.effective_renames();
    let mut rules = rules.to_vec();
    for (from, to) in &renames {
        for rule in rules.iter_mut() {
            rule.rename_destination(from, to);
        }
    }

    match target.format {
        OutputFormat::Clash => {
            let formatter = ClashFormatter {
                options: target.options.clone(),
            };
            write_line_target(&formatter, target, &rules, header, options)
        }
        OutputFormat::QuantumultX => {
            let formatter = QuantumultFormatter {
                sections: target.options.clone(),
            };
            write_line_target(&formatter, target, &rules, header, options)
        }
        OutputFormat::SingBox => {
            let destinations = DestinationTable::new(
                config
                    .destinations
                    .iter()
                    .chain(renames.values())
                    .cloned(),
            );
            write_sing_box_target(target, &rules, &destinations, options, fetcher)
        }
    }
}

fn write_line_target(
    formatter: &dyn LineFormatter,
    target: &TargetConfig,
    rules: &[RouteRule],
    header: &str,
    options: &GenerateOptions,
) -> Result<TargetReport> {
    let rendered = formatter
        .format_rules(rules)
        .with_context(|| format!("Failed to render {} rules", formatter.format()))?;
    let content = formatter.generate_file_content(header, &rendered)?;

    let path = output_path(options, target, formatter.file_extension());
    write_file(&path, &content)?;

    Ok(TargetReport {
        name: target.name.clone(),
        path,
        rules: rendered.lines.len(),
        duplicates: rendered.duplicates,
        unsupported: rendered.unsupported,
        rule_sets: 0,
    })
}

fn write_sing_box_target(
    target: &TargetConfig,
    rules: &[RouteRule],
    destinations: &DestinationTable,
    options: &GenerateOptions,
    fetcher: &dyn Fetch,
) -> Result<TargetReport> {
    let template = serde_json::to_value(&target.options)
        .context("sing-box options must be a JSON-compatible mapping")?;

    let mut generator = SingBoxGenerator::new(&target.sing_box, destinations, fetcher);
    let rule_set = &target.sing_box.rule_set;
    if rule_set.enabled && options.rule_set {
        if rule_set.base_url.is_empty() {
            bail!("`sing_box.rule_set.base_url` is required when rule-set is enabled");
        }
        generator = generator.with_compiler(SingBoxCompiler::new(
            &rule_set.binary,
            options.output_dir.join(&rule_set.dir),
            rule_set.base_url.as_str(),
            rule_set.download_detour.clone(),
        ));
    } else if rule_set.enabled {
        warn!("rule-set extraction is disabled for {}", target.name);
    }

    let output = generator.generate(rules, template)?;
    let content = serde_json::to_string_pretty(&output.document)?;

    let path = output_path(options, target, "json");
    write_file(&path, &(content + "\n"))?;

    let rule_count = output.document["route"]["rules"]
        .as_array()
        .map(Vec::len)
        .unwrap_or_default();
    Ok(TargetReport {
        name: target.name.clone(),
        path,
        rules: rule_count,
        duplicates: 0,
        unsupported: output.unsupported,
        rule_sets: output.artifacts.len(),
    })
}

// ========================================
// 文件
// ========================================

fn output_path(options: &GenerateOptions, target: &TargetConfig, extension: &str) -> PathBuf {
    let file = target
        .file
        .clone()
        .unwrap_or_else(|| format!("{}.{}", target.name, extension));
    options.output_dir.join(file)
}

/// 整个文件一次写出（目录不存在时创建）
fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn now() -> Result<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(HEADER_UTC_OFFSET_SECS).context("Invalid UTC offset")?;
    Ok(Utc::now().with_timezone(&offset))
}

/// 生成文件头
pub fn header(source: &str, at: DateTime<FixedOffset>) -> String {
    let line = format!("# {}", "=".repeat(78));
    format!(
        "{line}\n# THIS FILE IS AUTO-GENERATED FROM: {source}\n# AT {}.\n{line}",
        at.format("%Y/%m/%d %H:%M")
    )
}
