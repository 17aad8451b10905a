//! # rule-gen
//!
//! 把路由规则翻译成 Clash、Quantumult X 和 sing-box 配置的 CLI 工具。
//!
//! ## 使用
//! ```bash
//! # 按配置文件生成全部目标
//! rule-gen generate --config rules.yaml --output out/
//!
//! # 只生成 sing-box，且不编译 rule-set
//! rule-gen generate -c rules.yaml -o out/ --target sing-box --no-rule-set
//!
//! # 把几条规则渲染到标准输出
//! rule-gen render --format quantumult --destination PROXY \
//!     "DOMAIN-SUFFIX,example.com" "IP-CIDR,10.0.0.0/8,no-resolve"
//! ```

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use rule_gen::fetch::HttpFetcher;
use rule_gen::generate::{self, GenerateOptions};
use rule_gen::rule::{
    create_formatter, resolve_filter, Destination, FilterSpec, OutputFormat, RouteRule,
};
use rule_gen::sing_box::{group, LogicalMode, RuleAction, SingBoxRule};

// ========================================
// CLI 参数定义
// ========================================

/// 路由规则生成工具
#[derive(Parser)]
#[command(name = "rule-gen")]
#[command(version)]
#[command(about = "Translate routing rules into Clash, Quantumult X and sing-box configs")]
struct Cli {
    /// 子命令
    #[command(subcommand)]
    command: Commands,

    /// 显示调试日志
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

/// 支持的子命令
#[derive(Subcommand)]
enum Commands {
    /// 按配置文件生成所有目标配置
    Generate {
        /// 生成配置文件 (YAML)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: PathBuf,

        /// 输出目录
        #[arg(long, short = 'o', value_name = "DIR")]
        output: PathBuf,

        /// 只生成指定目标 (可重复)
        #[arg(long = "target", value_name = "NAME")]
        targets: Vec<String>,

        /// 不提取编译 rule-set
        #[arg(long)]
        no_rule_set: bool,

        /// 拉取远程规则的超时秒数
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// 把规则渲染为指定目标的写法并输出到标准输出
    Render {
        /// 目标格式
        #[arg(long, short = 'f', value_enum)]
        format: OutputFormat,

        /// 去向名
        #[arg(long, short = 'd', default_value = "PROXY")]
        destination: String,

        /// 规则来源：规则字面量，或 YAML 行内映射如 `{type: dnsmasq, url: ...}`
        #[arg(required = true)]
        filters: Vec<String>,
    },
}

// ========================================
// 主函数
// ========================================

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let result = match cli.command {
        Commands::Generate {
            config,
            output,
            targets,
            no_rule_set,
            timeout,
        } => {
            let options = GenerateOptions {
                config,
                output_dir: output,
                targets,
                rule_set: !no_rule_set,
            };
            run_generate(&options, Duration::from_secs(timeout))
        }
        Commands::Render {
            format,
            destination,
            filters,
        } => run_render(format, &destination, &filters),
    };

    // 处理错误
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// 初始化日志：默认 info，`--verbose` 为 debug，`RUST_LOG` 优先
fn init_logger(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

// ========================================
// 子命令实现
// ========================================

/// 执行生成命令
fn run_generate(options: &GenerateOptions, timeout: Duration) -> Result<()> {
    let fetcher = HttpFetcher::new(timeout)?;
    let reports = generate::run(options, &fetcher)?;

    println!(
        "{:<20}\t{:>8}\t{:>10}\t{:>11}\t{:>9}\t{}",
        "TARGET", "RULES", "DUPLICATE", "UNSUPPORTED", "RULE-SET", "FILE"
    );
    for report in &reports {
        println!(
            "{:<20}\t{:>8}\t{:>10}\t{:>11}\t{:>9}\t{}",
            report.name,
            report.rules,
            report.duplicates,
            report.unsupported,
            report.rule_sets,
            report.path.display()
        );
    }
    info!("Generated {} targets", reports.len());
    Ok(())
}

/// 执行渲染命令
fn run_render(format: OutputFormat, destination: &str, filters: &[String]) -> Result<()> {
    let fetcher = HttpFetcher::new(rule_gen::fetch::DEFAULT_TIMEOUT)?;

    let mut matchers = Vec::new();
    for filter in filters {
        let spec: FilterSpec = serde_yaml::from_str(filter)
            .with_context(|| format!("Invalid filter: {}", filter))?;
        let parsed = resolve_filter(&spec, &fetcher, false)
            .with_context(|| format!("Failed to resolve filter `{}`", spec))?;
        matchers.extend(parsed);
    }
    let rule = RouteRule::new(Destination::parse(destination), matchers);

    match create_formatter(format) {
        Some(formatter) => {
            let rendered = formatter.format_rules(std::slice::from_ref(&rule))?;
            for line in &rendered.lines {
                println!("{}", line);
            }
        }
        None => {
            let action = match rule.destination {
                Destination::Reject => RuleAction::Reject,
                Destination::Outbound(ref name) => RuleAction::Route(name.clone()),
            };
            if let Some(node) = group::group(&rule.matchers, None, LogicalMode::default())? {
                let rule = SingBoxRule::new(action, node);
                println!("{}", serde_json::to_string_pretty(&rule.to_value())?);
            }
        }
    }

    Ok(())
}
