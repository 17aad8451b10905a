//! # 规则条件分组
//!
//! 把一组 [`Matcher`] 按 sing-box 字段名归并成一条默认规则。
//!
//! 进程类条件（进程名、包名）默认全部丢弃；显式包含时单独成组，
//! 再与其他条件以逻辑规则组合，进程组在前。

use log::{debug, warn};

use super::rule::{DefaultRule, LogicalMode, LogicalRule, RuleNode};
use crate::error::Result;
use crate::rule::kind::MatcherKind;
use crate::rule::matcher::Matcher;

/// 目标 IP 网段字段
const DST_IP_KEY: &str = "ip_cidr";

/// 按字段名分组
///
/// - `included_process_kinds`: 保留的进程类条件；`None` 表示全部丢弃
/// - `mode`: 进程组与其他条件的组合方式
///
/// 目标不支持的条件会被丢弃并记录日志；分组后为空时返回 `None`。
pub fn group(
    matchers: &[Matcher],
    included_process_kinds: Option<&[MatcherKind]>,
    mode: LogicalMode,
) -> Result<Option<RuleNode>> {
    Ok(group_counted(matchers, included_process_kinds, mode)?.node)
}

/// 分组结果及被丢弃的不支持条件数
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Grouped {
    pub node: Option<RuleNode>,
    pub unsupported: usize,
}

/// 同 [`group`]，同时返回目标不支持而被丢弃的条件数（进程类条件不计入）
pub fn group_counted(
    matchers: &[Matcher],
    included_process_kinds: Option<&[MatcherKind]>,
    mode: LogicalMode,
) -> Result<Grouped> {
    let mut normal = DefaultRule::default();
    let mut process = DefaultRule::default();
    let mut unsupported = 0;

    for matcher in matchers {
        let kind = matcher.kind();
        if kind.is_process() {
            let included = included_process_kinds.is_some_and(|kinds| kinds.contains(&kind));
            if !included {
                debug!("drop process matcher `{}`", matcher);
                continue;
            }
        }

        let (key, value) = match matcher.sing_box_field() {
            Ok(field) => field,
            Err(e) if e.is_unsupported() => {
                unsupported += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        if kind.is_process() {
            process.push(key, value);
        } else {
            normal.push(key, value);
        }
    }

    if unsupported > 0 {
        warn!("{} matchers are not supported by sing-box and were dropped", unsupported);
    }

    let node = match (process.is_empty(), normal.is_empty()) {
        (true, true) => None,
        (true, false) => Some(RuleNode::Default(normal)),
        (false, true) => Some(RuleNode::Default(process)),
        (false, false) => Some(RuleNode::Logical(LogicalRule {
            mode,
            rules: vec![RuleNode::Default(process), RuleNode::Default(normal)],
            extra: Default::default(),
        })),
    };
    Ok(Grouped { node, unsupported })
}

/// 拆分结果：不涉及目标 IP 的部分，与只含目标 IP 的部分
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SplitRule {
    pub no_resolve: Option<RuleNode>,
    pub dst_ip: Option<RuleNode>,
}

/// 把目标 IP 条件（`ip_cidr`）从分组结果中拆出
///
/// 拆出的部分应排在所有不需解析的规则之后。只处理 [`group`] 产出的结构：
/// 默认规则，或 `[进程组, 其他条件]` 形式的逻辑规则；其他逻辑规则原样返回。
pub fn split_dst_ip(node: RuleNode) -> SplitRule {
    match node {
        RuleNode::Default(rule) => {
            let (no_resolve, dst_ip) = split_default(rule);
            SplitRule {
                no_resolve: no_resolve.map(RuleNode::Default),
                dst_ip: dst_ip.map(RuleNode::Default),
            }
        }
        RuleNode::Logical(logical) if is_process_pair(&logical) => {
            let LogicalRule { mode, rules, extra } = logical;
            let mut rules = rules.into_iter();
            let (Some(RuleNode::Default(process)), Some(RuleNode::Default(normal))) =
                (rules.next(), rules.next())
            else {
                return SplitRule::default();
            };

            let (no_resolve, dst_ip) = split_default(normal);
            let combine = |part: DefaultRule| {
                RuleNode::Logical(LogicalRule {
                    mode,
                    rules: vec![RuleNode::Default(process.clone()), RuleNode::Default(part)],
                    extra: extra.clone(),
                })
            };

            let no_resolve = match no_resolve {
                Some(part) => Some(combine(part)),
                // “或”组合时进程组自身仍然成立；“与”组合时整条规则都依赖目标 IP
                None if mode == LogicalMode::Or => Some(RuleNode::Default(process.clone())),
                None => None,
            };
            SplitRule {
                no_resolve,
                dst_ip: dst_ip.map(combine),
            }
        }
        other => SplitRule {
            no_resolve: Some(other),
            dst_ip: None,
        },
    }
}

fn split_default(mut rule: DefaultRule) -> (Option<DefaultRule>, Option<DefaultRule>) {
    let Some(ips) = rule.matchers.remove(DST_IP_KEY) else {
        return (Some(rule), None);
    };

    let mut dst_ip = DefaultRule {
        extra: rule.extra.clone(),
        ..Default::default()
    };
    dst_ip.matchers.insert(DST_IP_KEY.to_string(), ips);

    let no_resolve = if rule.is_empty() { None } else { Some(rule) };
    (no_resolve, Some(dst_ip))
}

fn is_process_pair(logical: &LogicalRule) -> bool {
    match logical.rules.as_slice() {
        [RuleNode::Default(process), RuleNode::Default(_)] => process
            .matchers
            .keys()
            .all(|key| matches!(key.as_str(), "process_name" | "package_name")),
        _ => false,
    }
}
