//! # sing-box 配置生成
//!
//! 以配置中给出的 JSON 模板为基础：
//! 1. 展开模板中 `dns.rules` / `route.rules` 里的 `filters` 字段
//!    （DNS 规则只保留可用于 DNS 的条件）
//! 2. 把路由规则分组后追加到 `route.rules`，可选把目标 IP 规则排到最后
//! 3. 可选提取并编译 rule-set（模板中的规则一并参与），描述写入 `route.rule_set`
//! 4. 校验所有出站名和 `route.final`

use std::collections::HashSet;

use log::{debug, info, warn};
use serde_json::{Map, Value};

use super::compiler::{RuleSetArtifact, SingBoxCompiler};
use super::group::{group_counted, split_dst_ip};
use super::rule::{RuleAction, SingBoxRule};
use super::rule_set::Extractor;
use crate::config::SingBoxOptions;
use crate::error::{Result, RuleError};
use crate::fetch::Fetch;
use crate::rule::kind::MatcherKind;
use crate::rule::parser::{resolve_filter, FilterSpec};
use crate::rule::route::{Destination, DestinationTable, RouteRule};

/// `route.final` 缺省值
const DEFAULT_FINAL: &str = "PROXY";

/// sing-box 内置的 DNS 出站
const DNS_OUTBOUND: &str = "DNS";

/// 生成结果
#[derive(Debug, Clone)]
pub struct SingBoxDocument {
    pub document: Value,
    pub artifacts: Vec<RuleSetArtifact>,
    /// sing-box 不支持而被丢弃的条件数
    pub unsupported: usize,
}

/// sing-box 配置生成器
pub struct SingBoxGenerator<'a> {
    options: &'a SingBoxOptions,
    destinations: &'a DestinationTable,
    fetcher: &'a dyn Fetch,
    compiler: Option<SingBoxCompiler>,
}

impl<'a> SingBoxGenerator<'a> {
    pub fn new(
        options: &'a SingBoxOptions,
        destinations: &'a DestinationTable,
        fetcher: &'a dyn Fetch,
    ) -> Self {
        Self {
            options,
            destinations,
            fetcher,
            compiler: None,
        }
    }

    /// 启用 rule-set 提取与编译
    pub fn with_compiler(mut self, compiler: SingBoxCompiler) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// 生成完整配置
    pub fn generate(&self, rules: &[RouteRule], template: Value) -> Result<SingBoxDocument> {
        let mut document = match template {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(RuleError::Parse(format!(
                    "sing-box template must be an object, got: {other}"
                )))
            }
        };

        let process_kinds = self.options.process_kinds()?;
        let outbounds = self.valid_outbounds(&document);
        let mut unsupported = 0;

        // 1. 模板中的 filters
        if let Some(dns) = document.get_mut("dns") {
            unsupported += self.expand_filters(dns, process_kinds.as_deref(), true)?;
        }
        let route = document
            .entry("route")
            .or_insert_with(|| Value::Object(Map::new()));
        let route = route.as_object_mut().ok_or_else(|| {
            RuleError::Parse("`route` in sing-box template must be an object".into())
        })?;
        let mut route_rules = match route.remove("rules") {
            Some(Value::Array(items)) => items,
            None => Vec::new(),
            Some(other) => {
                return Err(RuleError::Parse(format!(
                    "`route.rules` must be a list, got: {other}"
                )))
            }
        };
        for rule in route_rules.iter_mut() {
            unsupported += self.expand_filters(rule, process_kinds.as_deref(), false)?;
            if let Some(outbound) = rule.get("outbound").and_then(Value::as_str) {
                check_outbound(&outbounds, outbound)?;
            }
        }

        // 2. 路由规则
        let (mut generated, dropped) =
            self.build_rules(rules, process_kinds.as_deref(), &outbounds)?;
        unsupported += dropped;

        // 3. rule-set：模板规则和生成的规则一起提取
        let mut artifacts = Vec::new();
        if let Some(ref compiler) = self.compiler {
            let (positions, template_rules): (Vec<usize>, Vec<SingBoxRule>) = route_rules
                .iter()
                .enumerate()
                .filter_map(|(i, value)| match SingBoxRule::from_value(value) {
                    Ok(rule) => Some((i, rule)),
                    Err(e) => {
                        debug!("keep template rule #{} as is: {}", i, e);
                        None
                    }
                })
                .unzip();

            let mut candidates = template_rules.clone();
            candidates.extend(generated);
            let extraction = Extractor::new(self.options.rule_set.min_size).extract(candidates)?;
            artifacts = compiler.compile_all(&extraction.literals)?;

            let mut extracted = extraction.rules.into_iter();
            for ((position, original), rule) in
                positions.into_iter().zip(template_rules).zip(extracted.by_ref())
            {
                // 没有被提取的模板规则保持原样
                if rule.node != original.node {
                    route_rules[position] = rule.to_value();
                }
            }
            generated = extracted.collect();

            let rule_sets = route
                .entry("rule_set")
                .or_insert_with(|| Value::Array(Vec::new()));
            let rule_sets = rule_sets
                .as_array_mut()
                .ok_or_else(|| RuleError::Parse("`route.rule_set` must be a list".into()))?;
            for artifact in &artifacts {
                rule_sets.push(serde_json::to_value(&artifact.descriptor)?);
            }
        }

        route_rules.extend(generated.iter().map(SingBoxRule::to_value));
        info!("generated {} sing-box route rules", route_rules.len());
        route.insert("rules".to_string(), Value::Array(route_rules));

        // 4. final
        match route.get("final") {
            Some(Value::String(name)) => check_outbound(&outbounds, name)?,
            Some(other) => {
                return Err(RuleError::Parse(format!(
                    "`route.final` must be a string, got: {other}"
                )))
            }
            None => {
                warn!(
                    "The final outbound was not set in route, fallback to the default `{}`",
                    DEFAULT_FINAL
                );
                route.insert("final".to_string(), Value::from(DEFAULT_FINAL));
            }
        }

        Ok(SingBoxDocument {
            document: Value::Object(document),
            artifacts,
            unsupported,
        })
    }

    /// 把路由规则转成 sing-box 规则；开启 `split_dst_ip` 时目标 IP 规则排在最后
    ///
    /// 同时返回不支持而被丢弃的条件数。
    fn build_rules(
        &self,
        rules: &[RouteRule],
        process_kinds: Option<&[MatcherKind]>,
        outbounds: &Outbounds,
    ) -> Result<(Vec<SingBoxRule>, usize)> {
        let mut primary = Vec::with_capacity(rules.len());
        let mut deferred = Vec::new();
        let mut unsupported = 0;

        for rule in rules {
            let action = match rule.destination {
                Destination::Reject => RuleAction::Reject,
                Destination::Outbound(ref name) => {
                    check_outbound(outbounds, name)?;
                    RuleAction::Route(name.clone())
                }
            };

            let grouped = group_counted(&rule.matchers, process_kinds, self.options.process_mode)?;
            unsupported += grouped.unsupported;
            let Some(node) = grouped.node else {
                debug!("no sing-box matchers left for {}, skip", rule.destination);
                continue;
            };

            if self.options.split_dst_ip {
                let split = split_dst_ip(node);
                if let Some(node) = split.no_resolve {
                    primary.push(SingBoxRule::new(action.clone(), node));
                }
                if let Some(node) = split.dst_ip {
                    deferred.push(SingBoxRule::new(action, node));
                }
            } else {
                primary.push(SingBoxRule::new(action, node));
            }
        }

        primary.extend(deferred);
        Ok((primary, unsupported))
    }

    /// 递归展开 `filters` 字段，返回不支持而被丢弃的条件数
    fn expand_filters(
        &self,
        value: &mut Value,
        process_kinds: Option<&[MatcherKind]>,
        for_dns: bool,
    ) -> Result<usize> {
        let mut unsupported = 0;
        match value {
            Value::Object(map) => {
                if let Some(filters) = map.remove("filters") {
                    let specs: Vec<FilterSpec> = serde_json::from_value(filters)?;
                    let mut matchers = Vec::new();
                    for spec in &specs {
                        matchers.extend(resolve_filter(spec, self.fetcher, for_dns)?);
                    }

                    let mode = self.options.process_mode;
                    let grouped = group_counted(&matchers, process_kinds, mode)?;
                    match grouped.node {
                        Some(node) => {
                            if let Value::Object(fields) = node.to_value() {
                                map.extend(fields);
                            }
                        }
                        None => warn!("filters in sing-box template expanded to no matchers"),
                    }
                    return Ok(grouped.unsupported);
                }
                for v in map.values_mut() {
                    unsupported += self.expand_filters(v, process_kinds, for_dns)?;
                }
            }
            Value::Array(items) => {
                for v in items {
                    unsupported += self.expand_filters(v, process_kinds, for_dns)?;
                }
            }
            _ => {}
        }
        Ok(unsupported)
    }

    fn valid_outbounds(&self, document: &Map<String, Value>) -> Outbounds<'a> {
        let tags = document
            .get("outbounds")
            .and_then(Value::as_array)
            .map(|outbounds| {
                outbounds
                    .iter()
                    .filter_map(|o| o.get("tag").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Outbounds {
            table: self.destinations,
            tags,
        }
    }
}

/// 可用出站：去向表 + 模板中定义的出站 + DNS
struct Outbounds<'a> {
    table: &'a DestinationTable,
    tags: HashSet<String>,
}

fn check_outbound(outbounds: &Outbounds, name: &str) -> Result<()> {
    if name == DNS_OUTBOUND || outbounds.table.contains(name) || outbounds.tags.contains(name) {
        Ok(())
    } else {
        Err(RuleError::UnknownDestination(name.to_string()))
    }
}
