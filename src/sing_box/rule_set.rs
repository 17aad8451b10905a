//! # rule-set 提取
//!
//! 规则条件较多的路由规则会拖慢 sing-box 的规则匹配。提取器把这类规则的
//! 匹配字段搬到单独的 rule-set 中，原规则只保留 `rule_set: [tag]` 引用。
//!
//! - 默认规则：匹配条件总数不少于 `min_size` 时整体提取
//! - 逻辑规则：先递归处理子规则；若每个子规则都只剩一个新提取的引用，
//!   就把这些子规则合并成一个逻辑 rule-set，整个节点替换为一个引用；
//!   否则子规则各自保留提取结果，节点本身不再合并
//!
//! 提取是纯变换：输入规则列表，输出新规则列表和提取出的 rule-set。

use std::collections::HashSet;

use log::debug;
use serde_json::{json, Map, Value};

use super::rule::{DefaultRule, LogicalMode, LogicalRule, RuleNode, SingBoxRule};
use crate::error::{Result, RuleError};

/// 默认提取阈值
pub const DEFAULT_MIN_SIZE: usize = 10;

// ========================================
// 数据结构
// ========================================

/// 提取出的 rule-set
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSetLiteral {
    pub tag: String,
    /// 无动作的规则：默认规则或逻辑规则
    pub content: RuleNode,
}

impl RuleSetLiteral {
    /// sing-box rule-set 源文件内容
    pub fn to_source(&self, version: u8) -> Value {
        json!({
            "version": version,
            "rules": [self.content.to_value()],
        })
    }
}

/// 提取结果
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub rules: Vec<SingBoxRule>,
    pub literals: Vec<RuleSetLiteral>,
}

// ========================================
// 提取器
// ========================================

/// rule-set 提取器
#[derive(Debug, Clone)]
pub struct Extractor {
    pub min_size: usize,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
        }
    }
}

impl Extractor {
    pub fn new(min_size: usize) -> Self {
        Self { min_size }
    }

    /// 提取整组路由规则
    ///
    /// tag 由去向名和规则位置组成，同一次提取中必须唯一，重复时返回
    /// [`RuleError::RuleSetConflict`]。
    pub fn extract(&self, rules: Vec<SingBoxRule>) -> Result<Extraction> {
        let mut literals = Vec::new();
        let mut extracted = Vec::with_capacity(rules.len());

        for (index, rule) in rules.into_iter().enumerate() {
            let path = format!("{}-{}", slug(rule.action.name()), index);
            let (node, _) = self.extract_node(rule.node, &path, &mut literals);
            extracted.push(SingBoxRule::new(rule.action, node));
        }

        let mut seen = HashSet::new();
        for literal in &literals {
            if !seen.insert(literal.tag.as_str()) {
                return Err(RuleError::RuleSetConflict(literal.tag.clone()));
            }
        }

        debug!("extracted {} rule-sets", literals.len());
        Ok(Extraction {
            rules: extracted,
            literals,
        })
    }

    /// 返回新节点，以及该节点是否已完全变成一个新提取的引用
    fn extract_node(
        &self,
        node: RuleNode,
        path: &str,
        literals: &mut Vec<RuleSetLiteral>,
    ) -> (RuleNode, bool) {
        match node {
            RuleNode::Default(rule) => {
                if rule.cardinality() < self.min_size {
                    return (RuleNode::Default(rule), false);
                }
                let DefaultRule {
                    matchers,
                    mut rule_set,
                    extra,
                } = rule;
                let reduced = rule_set.is_empty() && extra.is_empty();

                literals.push(RuleSetLiteral {
                    tag: path.to_string(),
                    content: RuleNode::Default(DefaultRule {
                        matchers,
                        ..Default::default()
                    }),
                });
                rule_set.push(path.to_string());

                let node = RuleNode::Default(DefaultRule {
                    matchers: Default::default(),
                    rule_set,
                    extra,
                });
                (node, reduced)
            }
            RuleNode::Logical(LogicalRule { mode, rules, extra }) => {
                let count = rules.len();
                let mut children = Vec::with_capacity(count);
                let mut all_reduced = count > 0;

                for (index, child) in rules.into_iter().enumerate() {
                    let (child, reduced) =
                        self.extract_node(child, &format!("{}-{}", path, index), literals);
                    all_reduced &= reduced;
                    children.push(child);
                }

                if !all_reduced {
                    return (
                        RuleNode::Logical(LogicalRule {
                            mode,
                            rules: children,
                            extra,
                        }),
                        false,
                    );
                }

                // 每个完全提取的子规则恰好贡献了最后的一个 rule-set
                let merged = literals.split_off(literals.len() - count);
                literals.push(merge(path, mode, merged));

                let reduced = extra.is_empty();
                let node = RuleNode::Default(DefaultRule {
                    rule_set: vec![path.to_string()],
                    extra,
                    ..Default::default()
                });
                (node, reduced)
            }
        }
    }
}

fn merge(tag: &str, mode: LogicalMode, literals: Vec<RuleSetLiteral>) -> RuleSetLiteral {
    RuleSetLiteral {
        tag: tag.to_string(),
        content: RuleNode::Logical(LogicalRule {
            mode,
            rules: literals.into_iter().map(|l| l.content).collect(),
            extra: Map::new(),
        }),
    }
}

/// 去向名转为 tag 前缀：小写字母数字，其余字符折叠为 `-`
fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "rule".to_string()
    } else {
        slug.to_string()
    }
}

// ========================================
// 测试模块
// ========================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::sing_box::rule::RuleAction;

    fn leaf(key: &str, n: usize) -> RuleNode {
        let mut rule = DefaultRule::default();
        for i in 0..n {
            rule.push(key, Value::from(format!("d{i}.com")));
        }
        RuleNode::Default(rule)
    }

    fn route(outbound: &str, node: RuleNode) -> SingBoxRule {
        SingBoxRule::new(RuleAction::Route(outbound.to_string()), node)
    }

    fn logical(mode: LogicalMode, rules: Vec<RuleNode>) -> RuleNode {
        RuleNode::Logical(LogicalRule {
            mode,
            rules,
            extra: Map::new(),
        })
    }

    #[test]
    fn test_below_threshold_untouched() {
        let rules = vec![route("PROXY", leaf("domain", 9))];
        let extraction = Extractor::default().extract(rules.clone()).unwrap();
        assert!(extraction.literals.is_empty());
        assert_eq!(extraction.rules, rules);
    }

    #[test]
    fn test_at_threshold_replaced_by_reference() {
        let rules = vec![route("PROXY", leaf("domain", 10))];
        let extraction = Extractor::default().extract(rules).unwrap();
        assert_eq!(extraction.literals.len(), 1);
        assert_eq!(extraction.literals[0].tag, "proxy-0");
        assert_eq!(extraction.literals[0].content.cardinality(), 10);
        assert_eq!(
            extraction.rules[0].to_value(),
            json!({"action": "route", "outbound": "PROXY", "rule_set": ["proxy-0"]})
        );
    }

    #[test]
    fn test_logical_fully_extractable_merged() {
        let node = logical(LogicalMode::Or, vec![leaf("process_name", 3), leaf("domain", 5)]);
        let extraction = Extractor::new(3).extract(vec![route("Streaming", node)]).unwrap();
        assert_eq!(extraction.literals.len(), 1);

        let literal = &extraction.literals[0];
        assert_eq!(literal.tag, "streaming-0");
        let source = literal.to_source(3);
        assert_eq!(source["version"], json!(3));
        assert_eq!(source["rules"][0]["type"], json!("logical"));
        assert_eq!(source["rules"][0]["mode"], json!("or"));
        assert_eq!(source["rules"][0]["rules"][1]["domain"].as_array().unwrap().len(), 5);

        assert_eq!(extraction.rules[0].to_value()["rule_set"], json!(["streaming-0"]));
    }

    #[test]
    fn test_logical_mixed_not_collapsed() {
        let node = logical(LogicalMode::Or, vec![leaf("process_name", 2), leaf("domain", 20)]);
        let extraction = Extractor::default().extract(vec![route("PROXY", node)]).unwrap();
        assert_eq!(extraction.literals.len(), 1);
        assert_eq!(extraction.literals[0].tag, "proxy-0-1");

        let value = extraction.rules[0].to_value();
        assert_eq!(value["type"], json!("logical"));
        assert_eq!(value["rules"][0]["process_name"].as_array().unwrap().len(), 2);
        assert_eq!(value["rules"][1], json!({"rule_set": ["proxy-0-1"]}));
    }

    #[test]
    fn test_nested_logical_merged_once() {
        let inner = logical(LogicalMode::And, vec![leaf("domain", 10), leaf("port", 10)]);
        let outer = logical(LogicalMode::Or, vec![inner, leaf("domain_suffix", 10)]);
        let extraction = Extractor::default().extract(vec![route("DIRECT", outer)]).unwrap();
        assert_eq!(extraction.literals.len(), 1);
        assert_eq!(extraction.literals[0].tag, "direct-0");
        assert_eq!(extraction.literals[0].content.cardinality(), 30);
    }

    #[test]
    fn test_extra_fields_kept_on_reference() {
        let mut rule = DefaultRule::default();
        for i in 0..10 {
            rule.push("domain", Value::from(format!("d{i}.com")));
        }
        rule.extra.insert("invert".into(), json!(true));
        let node = logical(
            LogicalMode::Or,
            vec![RuleNode::Default(rule), leaf("domain_suffix", 10)],
        );

        let extraction = Extractor::default().extract(vec![route("PROXY", node)]).unwrap();
        // 带 invert 的子规则不是纯引用，逻辑规则不合并
        assert_eq!(extraction.literals.len(), 2);
        let value = extraction.rules[0].to_value();
        assert_eq!(value["rules"][0], json!({"invert": true, "rule_set": ["proxy-0-0"]}));
    }

    #[test]
    fn test_tag_conflict() {
        // "x" 第 1 条规则的第 0 个子规则与 "x-1" 第 0 条规则同为 x-1-0
        let rules = vec![
            route("x-1", leaf("domain", 10)),
            route("x", logical(LogicalMode::Or, vec![leaf("domain", 10), leaf("domain", 2)])),
        ];
        let err = Extractor::default().extract(rules).unwrap_err();
        assert!(matches!(err, RuleError::RuleSetConflict(tag) if tag == "x-1-0"));
    }

    #[test]
    fn test_reject_and_unicode_slugs() {
        let rules = vec![
            SingBoxRule::new(RuleAction::Reject, leaf("domain", 10)),
            route("🇯🇵 Japan", leaf("domain", 10)),
            route("🎬", leaf("domain", 10)),
        ];
        let extraction = Extractor::default().extract(rules).unwrap();
        let tags: Vec<_> = extraction.literals.iter().map(|l| l.tag.as_str()).collect();
        assert_eq!(tags, vec!["reject-0", "japan-1", "rule-2"]);
    }
}
