//! # sing-box 路由规则树
//!
//! sing-box 的路由规则是 JSON 对象，分两种：
//! - 默认规则：`{"domain_suffix": [...], "ip_cidr": [...], "rule_set": [...]}`，
//!   同一字段内为“或”，不同字段之间为“与”
//! - 逻辑规则：`{"type": "logical", "mode": "and|or", "rules": [...]}`
//!
//! 这里用 [`RuleNode`] 表示规则树，与 `serde_json::Value` 互相转换。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, RuleError};
use crate::rule::kind;

// ========================================
// 规则动作
// ========================================

/// 命中后的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// 路由到指定出站
    Route(String),
    /// 拒绝
    Reject,
}

impl RuleAction {
    /// 用于生成 rule-set tag 的名字
    pub fn name(&self) -> &str {
        match self {
            RuleAction::Route(outbound) => outbound,
            RuleAction::Reject => "reject",
        }
    }
}

/// 逻辑规则的组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalMode {
    And,
    #[default]
    Or,
}

impl LogicalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LogicalMode::And => "and",
            LogicalMode::Or => "or",
        }
    }
}

// ========================================
// 规则节点
// ========================================

/// 默认规则（非逻辑规则）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultRule {
    /// 匹配字段 -> 取值列表
    pub matchers: BTreeMap<String, Vec<Value>>,
    /// 引用的 rule-set tag
    pub rule_set: Vec<String>,
    /// 其他字段（`invert` 等），原样保留
    pub extra: Map<String, Value>,
}

impl DefaultRule {
    /// 追加一个匹配条件
    pub fn push(&mut self, key: &str, value: Value) {
        self.matchers.entry(key.to_string()).or_default().push(value);
    }

    /// 匹配条件的总个数
    pub fn cardinality(&self) -> usize {
        self.matchers.values().map(Vec::len).sum()
    }

    /// 只剩一个 rule-set 引用、没有其他字段
    pub fn is_bare_reference(&self) -> bool {
        self.matchers.is_empty() && self.extra.is_empty() && self.rule_set.len() == 1
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty() && self.rule_set.is_empty()
    }
}

/// 逻辑规则
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalRule {
    pub mode: LogicalMode,
    pub rules: Vec<RuleNode>,
    pub extra: Map<String, Value>,
}

/// 规则树节点
#[derive(Debug, Clone, PartialEq)]
pub enum RuleNode {
    Default(DefaultRule),
    Logical(LogicalRule),
}

impl RuleNode {
    /// 转为 sing-box JSON 对象
    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }

    fn to_map(&self) -> Map<String, Value> {
        match self {
            RuleNode::Default(rule) => {
                let mut map = rule.extra.clone();
                for (key, values) in &rule.matchers {
                    map.insert(key.clone(), Value::Array(values.clone()));
                }
                if !rule.rule_set.is_empty() {
                    let tags = rule.rule_set.iter().cloned().map(Value::String).collect();
                    map.insert("rule_set".to_string(), Value::Array(tags));
                }
                map
            }
            RuleNode::Logical(rule) => {
                let mut map = rule.extra.clone();
                map.insert("type".to_string(), Value::from("logical"));
                map.insert("mode".to_string(), Value::from(rule.mode.as_str()));
                let rules = rule.rules.iter().map(RuleNode::to_value).collect();
                map.insert("rules".to_string(), Value::Array(rules));
                map
            }
        }
    }

    /// 从 sing-box JSON 对象解析
    ///
    /// 不认识的字段进入 `extra`，动作字段（`action` / `outbound`）也视为普通字段。
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| RuleError::Parse(format!("sing-box rule must be an object: {value}")))?;

        if map.get("type").and_then(Value::as_str) == Some("logical") {
            let mode = match map.get("mode").and_then(Value::as_str) {
                Some("and") => LogicalMode::And,
                Some("or") => LogicalMode::Or,
                other => {
                    return Err(RuleError::Parse(format!(
                        "invalid logical rule mode: {:?}",
                        other
                    )))
                }
            };
            let rules = map
                .get("rules")
                .and_then(Value::as_array)
                .ok_or_else(|| RuleError::Parse("logical rule requires `rules`".to_string()))?
                .iter()
                .map(RuleNode::from_value)
                .collect::<Result<Vec<_>>>()?;
            let extra = map
                .iter()
                .filter(|(k, _)| !matches!(k.as_str(), "type" | "mode" | "rules"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            return Ok(RuleNode::Logical(LogicalRule { mode, rules, extra }));
        }

        let mut rule = DefaultRule::default();
        for (key, value) in map {
            if key == "rule_set" {
                rule.rule_set = string_list(value)?;
            } else if kind::is_matcher_key(key) {
                let values = match value {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                rule.matchers.insert(key.clone(), values);
            } else {
                rule.extra.insert(key.clone(), value.clone());
            }
        }
        Ok(RuleNode::Default(rule))
    }

    /// 匹配条件总数（逻辑规则为各子规则之和）
    pub fn cardinality(&self) -> usize {
        match self {
            RuleNode::Default(rule) => rule.cardinality(),
            RuleNode::Logical(rule) => rule.rules.iter().map(RuleNode::cardinality).sum(),
        }
    }
}

fn string_list(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    RuleError::Parse(format!("rule_set entry must be a string: {item}"))
                })
            })
            .collect(),
        other => Err(RuleError::Parse(format!("invalid rule_set: {other}"))),
    }
}

// ========================================
// 带动作的路由规则
// ========================================

/// `route.rules` 中的一条规则
#[derive(Debug, Clone, PartialEq)]
pub struct SingBoxRule {
    pub action: RuleAction,
    pub node: RuleNode,
}

impl SingBoxRule {
    pub fn new(action: RuleAction, node: RuleNode) -> Self {
        Self { action, node }
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.node.to_map();
        match self.action {
            RuleAction::Route(ref outbound) => {
                map.insert("action".to_string(), Value::from("route"));
                map.insert("outbound".to_string(), Value::from(outbound.as_str()));
            }
            RuleAction::Reject => {
                map.insert("action".to_string(), Value::from("reject"));
            }
        }
        Value::Object(map)
    }

    /// 解析带动作的规则；没有 `action` 但有 `outbound` 的旧写法视为 route
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut map = value
            .as_object()
            .cloned()
            .ok_or_else(|| RuleError::Parse(format!("sing-box rule must be an object: {value}")))?;

        let action = map.remove("action");
        let outbound = map.remove("outbound");
        let action = match (action.as_ref().and_then(Value::as_str), outbound) {
            (Some("reject"), _) => RuleAction::Reject,
            (Some("route") | None, Some(Value::String(outbound))) => RuleAction::Route(outbound),
            (action, _) => {
                return Err(RuleError::Parse(format!(
                    "unsupported rule action {:?} in {}",
                    action, value
                )))
            }
        };

        let node = RuleNode::from_value(&Value::Object(map))?;
        Ok(Self { action, node })
    }
}

// ========================================
// 测试模块
// ========================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_rule_to_value() {
        let mut rule = DefaultRule::default();
        rule.push("domain_suffix", json!("example.com"));
        rule.push("domain_suffix", json!("example.org"));
        rule.push("port", json!(443));
        let value =
            SingBoxRule::new(RuleAction::Route("PROXY".into()), RuleNode::Default(rule)).to_value();
        assert_eq!(
            value,
            json!({
                "action": "route",
                "outbound": "PROXY",
                "domain_suffix": ["example.com", "example.org"],
                "port": [443],
            })
        );
    }

    #[test]
    fn test_logical_rule_round_trip() {
        let value = json!({
            "type": "logical",
            "mode": "or",
            "rules": [
                {"process_name": ["curl"]},
                {"domain": "example.com", "invert": true},
            ],
            "action": "reject",
        });
        let rule = SingBoxRule::from_value(&value).unwrap();
        assert_eq!(rule.action, RuleAction::Reject);
        let RuleNode::Logical(ref logical) = rule.node else {
            panic!("expected logical rule");
        };
        assert_eq!(logical.mode, LogicalMode::Or);
        let RuleNode::Default(ref second) = logical.rules[1] else {
            panic!("expected default rule");
        };
        assert_eq!(second.matchers["domain"], vec![json!("example.com")]);
        assert_eq!(second.extra["invert"], json!(true));

        let back = rule.to_value();
        assert_eq!(back["rules"][1]["domain"], json!(["example.com"]));
        assert_eq!(back["action"], json!("reject"));
        assert_eq!(rule.node.cardinality(), 2);
    }

    #[test]
    fn test_legacy_outbound_without_action() {
        let rule =
            SingBoxRule::from_value(&json!({"outbound": "DIRECT", "rule_set": "geosite-cn"}))
                .unwrap();
        assert_eq!(rule.action, RuleAction::Route("DIRECT".into()));
        let RuleNode::Default(ref node) = rule.node else {
            panic!("expected default rule");
        };
        assert!(node.is_bare_reference());
    }

    #[test]
    fn test_unsupported_action() {
        assert!(SingBoxRule::from_value(&json!({"action": "sniff"})).is_err());
        let xor = json!({"type": "logical", "mode": "xor", "rules": []});
        assert!(RuleNode::from_value(&xor).is_err());
    }
}
