//! # 路由规则
//!
//! [`RouteRule`] = 一组规则条件 + 一个去向（出站 / 策略组名，或拒绝）。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::matcher::Matcher;
use crate::error::{Result, RuleError};

/// 配置中表示拒绝的去向名
pub const REJECT: &str = "REJECT";

/// 三种目标都内置的去向名
pub const DEFAULT_DESTINATIONS: [&str; 3] = ["PROXY", "DIRECT", REJECT];

// ========================================
// 去向
// ========================================

/// 规则命中后的去向
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// 指定名称的出站或策略组
    Outbound(String),
    /// 拒绝连接
    Reject,
}

impl Destination {
    pub fn parse(name: &str) -> Self {
        if name == REJECT {
            Destination::Reject
        } else {
            Destination::Outbound(name.to_string())
        }
    }

    /// 配置中的名称
    pub fn name(&self) -> &str {
        match self {
            Destination::Outbound(name) => name,
            Destination::Reject => REJECT,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for Destination {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Destination::parse(&name))
    }
}

// ========================================
// 路由规则
// ========================================

/// 一条路由规则：条件之间在目标客户端中逐条展开
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub destination: Destination,
    pub matchers: Vec<Matcher>,
}

impl RouteRule {
    pub fn new(destination: Destination, matchers: Vec<Matcher>) -> Self {
        Self {
            destination,
            matchers,
        }
    }

    /// 把占位去向替换为目标客户端中的实际名称
    pub fn rename_destination(&mut self, from: &str, to: &str) {
        if let Destination::Outbound(ref mut name) = self.destination {
            if name == from {
                *name = to.to_string();
            }
        }
    }
}

// ========================================
// 去向名称表
// ========================================

/// 可用的去向名称（代理和策略组名由外部提供）
#[derive(Debug, Clone)]
pub struct DestinationTable {
    names: BTreeSet<String>,
}

impl DestinationTable {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table: BTreeSet<String> =
            DEFAULT_DESTINATIONS.iter().map(|s| s.to_string()).collect();
        table.extend(names.into_iter().map(Into::into));
        Self { names: table }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// 校验去向是否存在
    pub fn check(&self, destination: &Destination) -> Result<()> {
        match destination {
            Destination::Reject => Ok(()),
            Destination::Outbound(name) if self.contains(name) => Ok(()),
            Destination::Outbound(name) => Err(RuleError::UnknownDestination(name.clone())),
        }
    }
}

// ========================================
// 测试模块
// ========================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_parse() {
        assert_eq!(Destination::parse("REJECT"), Destination::Reject);
        assert_eq!(
            Destination::parse("🇯🇵 Japan"),
            Destination::Outbound("🇯🇵 Japan".to_string())
        );
        let d: Destination = serde_yaml::from_str("REJECT").unwrap();
        assert_eq!(d, Destination::Reject);
    }

    #[test]
    fn test_rename_destination_only_touches_copy() {
        let original = RouteRule::new(Destination::parse("PROXY"), vec![]);
        let mut copy = original.clone();
        copy.rename_destination("PROXY", "PROXY-PER-REGION");
        assert_eq!(copy.destination.name(), "PROXY-PER-REGION");
        assert_eq!(original.destination.name(), "PROXY");

        let mut reject = RouteRule::new(Destination::Reject, vec![]);
        reject.rename_destination("REJECT", "block");
        assert_eq!(reject.destination, Destination::Reject);
    }

    #[test]
    fn test_destination_table() {
        let table = DestinationTable::new(["Streaming"]);
        assert!(table.check(&Destination::parse("DIRECT")).is_ok());
        assert!(table.check(&Destination::parse("Streaming")).is_ok());
        assert!(table.check(&Destination::Reject).is_ok());
        assert!(matches!(
            table.check(&Destination::parse("Nope")),
            Err(RuleError::UnknownDestination(n)) if n == "Nope"
        ));
    }
}
