//! 规则操作符定义

use crate::value::ValueTag;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 比较操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    // 通用比较
    Equals,
    NotEquals,

    // 字符串操作
    Contains,
    NotContains,
    StartsWith,
    EndsWith,

    // 数值比较
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,

    // 列表成员
    In,
    NotIn,

    // 空值检查
    IsNull,
    IsNotNull,
}

impl Operator {
    pub const ALL: [Operator; 14] = [
        Self::Equals,
        Self::NotEquals,
        Self::Contains,
        Self::NotContains,
        Self::StartsWith,
        Self::EndsWith,
        Self::GreaterThan,
        Self::LessThan,
        Self::GreaterThanOrEqual,
        Self::LessThanOrEqual,
        Self::In,
        Self::NotIn,
        Self::IsNull,
        Self::IsNotNull,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "EQUALS",
            Self::NotEquals => "NOT_EQUALS",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::StartsWith => "STARTS_WITH",
            Self::EndsWith => "ENDS_WITH",
            Self::GreaterThan => "GREATER_THAN",
            Self::LessThan => "LESS_THAN",
            Self::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            Self::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::IsNull => "IS_NULL",
            Self::IsNotNull => "IS_NOT_NULL",
        }
    }

    /// 被比较字段（左侧）可接受的类型标签
    ///
    /// 数值比较额外接受字符串，前提是其内容可解析为数字，由评估器在运行时判断。
    pub fn accepted_field_tags(&self) -> &'static [ValueTag] {
        use ValueTag::*;
        match self {
            Self::Equals | Self::NotEquals | Self::IsNull | Self::IsNotNull => {
                &[String, Number, Bool, Null, List]
            }
            Self::Contains | Self::NotContains | Self::StartsWith | Self::EndsWith => &[String],
            Self::GreaterThan
            | Self::LessThan
            | Self::GreaterThanOrEqual
            | Self::LessThanOrEqual => &[Number, String],
            Self::In | Self::NotIn => &[String, Number],
        }
    }

    /// 规则值（右侧）可接受的类型标签
    pub fn accepted_rule_tags(&self) -> &'static [ValueTag] {
        use ValueTag::*;
        match self {
            Self::Equals | Self::NotEquals => &[String, Number, Bool, Null, List],
            Self::Contains | Self::NotContains | Self::StartsWith | Self::EndsWith => &[String],
            Self::GreaterThan
            | Self::LessThan
            | Self::GreaterThanOrEqual
            | Self::LessThanOrEqual => &[Number, String],
            Self::In | Self::NotIn => &[List],
            // 空值检查忽略规则值
            Self::IsNull | Self::IsNotNull => &[String, Number, Bool, Null, List],
        }
    }

    /// 是否忽略规则值
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 未识别的操作符
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperator(pub String);

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperator(s.to_string()))
    }
}

/// 逻辑操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Not => write!(f, "NOT"),
        }
    }
}
