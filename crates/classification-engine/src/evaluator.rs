//! 条件评估器
//!
//! 实现各操作符的比较语义。类型不兼容的比较不会报错，而是返回
//! [`Outcome::TypeMismatch`]，由调用方按 `false` 处理并记入追踪。

use crate::operators::Operator;
use crate::value::FieldValue;

/// 单次比较的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Matched(bool),
    TypeMismatch,
}

impl Outcome {
    /// 折算为布尔值，类型不匹配视为 false
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(true))
    }
}

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估比较
    ///
    /// # Arguments
    /// * `operator` - 操作符
    /// * `field_value` - 从记录中解析出的字段值
    /// * `rule_value` - 规则中定义的期望值
    pub fn evaluate(operator: Operator, field_value: &FieldValue, rule_value: &FieldValue) -> Outcome {
        if !operator.accepted_field_tags().contains(&field_value.tag()) {
            return Outcome::TypeMismatch;
        }

        match operator {
            Operator::IsNull => Outcome::Matched(field_value.is_null()),
            Operator::IsNotNull => Outcome::Matched(!field_value.is_null()),
            Operator::Equals => Outcome::Matched(Self::eq(field_value, rule_value)),
            Operator::NotEquals => Outcome::Matched(!Self::eq(field_value, rule_value)),
            Operator::Contains => Self::string_test(field_value, rule_value, |s, p| s.contains(p)),
            Operator::NotContains => {
                Self::string_test(field_value, rule_value, |s, p| !s.contains(p))
            }
            Operator::StartsWith => {
                Self::string_test(field_value, rule_value, |s, p| s.starts_with(p))
            }
            Operator::EndsWith => Self::string_test(field_value, rule_value, |s, p| s.ends_with(p)),
            Operator::GreaterThan => Self::compare(field_value, rule_value, |a, b| a > b),
            Operator::LessThan => Self::compare(field_value, rule_value, |a, b| a < b),
            Operator::GreaterThanOrEqual => Self::compare(field_value, rule_value, |a, b| a >= b),
            Operator::LessThanOrEqual => Self::compare(field_value, rule_value, |a, b| a <= b),
            Operator::In => Self::in_list(field_value, rule_value),
            Operator::NotIn => match Self::in_list(field_value, rule_value) {
                Outcome::Matched(found) => Outcome::Matched(!found),
                Outcome::TypeMismatch => Outcome::TypeMismatch,
            },
        }
    }

    /// 相等比较
    ///
    /// 任一侧为数字时按数值比较（字符串 "10" 与 10、10.0 相等）；
    /// 字符串区分大小写；不同类型的值不相等。
    fn eq(field: &FieldValue, expected: &FieldValue) -> bool {
        let numeric_side = matches!(field, FieldValue::Number(_))
            || matches!(expected, FieldValue::Number(_));
        if numeric_side {
            if let (Some(a), Some(b)) = (field.as_number(), expected.as_number()) {
                return a == b;
            }
        }

        field == expected
    }

    /// 字符串测试（包含、前缀、后缀）
    fn string_test<F>(field: &FieldValue, expected: &FieldValue, test: F) -> Outcome
    where
        F: Fn(&str, &str) -> bool,
    {
        match (field.as_str(), expected.as_str()) {
            (Some(s), Some(p)) => Outcome::Matched(test(s, p)),
            _ => Outcome::TypeMismatch,
        }
    }

    /// 数值比较
    fn compare<F>(field: &FieldValue, expected: &FieldValue, cmp: F) -> Outcome
    where
        F: Fn(f64, f64) -> bool,
    {
        match (field.as_number(), expected.as_number()) {
            (Some(a), Some(b)) => Outcome::Matched(cmp(a, b)),
            _ => Outcome::TypeMismatch,
        }
    }

    /// 列表成员检查
    fn in_list(field: &FieldValue, expected: &FieldValue) -> Outcome {
        let Some(items) = expected.as_list() else {
            return Outcome::TypeMismatch;
        };

        match field {
            FieldValue::String(s) => Outcome::Matched(items.iter().any(|item| item == s)),
            FieldValue::Number(n) => Outcome::Matched(
                items
                    .iter()
                    .any(|item| item.trim().parse::<f64>().map(|v| v == *n).unwrap_or(false)),
            ),
            _ => Outcome::TypeMismatch,
        }
    }
}
