//! 条件树执行器
//!
//! 对条件树做短路求值，并按先序（父节点先于子节点）记录评估追踪。

use crate::evaluator::{ConditionEvaluator, Outcome};
use crate::models::{Comparison, ConditionNode, Demand, EvaluationResult};
use crate::operators::LogicalOperator;
use crate::resolver::{FieldLookup, FieldResolver};

/// 追踪中标记未识别字段的后缀
pub const FIELD_NOT_FOUND: &str = "field not found";
/// 追踪中标记类型不匹配的后缀
pub const TYPE_MISMATCH: &str = "type mismatch";

/// 规则执行器
#[derive(Debug, Clone)]
pub struct RuleExecutor {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    /// 评估一棵条件树
    pub fn execute(
        &self,
        rule_name: &str,
        condition: &ConditionNode,
        demand: &Demand,
    ) -> EvaluationResult {
        let mut result = EvaluationResult::new(rule_name);
        result.matched = self.evaluate_node(condition, demand, &mut result);
        result
    }

    /// 递归评估节点
    ///
    /// 递归深度受规则入库时校验的最大树深约束。
    fn evaluate_node(
        &self,
        node: &ConditionNode,
        demand: &Demand,
        result: &mut EvaluationResult,
    ) -> bool {
        match node {
            ConditionNode::Comparison(cmp) => self.evaluate_comparison(cmp, demand, result),
            ConditionNode::And(children) => {
                self.trace(result, || {
                    format!("{} ({} conditions)", LogicalOperator::And, children.len())
                });
                for (i, child) in children.iter().enumerate() {
                    if !self.evaluate_node(child, demand, result) {
                        self.trace(result, || {
                            format!("AND short-circuit: condition {} is false", i + 1)
                        });
                        return false;
                    }
                }
                self.trace(result, || "AND => true".to_string());
                true
            }
            ConditionNode::Or(children) => {
                self.trace(result, || {
                    format!("{} ({} conditions)", LogicalOperator::Or, children.len())
                });
                for (i, child) in children.iter().enumerate() {
                    if self.evaluate_node(child, demand, result) {
                        self.trace(result, || {
                            format!("OR short-circuit: condition {} is true", i + 1)
                        });
                        return true;
                    }
                }
                self.trace(result, || "OR => false".to_string());
                false
            }
            ConditionNode::Not(child) => {
                self.trace(result, || LogicalOperator::Not.to_string());
                let matched = !self.evaluate_node(child, demand, result);
                self.trace(result, || format!("NOT => {}", matched));
                matched
            }
        }
    }

    /// 评估比较节点
    ///
    /// 未识别的字段无论操作符为何都判为不匹配。
    fn evaluate_comparison(
        &self,
        cmp: &Comparison,
        demand: &Demand,
        result: &mut EvaluationResult,
    ) -> bool {
        let field_value = match FieldResolver::lookup(demand, &cmp.field) {
            FieldLookup::Found(value) => value,
            FieldLookup::NotFound => {
                result.fields_not_found.push(cmp.field.clone());
                self.trace(result, || format!("{} => false ({})", cmp, FIELD_NOT_FOUND));
                return false;
            }
        };

        match ConditionEvaluator::evaluate(cmp.operator, &field_value, &cmp.value) {
            Outcome::Matched(matched) => {
                self.trace(result, || format!("{} => {}", cmp, matched));
                matched
            }
            Outcome::TypeMismatch => {
                self.trace(result, || format!("{} => false ({})", cmp, TYPE_MISMATCH));
                false
            }
        }
    }

    fn trace<F>(&self, result: &mut EvaluationResult, line: F)
    where
        F: FnOnce() -> String,
    {
        if self.trace_enabled {
            result.evaluation_trace.push(line());
        }
    }
}

impl Default for RuleExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DemandPriority, DemandType};
    use crate::operators::Operator;
    use crate::value::FieldValue;

    fn create_test_demand() -> Demand {
        Demand::new()
            .with_title("Customer data warehouse")
            .with_demand_type(DemandType::CreateNew)
            .with_priority(DemandPriority::High)
            .with_asset_type("Database")
            .with_custom("users", 5000i64)
    }

    fn cmp(field: &str, op: Operator, value: impl Into<FieldValue>) -> ConditionNode {
        ConditionNode::comparison(field, op, value)
    }

    #[test]
    fn test_simple_comparison_match() {
        let executor = RuleExecutor::new().with_trace();
        let result = executor.execute(
            "db",
            &cmp("assetType", Operator::Equals, "Database"),
            &create_test_demand(),
        );

        assert!(result.matched);
        assert_eq!(
            result.evaluation_trace,
            vec![r#"assetType EQUALS "Database" => true"#]
        );
    }

    #[test]
    fn test_and_short_circuit() {
        let tree = ConditionNode::and(vec![
            cmp("priority", Operator::Equals, "LOW"),
            cmp("assetType", Operator::Equals, "Database"),
        ]);
        let result = RuleExecutor::new()
            .with_trace()
            .execute("r", &tree, &create_test_demand());

        assert!(!result.matched);
        assert_eq!(
            result.evaluation_trace,
            vec![
                "AND (2 conditions)".to_string(),
                r#"priority EQUALS "LOW" => false"#.to_string(),
                "AND short-circuit: condition 1 is false".to_string(),
            ]
        );
    }

    #[test]
    fn test_or_short_circuit() {
        let tree = ConditionNode::or(vec![
            cmp("priority", Operator::Equals, "HIGH"),
            cmp("assetType", Operator::Equals, "Server"),
        ]);
        let result = RuleExecutor::new()
            .with_trace()
            .execute("r", &tree, &create_test_demand());

        assert!(result.matched);
        // 第二个条件不会被评估
        assert!(!result.evaluation_trace.iter().any(|t| t.contains("Server")));
        assert!(result.evaluation_trace.iter().any(|t| t.contains("short-circuit")));
    }

    #[test]
    fn test_pre_order_trace() {
        let tree = ConditionNode::and(vec![
            ConditionNode::not(cmp("assetOwner", Operator::IsNotNull, FieldValue::Null)),
            ConditionNode::or(vec![cmp("custom.users", Operator::GreaterThan, 1000i64)]),
        ]);
        let result = RuleExecutor::new()
            .with_trace()
            .execute("r", &tree, &create_test_demand());

        assert!(result.matched);
        assert_eq!(result.evaluation_trace[0], "AND (2 conditions)");
        assert_eq!(result.evaluation_trace[1], "NOT");
        assert_eq!(result.evaluation_trace[2], "assetOwner IS_NOT_NULL null => false");
        assert_eq!(result.evaluation_trace[3], "NOT => true");
        assert_eq!(result.evaluation_trace[4], "OR (1 conditions)");
        assert_eq!(result.evaluation_trace[5], "custom.users GREATER_THAN 1000 => true");
    }

    #[test]
    fn test_double_negation_is_identity() {
        let demand = create_test_demand();
        let executor = RuleExecutor::new();
        let conditions = vec![
            cmp("priority", Operator::Equals, "HIGH"),
            cmp("priority", Operator::Equals, "LOW"),
            cmp("custom.users", Operator::Contains, "x"),
            cmp("assetOwner2", Operator::IsNull, FieldValue::Null),
            ConditionNode::or(vec![
                cmp("assetType", Operator::StartsWith, "Data"),
                cmp("title", Operator::IsNull, FieldValue::Null),
            ]),
        ];

        for x in conditions {
            let plain = executor.execute("x", &x, &demand).matched;
            let double = executor
                .execute("x", &ConditionNode::not(ConditionNode::not(x.clone())), &demand)
                .matched;
            assert_eq!(plain, double, "NOT(NOT(X)) differs for {:?}", x);
        }
    }

    #[test]
    fn test_unknown_field_never_matches() {
        let demand = create_test_demand().with_asset_owner("alice");
        let executor = RuleExecutor::new().with_trace();

        for op in [Operator::IsNull, Operator::IsNotNull, Operator::NotEquals] {
            let result = executor.execute("typo", &cmp("assetOwner2", op, "alice"), &demand);
            assert!(!result.matched);
            assert_eq!(result.fields_not_found, vec!["assetOwner2"]);
            assert!(result.evaluation_trace[0].contains(FIELD_NOT_FOUND));
        }
    }

    #[test]
    fn test_type_mismatch_traced() {
        let result = RuleExecutor::new().with_trace().execute(
            "r",
            &cmp("custom.users", Operator::StartsWith, "5"),
            &create_test_demand(),
        );

        assert!(!result.matched);
        assert!(result.evaluation_trace[0].ends_with("(type mismatch)"));
    }

    #[test]
    fn test_trace_disabled() {
        let result = RuleExecutor::new().execute(
            "r",
            &cmp("assetType", Operator::Equals, "Database"),
            &create_test_demand(),
        );
        assert!(result.matched);
        assert!(result.evaluation_trace.is_empty());
    }
}
