//! 规则编译器
//!
//! 将规则文档解析并校验为内存中的条件树。深度、字段白名单、操作符白名单、
//! 值类型与置信度范围都在这里检查，不合格的规则不会进入仓储，也就不会被评估。

use crate::document::{ConditionDocument, RuleDocument};
use crate::error::ValidationIssue;
use crate::models::{Classification, Comparison, ConditionNode, RuleDraft};
use crate::operators::Operator;
use crate::resolver::FieldResolver;
use crate::value::{FieldValue, ValueTag};
use validator::Validate;

/// 默认最大树深
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// 规则编译器
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    max_depth: usize,
}

impl RuleCompiler {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// 从 JSON 字符串编译单条规则
    pub fn compile_from_json(&self, json: &str) -> crate::error::Result<RuleDraft> {
        let doc: RuleDocument = serde_json::from_str(json)?;
        self.compile(&doc).map_err(|issues| {
            crate::error::RuleError::Validation(vec![crate::error::RuleValidationError {
                index: 0,
                rule_name: doc.name.clone(),
                issues,
            }])
        })
    }

    /// 编译规则文档，收集全部问题后一次性返回
    pub fn compile(&self, doc: &RuleDocument) -> Result<RuleDraft, Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        if let Err(errors) = doc.validate() {
            let mut field_errors: Vec<_> = errors.field_errors().into_iter().collect();
            field_errors.sort_by(|a, b| a.0.cmp(&b.0));
            for (field, errs) in field_errors {
                for err in errs.iter() {
                    issues.push(ValidationIssue::InvalidAttribute {
                        field: field.to_string(),
                        message: err
                            .message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| err.code.to_string()),
                    });
                }
            }
        }

        let classification = match doc.classification.parse::<Classification>() {
            Ok(c) => Some(c),
            Err(message) => {
                issues.push(ValidationIssue::InvalidAttribute {
                    field: "classification".to_string(),
                    message,
                });
                None
            }
        };

        if let Some(issue) = Self::check_confidence(doc.confidence_score) {
            issues.push(issue);
        }

        let condition = self.compile_condition(&doc.condition).map_err(|mut cond_issues| {
            issues.append(&mut cond_issues);
        });

        match (issues.is_empty(), classification, condition) {
            (true, Some(classification), Ok(condition)) => Ok(RuleDraft {
                name: doc.name.clone(),
                description: doc.description.clone(),
                condition,
                classification,
                confidence_score: doc.confidence_score,
                priority: doc.priority,
            }),
            _ => Err(issues),
        }
    }

    /// 编译条件树
    ///
    /// 先用迭代方式检查深度，超限时不再递归转换。
    pub fn compile_condition(
        &self,
        doc: &ConditionDocument,
    ) -> Result<ConditionNode, Vec<ValidationIssue>> {
        let depth = doc.depth();
        if depth > self.max_depth {
            return Err(vec![ValidationIssue::DepthExceeded {
                depth,
                max: self.max_depth,
            }]);
        }

        let mut issues = Vec::new();
        let node = Self::convert_node(doc, "condition", &mut issues);
        match node {
            Some(node) if issues.is_empty() => Ok(node),
            _ => Err(issues),
        }
    }

    /// 校验直接构造的规则草稿
    pub fn validate_draft(&self, draft: &RuleDraft) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if draft.name.is_empty() || draft.name.chars().count() > 100 {
            issues.push(ValidationIssue::InvalidAttribute {
                field: "name".to_string(),
                message: "规则名称长度必须在1-100个字符之间".to_string(),
            });
        }

        if let Some(issue) = Self::check_confidence(draft.confidence_score) {
            issues.push(issue);
        }

        let depth = draft.condition.depth();
        if depth > self.max_depth {
            issues.push(ValidationIssue::DepthExceeded {
                depth,
                max: self.max_depth,
            });
            return issues;
        }

        let mut stack = vec![(&draft.condition, "condition".to_string())];
        while let Some((node, path)) = stack.pop() {
            match node {
                ConditionNode::Comparison(cmp) => {
                    issues.extend(Self::check_comparison(&path, cmp));
                }
                ConditionNode::And(children) | ConditionNode::Or(children) => {
                    if children.is_empty() {
                        issues.push(ValidationIssue::MalformedNode {
                            path: path.clone(),
                            reason: "逻辑组至少需要一个子条件".to_string(),
                        });
                    }
                    for (i, child) in children.iter().enumerate() {
                        stack.push((child, format!("{}.conditions[{}]", path, i)));
                    }
                }
                ConditionNode::Not(child) => {
                    stack.push((child, format!("{}.conditions[0]", path)));
                }
            }
        }

        issues
    }

    fn check_confidence(score: f64) -> Option<ValidationIssue> {
        if (0.0..=1.0).contains(&score) {
            None
        } else {
            Some(ValidationIssue::ConfidenceOutOfRange(score))
        }
    }

    /// 递归转换文档节点，问题追加到 `issues`
    fn convert_node(
        doc: &ConditionDocument,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> Option<ConditionNode> {
        match doc.node_type.as_str() {
            "COMPARISON" => Self::convert_comparison(doc, path, issues),
            "AND" | "OR" => {
                let children = Self::convert_children(doc, path, issues)?;
                if children.is_empty() {
                    issues.push(ValidationIssue::MalformedNode {
                        path: path.to_string(),
                        reason: format!("{} 至少需要一个子条件", doc.node_type),
                    });
                    return None;
                }
                if doc.node_type == "AND" {
                    Some(ConditionNode::And(children))
                } else {
                    Some(ConditionNode::Or(children))
                }
            }
            "NOT" | "IF" => {
                let mut children = Self::convert_children(doc, path, issues)?;
                if children.len() != 1 {
                    issues.push(ValidationIssue::MalformedNode {
                        path: path.to_string(),
                        reason: format!(
                            "{} 必须恰好有一个子条件，当前有 {} 个",
                            doc.node_type,
                            children.len()
                        ),
                    });
                    return None;
                }
                let child = children.pop()?;
                if doc.node_type == "NOT" {
                    Some(ConditionNode::Not(Box::new(child)))
                } else {
                    Some(child)
                }
            }
            other => {
                issues.push(ValidationIssue::MalformedNode {
                    path: path.to_string(),
                    reason: format!("未识别的节点类型 '{}'", other),
                });
                None
            }
        }
    }

    /// 转换全部子节点；任一子节点失败时仍继续，以便收集所有问题
    fn convert_children(
        doc: &ConditionDocument,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> Option<Vec<ConditionNode>> {
        let Some(conditions) = &doc.conditions else {
            issues.push(ValidationIssue::MalformedNode {
                path: path.to_string(),
                reason: format!("{} 节点缺少 conditions", doc.node_type),
            });
            return None;
        };

        let converted: Vec<Option<ConditionNode>> = conditions
            .iter()
            .enumerate()
            .map(|(i, child)| {
                Self::convert_node(child, &format!("{}.conditions[{}]", path, i), issues)
            })
            .collect();

        converted.into_iter().collect()
    }

    fn convert_comparison(
        doc: &ConditionDocument,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> Option<ConditionNode> {
        let field = match doc.field.as_deref() {
            Some(field) if !field.is_empty() => field,
            _ => {
                issues.push(ValidationIssue::MalformedNode {
                    path: path.to_string(),
                    reason: "比较条件缺少 field".to_string(),
                });
                return None;
            }
        };

        let operator = match doc.operator.as_deref() {
            Some(op) => match op.parse::<Operator>() {
                Ok(op) => op,
                Err(_) => {
                    issues.push(ValidationIssue::UnknownOperator {
                        path: path.to_string(),
                        operator: op.to_string(),
                    });
                    return None;
                }
            },
            None => {
                issues.push(ValidationIssue::MalformedNode {
                    path: path.to_string(),
                    reason: "比较条件缺少 operator".to_string(),
                });
                return None;
            }
        };

        let value = match &doc.value {
            None => FieldValue::Null,
            Some(raw) => match FieldValue::from_json(raw) {
                Some(value) => value,
                None => {
                    issues.push(ValidationIssue::InvalidValue {
                        path: path.to_string(),
                        operator: operator.to_string(),
                        reason: "值只能是字符串、数字、布尔、null 或字符串数组".to_string(),
                    });
                    return None;
                }
            },
        };

        let comparison = Comparison::new(field, operator, value);
        let cmp_issues = Self::check_comparison(path, &comparison);
        if cmp_issues.is_empty() {
            Some(ConditionNode::Comparison(comparison))
        } else {
            issues.extend(cmp_issues);
            None
        }
    }

    /// 检查字段白名单以及规则值与操作符的兼容性
    fn check_comparison(path: &str, cmp: &Comparison) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if !FieldResolver::is_recognized(&cmp.field) {
            issues.push(ValidationIssue::UnknownField {
                path: path.to_string(),
                field: cmp.field.clone(),
            });
        }

        let tag = cmp.value.tag();
        if !cmp.operator.accepted_rule_tags().contains(&tag) {
            let expected: Vec<String> = cmp
                .operator
                .accepted_rule_tags()
                .iter()
                .map(ToString::to_string)
                .collect();
            issues.push(ValidationIssue::InvalidValue {
                path: path.to_string(),
                operator: cmp.operator.to_string(),
                reason: format!("期望 {}，实际 {}", expected.join(" 或 "), tag),
            });
        } else if tag == ValueTag::String
            && cmp.operator.accepted_rule_tags().contains(&ValueTag::Number)
            && !cmp.operator.accepted_rule_tags().contains(&ValueTag::Bool)
            && cmp.value.as_number().is_none()
        {
            // 数值比较允许字符串形式的数字，但必须可解析
            issues.push(ValidationIssue::InvalidValue {
                path: path.to_string(),
                operator: cmp.operator.to_string(),
                reason: format!("'{}' 不是有效的数字", cmp.value),
            });
        }

        issues
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}
