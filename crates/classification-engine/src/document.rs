//! 规则集文档
//!
//! 规则导入/导出使用的 JSON 结构。文档中的字段、操作符、分类等级以原始字符串
//! 保存，由 [`RuleCompiler`](crate::compiler::RuleCompiler) 逐条校验，
//! 以便对每条规则返回结构化的问题列表，而不是在反序列化阶段整体失败。

use crate::models::{ConditionNode, Rule};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// 未指定优先级时使用的默认值
pub const DEFAULT_PRIORITY: i32 = 100;

pub const DOCUMENT_VERSION: &str = "1.0";

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_version() -> String {
    DOCUMENT_VERSION.to_string()
}

/// 规则集文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSetDocument {
    #[serde(default = "default_version")]
    pub version: String,
    pub rules: Vec<RuleDocument>,
}

impl RuleSetDocument {
    pub fn new(rules: Vec<RuleDocument>) -> Self {
        Self {
            version: default_version(),
            rules,
        }
    }

    /// 解析规则集 JSON，同时接受 `{"rules": [...]}` 与裸数组两种形式
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;
        if value.is_array() {
            serde_json::from_value::<Vec<RuleDocument>>(value).map(Self::new)
        } else {
            serde_json::from_value(value)
        }
    }

    /// 是否为支持的文档版本
    pub fn is_supported_version(&self) -> bool {
        self.version == DOCUMENT_VERSION
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// 单条规则文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RuleDocument {
    #[validate(length(min = 1, max = 100, message = "规则名称长度必须在1-100个字符之间"))]
    pub name: String,

    #[serde(default)]
    #[validate(length(max = 1000, message = "规则描述不能超过1000个字符"))]
    pub description: String,

    pub condition: ConditionDocument,

    /// 分类等级 A/B/C
    pub classification: String,

    pub confidence_score: f64,

    #[serde(default = "default_priority")]
    pub priority: i32,
}

impl From<&Rule> for RuleDocument {
    fn from(rule: &Rule) -> Self {
        Self {
            name: rule.name.clone(),
            description: rule.description.clone(),
            condition: ConditionDocument::from(&rule.condition),
            classification: rule.classification.to_string(),
            confidence_score: rule.confidence_score,
            priority: rule.priority,
        }
    }
}

/// 条件节点文档
///
/// `type` 取值 IF/AND/OR/NOT/COMPARISON；IF 是单子节点的透明包装。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDocument {
    #[serde(rename = "type")]
    pub node_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<ConditionDocument>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ConditionDocument {
    pub fn group(node_type: &str, conditions: Vec<ConditionDocument>) -> Self {
        Self {
            node_type: node_type.to_string(),
            conditions: Some(conditions),
            field: None,
            operator: None,
            value: None,
        }
    }

    pub fn comparison(field: &str, operator: &str, value: Option<Value>) -> Self {
        Self {
            node_type: "COMPARISON".to_string(),
            conditions: None,
            field: Some(field.to_string()),
            operator: Some(operator.to_string()),
            value,
        }
    }

    /// 编译后的树深
    ///
    /// IF 编译为其子节点，不单独计层。使用显式栈遍历，超深文档也不会耗尽调用栈。
    pub fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(self, 1usize)];

        while let Some((node, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            if let Some(children) = &node.conditions {
                let child_depth = if node.node_type == "IF" { depth } else { depth + 1 };
                stack.extend(children.iter().map(|child| (child, child_depth)));
            }
        }

        max_depth
    }
}

impl From<&ConditionNode> for ConditionDocument {
    fn from(node: &ConditionNode) -> Self {
        match node {
            ConditionNode::Comparison(cmp) => {
                // 缺省的 value 与 null 编译结果相同，统一省略
                let value = if cmp.value.is_null() {
                    None
                } else {
                    Some(cmp.value.to_json())
                };
                Self::comparison(&cmp.field, cmp.operator.as_str(), value)
            }
            ConditionNode::And(children) => {
                Self::group("AND", children.iter().map(Self::from).collect())
            }
            ConditionNode::Or(children) => {
                Self::group("OR", children.iter().map(Self::from).collect())
            }
            ConditionNode::Not(child) => Self::group("NOT", vec![Self::from(child.as_ref())]),
        }
    }
}
