//! 分类引擎领域模型

use crate::operators::Operator;
use crate::value::FieldValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// 风险分类等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Classification {
    A,
    B,
    C,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            other => Err(format!("无效的分类等级: '{}'，仅支持 A/B/C", other)),
        }
    }
}

/// 需求类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DemandType {
    Change,
    CreateNew,
}

impl DemandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Change => "CHANGE",
            Self::CreateNew => "CREATE_NEW",
        }
    }
}

/// 需求优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DemandPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl DemandPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// 待分类的需求记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Demand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demand_type: Option<DemandType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<DemandPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_justification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_owner: Option<String>,
    /// 可扩展的自定义字段，规则中以 `custom.<name>` 引用
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, FieldValue>,
}

impl Demand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_demand_type(mut self, demand_type: DemandType) -> Self {
        self.demand_type = Some(demand_type);
        self
    }

    pub fn with_priority(mut self, priority: DemandPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_asset_type(mut self, asset_type: impl Into<String>) -> Self {
        self.asset_type = Some(asset_type.into());
        self
    }

    pub fn with_asset_owner(mut self, asset_owner: impl Into<String>) -> Self {
        self.asset_owner = Some(asset_owner.into());
        self
    }

    pub fn with_custom(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.custom_fields.insert(name.into(), value.into());
        self
    }
}

/// 比较条件
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: String,
    pub operator: Operator,
    pub value: FieldValue,
}

impl Comparison {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

/// 条件树节点
///
/// `Not` 恰好一个子节点由类型保证；`And`/`Or` 至少一个子节点由编译器校验。
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Comparison(Comparison),
    And(Vec<ConditionNode>),
    Or(Vec<ConditionNode>),
    Not(Box<ConditionNode>),
}

impl ConditionNode {
    pub fn comparison(
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<FieldValue>,
    ) -> Self {
        Self::Comparison(Comparison::new(field, operator, value))
    }

    pub fn and(children: Vec<ConditionNode>) -> Self {
        Self::And(children)
    }

    pub fn or(children: Vec<ConditionNode>) -> Self {
        Self::Or(children)
    }

    pub fn not(child: ConditionNode) -> Self {
        Self::Not(Box::new(child))
    }

    /// 树深度：单个比较为 1，每层逻辑节点加 1
    ///
    /// 使用显式栈遍历，任意深度的输入都不会耗尽调用栈。
    pub fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(self, 1usize)];

        while let Some((node, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            match node {
                Self::Comparison(_) => {}
                Self::And(children) | Self::Or(children) => {
                    stack.extend(children.iter().map(|child| (child, depth + 1)));
                }
                Self::Not(child) => stack.push((child, depth + 1)),
            }
        }

        max_depth
    }

    /// 条件树中引用的全部字段
    pub fn fields(&self) -> BTreeSet<&str> {
        let mut fields = BTreeSet::new();
        let mut stack = vec![self];

        while let Some(node) = stack.pop() {
            match node {
                Self::Comparison(cmp) => {
                    fields.insert(cmp.field.as_str());
                }
                Self::And(children) | Self::Or(children) => stack.extend(children.iter()),
                Self::Not(child) => stack.push(child),
            }
        }

        fields
    }
}

/// 已校验、尚未入库的规则
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDraft {
    pub name: String,
    pub description: String,
    pub condition: ConditionNode,
    pub classification: Classification,
    pub confidence_score: f64,
    pub priority: i32,
}

/// 分类规则
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub condition: ConditionNode,
    pub classification: Classification,
    pub confidence_score: f64,
    /// 数值越小越先评估
    pub priority: i32,
    /// 软删除标记，停用的规则不参与评估
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn from_draft(id: i64, draft: RuleDraft) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: draft.name,
            description: draft.description,
            condition: draft.condition,
            classification: draft.classification,
            confidence_score: draft.confidence_score,
            priority: draft.priority,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_draft(&self) -> RuleDraft {
        RuleDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            condition: self.condition.clone(),
            classification: self.classification,
            confidence_score: self.confidence_score,
            priority: self.priority,
        }
    }
}

/// 单条规则的评估结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub matched: bool,
    pub rule_name: String,
    pub evaluation_trace: Vec<String>,
    /// 评估过程中遇到的未识别字段
    pub fields_not_found: Vec<String>,
}

impl EvaluationResult {
    pub fn new(rule_name: impl Into<String>) -> Self {
        Self {
            matched: false,
            rule_name: rule_name.into(),
            evaluation_trace: Vec::new(),
            fields_not_found: Vec::new(),
        }
    }
}

/// 分类结果，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub classification: Classification,
    pub classification_hash: String,
    pub confidence_score: f64,
    pub applied_rule_name: Option<String>,
    pub evaluation_log: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
