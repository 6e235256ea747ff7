//! 需求分类规则引擎
//!
//! 根据管理员配置的规则将需求记录分为 A/B/C 三个风险等级：
//! - JSON 规则集导入、校验和导出
//! - 条件树短路求值与评估追踪
//! - 按优先级首条命中的分类策略
//! - 可校验的分类结果哈希

pub mod compiler;
pub mod document;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod importer;
pub mod models;
pub mod operators;
pub mod resolver;
pub mod result;
pub mod store;
pub mod value;

pub use compiler::RuleCompiler;
pub use document::{ConditionDocument, RuleDocument, RuleSetDocument};
pub use engine::{ClassificationEngine, EngineSettings};
pub use error::{Result, RuleError, RuleValidationError, ValidationIssue};
pub use executor::RuleExecutor;
pub use importer::RuleSetImporter;
pub use models::{
    Classification, ClassificationResult, Comparison, ConditionNode, Demand, DemandPriority,
    DemandType, EvaluationResult, Rule, RuleDraft,
};
pub use operators::{LogicalOperator, Operator};
pub use result::ResultBuilder;
pub use store::{InMemoryResultStore, InMemoryRuleRepository, ResultStore, RuleRepository};
pub use value::FieldValue;
