//! 分类引擎
//!
//! 每次分类读取一次启用规则的快照，按 `(priority, id)` 升序逐条评估，
//! 首条命中的规则决定分类结果；全部未命中时使用配置的默认分类。

use crate::compiler::RuleCompiler;
use crate::document::RuleDocument;
use crate::error::{Result, RuleError, RuleValidationError};
use crate::executor::RuleExecutor;
use crate::models::{Classification, ClassificationResult, Demand, EvaluationResult, Rule, RuleDraft};
use crate::result::ResultBuilder;
use crate::store::RuleRepository;
use chrono::{DateTime, Utc};
use classifier_shared::config::ClassificationConfig;
use classifier_shared::observability::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, field, info, instrument, warn, Span};

/// 引擎运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_tree_depth: usize,
    pub default_confidence: f64,
    pub default_classification: Classification,
    pub evaluation_log_enabled: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_tree_depth: 10,
            default_confidence: 0.5,
            default_classification: Classification::C,
            evaluation_log_enabled: true,
        }
    }
}

impl TryFrom<&ClassificationConfig> for EngineSettings {
    type Error = RuleError;

    fn try_from(config: &ClassificationConfig) -> Result<Self> {
        let default_classification = config
            .default_classification
            .parse::<Classification>()
            .map_err(RuleError::Config)?;

        if !(0.0..=1.0).contains(&config.default_confidence) {
            return Err(RuleError::Config(format!(
                "默认置信度 {} 超出范围 [0, 1]",
                config.default_confidence
            )));
        }

        if config.max_tree_depth == 0 {
            return Err(RuleError::Config("最大树深必须大于 0".to_string()));
        }

        Ok(Self {
            max_tree_depth: config.max_tree_depth,
            default_confidence: config.default_confidence,
            default_classification,
            evaluation_log_enabled: config.evaluation_log_enabled,
        })
    }
}

/// 分类引擎
#[derive(Clone)]
pub struct ClassificationEngine {
    repository: Arc<dyn RuleRepository>,
    settings: EngineSettings,
    executor: RuleExecutor,
}

impl ClassificationEngine {
    pub fn new(repository: Arc<dyn RuleRepository>, settings: EngineSettings) -> Self {
        let executor = if settings.evaluation_log_enabled {
            RuleExecutor::new().with_trace()
        } else {
            RuleExecutor::new()
        };

        Self {
            repository,
            settings,
            executor,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 对需求进行分类
    pub async fn classify(&self, demand: &Demand) -> Result<ClassificationResult> {
        self.classify_at(demand, Utc::now()).await
    }

    /// 以指定时刻对需求进行分类
    ///
    /// 仓储读取失败时返回 [`RuleError::Unavailable`]，不做重试。
    #[instrument(
        skip(self, demand),
        fields(
            rule_count = field::Empty,
            classification = field::Empty,
            applied_rule = field::Empty
        )
    )]
    pub async fn classify_at(
        &self,
        demand: &Demand,
        now: DateTime<Utc>,
    ) -> Result<ClassificationResult> {
        let start = Instant::now();

        let rules = self.repository.active_rules().await.map_err(|e| {
            warn!(error = %e, "读取规则快照失败");
            match e {
                RuleError::Unavailable(_) => e,
                other => RuleError::Unavailable(other.to_string()),
            }
        })?;

        let span = Span::current();
        span.record("rule_count", rules.len());

        let result = self.evaluate_snapshot(rules, demand, now);

        span.record("classification", result.classification.as_str());
        if let Some(name) = &result.applied_rule_name {
            span.record("applied_rule", name.as_str());
        }

        metrics::record_classification(
            result.classification.as_str(),
            result.applied_rule_name.is_some(),
            start.elapsed().as_secs_f64(),
        );

        info!(
            classification = %result.classification,
            hash = %result.classification_hash,
            "分类完成"
        );
        Ok(result)
    }

    /// 在给定规则快照上评估需求
    ///
    /// 纯内存计算，不访问仓储。未启用的规则和超出最大树深的规则会被忽略。
    pub fn evaluate_snapshot(
        &self,
        mut rules: Vec<Rule>,
        demand: &Demand,
        now: DateTime<Utc>,
    ) -> ClassificationResult {
        rules.retain(|r| r.active);
        rules.sort_by_key(|r| (r.priority, r.id));

        let trace = self.executor.trace_enabled();
        let mut log = Vec::new();

        for rule in &rules {
            if trace {
                log.push(format!(
                    "Evaluating rule '{}' (priority {})",
                    rule.name, rule.priority
                ));
            }

            let depth = rule.condition.depth();
            if depth > self.settings.max_tree_depth {
                warn!(
                    rule = %rule.name,
                    depth,
                    max = self.settings.max_tree_depth,
                    "跳过超出最大树深的规则"
                );
                if trace {
                    log.push(format!(
                        "Rule '{}' skipped (depth {} exceeds {})",
                        rule.name, depth, self.settings.max_tree_depth
                    ));
                }
                continue;
            }

            let evaluation = self.executor.execute(&rule.name, &rule.condition, demand);
            metrics::record_rule_evaluation(evaluation.matched);

            if !evaluation.fields_not_found.is_empty() {
                debug!(
                    rule = %rule.name,
                    fields = ?evaluation.fields_not_found,
                    "规则引用了未识别的字段"
                );
            }

            log.extend(evaluation.evaluation_trace);

            if evaluation.matched {
                if trace {
                    log.push(format!(
                        "Rule '{}' matched => {}",
                        rule.name, rule.classification
                    ));
                }
                return ResultBuilder::build(
                    demand,
                    rule.classification,
                    rule.confidence_score,
                    Some(rule.name.clone()),
                    log,
                    now,
                );
            }
        }

        if trace {
            log.push(format!(
                "No rule matched => default {}",
                self.settings.default_classification
            ));
        }

        ResultBuilder::build(
            demand,
            self.settings.default_classification,
            self.settings.default_confidence,
            None,
            log,
            now,
        )
    }

    /// 试运行一条规则草稿，不读写仓储
    pub fn test_rule(&self, draft: &RuleDraft, demand: &Demand) -> Result<EvaluationResult> {
        let issues = RuleCompiler::new(self.settings.max_tree_depth).validate_draft(draft);
        if !issues.is_empty() {
            return Err(RuleError::Validation(vec![RuleValidationError {
                index: 0,
                rule_name: draft.name.clone(),
                issues,
            }]));
        }

        Ok(self.executor.execute(&draft.name, &draft.condition, demand))
    }

    /// 编译规则文档后试运行
    pub fn test_document(&self, doc: &RuleDocument, demand: &Demand) -> Result<EvaluationResult> {
        let draft = RuleCompiler::new(self.settings.max_tree_depth)
            .compile(doc)
            .map_err(|issues| {
                RuleError::Validation(vec![RuleValidationError {
                    index: 0,
                    rule_name: doc.name.clone(),
                    issues,
                }])
            })?;

        Ok(self.executor.execute(&draft.name, &draft.condition, demand))
    }
}
