//! 规则集导入/导出
//!
//! 导入前逐条编译并收集全部问题，任一规则有问题则整批拒绝，
//! 校验通过后由仓储原子写入。单条规则的创建和更新走同一套校验。

use crate::compiler::RuleCompiler;
use crate::document::{RuleDocument, RuleSetDocument};
use crate::error::{Result, RuleError, RuleValidationError, ValidationIssue};
use crate::models::{Rule, RuleDraft};
use crate::store::RuleRepository;
use classifier_shared::observability::metrics;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 规则集导入器
#[derive(Clone)]
pub struct RuleSetImporter {
    repository: Arc<dyn RuleRepository>,
    compiler: RuleCompiler,
}

impl RuleSetImporter {
    pub fn new(repository: Arc<dyn RuleRepository>, compiler: RuleCompiler) -> Self {
        Self {
            repository,
            compiler,
        }
    }

    /// 从 JSON 文本导入规则集
    pub async fn import_json(&self, json: &str) -> Result<Vec<Rule>> {
        let document = RuleSetDocument::from_json(json)?;
        self.import(&document).await
    }

    /// 导入规则集
    ///
    /// 成功时返回新建的规则；失败时不写入任何规则。
    #[instrument(skip(self, document), fields(rule_count = document.rules.len()))]
    pub async fn import(&self, document: &RuleSetDocument) -> Result<Vec<Rule>> {
        if !document.is_supported_version() {
            warn!(version = %document.version, "规则集版本不受支持");
            metrics::record_rule_import("rejected", document.rules.len());
            return Err(RuleError::UnsupportedVersion(document.version.clone()));
        }

        let existing: HashSet<String> = self
            .repository
            .active_rules()
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();

        let mut name_counts: HashMap<&str, usize> = HashMap::new();
        for doc in &document.rules {
            *name_counts.entry(doc.name.as_str()).or_default() += 1;
        }

        let mut drafts = Vec::with_capacity(document.rules.len());
        let mut errors = Vec::new();

        for (index, doc) in document.rules.iter().enumerate() {
            let mut issues = Vec::new();

            if name_counts.get(doc.name.as_str()).copied().unwrap_or(0) > 1
                || existing.contains(&doc.name)
            {
                issues.push(ValidationIssue::DuplicateName(doc.name.clone()));
            }

            match self.compiler.compile(doc) {
                Ok(draft) if issues.is_empty() => drafts.push(draft),
                Ok(_) => {}
                Err(mut compile_issues) => issues.append(&mut compile_issues),
            }

            if !issues.is_empty() {
                errors.push(RuleValidationError {
                    index,
                    rule_name: doc.name.clone(),
                    issues,
                });
            }
        }

        if !errors.is_empty() {
            for error in &errors {
                warn!("规则集导入被拒绝: {}", error);
            }
            metrics::record_rule_import("rejected", document.rules.len());
            return Err(RuleError::Validation(errors));
        }

        let created = self.repository.create_batch(drafts).await.map_err(|e| {
            metrics::record_rule_import("failed", document.rules.len());
            e
        })?;

        metrics::record_rule_import("success", created.len());
        info!("规则集导入完成: {} 条规则", created.len());
        Ok(created)
    }

    /// 导出全部启用规则，按 `(priority, id)` 排序
    pub async fn export(&self) -> Result<RuleSetDocument> {
        let mut rules = self.repository.active_rules().await?;
        rules.sort_by_key(|r| (r.priority, r.id));

        Ok(RuleSetDocument::new(
            rules.iter().map(RuleDocument::from).collect(),
        ))
    }

    /// 导出为格式化 JSON
    pub async fn export_json(&self) -> Result<String> {
        Ok(self.export().await?.to_json_pretty()?)
    }

    /// 创建单条规则
    #[instrument(skip(self, doc), fields(rule_name = %doc.name))]
    pub async fn create_rule(&self, doc: &RuleDocument) -> Result<Rule> {
        let draft = self.compile_single(doc)?;
        self.repository.create(draft).await
    }

    /// 更新单条规则
    #[instrument(skip(self, doc), fields(rule_name = %doc.name))]
    pub async fn update_rule(&self, id: i64, doc: &RuleDocument) -> Result<Rule> {
        let draft = self.compile_single(doc)?;
        self.repository.update(id, draft).await
    }

    /// 停用规则
    pub async fn deactivate_rule(&self, id: i64) -> Result<()> {
        self.repository.deactivate(id).await
    }

    fn compile_single(&self, doc: &RuleDocument) -> Result<RuleDraft> {
        self.compiler.compile(doc).map_err(|issues| {
            warn!(rule_name = %doc.name, "规则校验失败");
            RuleError::Validation(vec![RuleValidationError {
                index: 0,
                rule_name: doc.name.clone(),
                issues,
            }])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ConditionDocument;
    use crate::store::{InMemoryRuleRepository, MockRuleRepository};
    use serde_json::json;

    fn rule_doc(name: &str, priority: i32) -> RuleDocument {
        RuleDocument {
            name: name.to_string(),
            description: format!("{} rule", name),
            condition: ConditionDocument::group(
                "AND",
                vec![
                    ConditionDocument::comparison("assetType", "CONTAINS", Some(json!("Database"))),
                    ConditionDocument::comparison(
                        "priority",
                        "IN",
                        Some(json!(["HIGH", "CRITICAL"])),
                    ),
                ],
            ),
            classification: "A".to_string(),
            confidence_score: 0.9,
            priority,
        }
    }

    fn importer() -> (InMemoryRuleRepository, RuleSetImporter) {
        let repo = InMemoryRuleRepository::new();
        let importer = RuleSetImporter::new(Arc::new(repo.clone()), RuleCompiler::new(10));
        (repo, importer)
    }

    #[tokio::test]
    async fn test_import_success() {
        let (repo, importer) = importer();
        let doc = RuleSetDocument::new(vec![rule_doc("a", 1), rule_doc("b", 2)]);

        let created = importer.import(&doc).await.unwrap();

        assert_eq!(created.len(), 2);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected_atomically() {
        let (repo, importer) = importer();
        let doc = RuleSetDocument::new(vec![
            rule_doc("Dup", 1),
            rule_doc("Other", 2),
            rule_doc("Dup", 3),
        ]);

        let err = importer.import(&doc).await.unwrap_err();
        let errors = err.validation_errors();

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].index, 0);
        assert_eq!(errors[1].index, 2);
        assert!(errors[0]
            .issues
            .contains(&ValidationIssue::DuplicateName("Dup".to_string())));
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_against_stored_rule() {
        let (repo, importer) = importer();
        importer
            .import(&RuleSetDocument::new(vec![rule_doc("a", 1)]))
            .await
            .unwrap();

        let err = importer
            .import(&RuleSetDocument::new(vec![rule_doc("b", 1), rule_doc("a", 2)]))
            .await
            .unwrap_err();

        assert_eq!(err.validation_errors().len(), 1);
        assert_eq!(err.validation_errors()[0].rule_name, "a");
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_all_issues_collected() {
        let (_, importer) = importer();
        let mut bad = rule_doc("bad", 1);
        bad.confidence_score = 1.5;
        bad.condition = ConditionDocument::comparison("assetOwner2", "MATCHES", Some(json!("x")));

        let err = importer
            .import(&RuleSetDocument::new(vec![rule_doc("good", 1), bad]))
            .await
            .unwrap_err();

        let errors = err.validation_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 1);
        let codes: Vec<&str> = errors[0].issues.iter().map(|i| i.code()).collect();
        assert!(codes.contains(&"CONFIDENCE_OUT_OF_RANGE"));
        assert!(codes.contains(&"UNKNOWN_FIELD"));
        assert!(codes.contains(&"UNKNOWN_OPERATOR"));
    }

    #[tokio::test]
    async fn test_export_round_trip() {
        let (_, importer) = importer();
        let mut unary = rule_doc("unowned", 5);
        unary.condition = ConditionDocument::group(
            "NOT",
            vec![ConditionDocument::comparison("assetOwner", "IS_NOT_NULL", None)],
        );
        let doc = RuleSetDocument::new(vec![rule_doc("late", 50), unary, rule_doc("early", 1)]);

        importer.import(&doc).await.unwrap();
        let exported = importer.export().await.unwrap();

        let names: Vec<&str> = exported.rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["early", "unowned", "late"]);

        let original = |name: &str| doc.rules.iter().find(|r| r.name == name).cloned();
        for rule in &exported.rules {
            assert_eq!(Some(rule.clone()), original(&rule.name));
        }
    }

    #[tokio::test]
    async fn test_null_comparison_round_trip() {
        let (_, importer) = importer();
        let mut ownerless = rule_doc("ownerless", 1);
        ownerless.condition = serde_json::from_value(json!({
            "type": "COMPARISON", "field": "assetOwner", "operator": "EQUALS", "value": null
        }))
        .unwrap();

        importer
            .import(&RuleSetDocument::new(vec![ownerless.clone()]))
            .await
            .unwrap();
        let exported = importer.export().await.unwrap();

        assert_eq!(exported.rules, vec![ownerless]);
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let (repo, importer) = importer();
        let json = json!({"version": "2.0", "rules": [rule_doc("a", 1)]}).to_string();

        let err = importer.import_json(&json).await.unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_VERSION");
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_import_json_bare_array() {
        let (repo, importer) = importer();
        let json = serde_json::to_string(&vec![rule_doc("a", 1)]).unwrap();

        importer.import_json(&json).await.unwrap();
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_single_rule_administration() {
        let (repo, importer) = importer();
        let rule = importer.create_rule(&rule_doc("a", 1)).await.unwrap();

        let mut updated = rule_doc("a", 7);
        updated.classification = "B".to_string();
        let rule = importer.update_rule(rule.id, &updated).await.unwrap();
        assert_eq!(rule.priority, 7);

        let mut too_deep = rule_doc("a", 1);
        for _ in 0..10 {
            too_deep.condition = ConditionDocument::group("NOT", vec![too_deep.condition]);
        }
        assert!(matches!(
            importer.update_rule(rule.id, &too_deep).await,
            Err(RuleError::Validation(_))
        ));

        importer.deactivate_rule(rule.id).await.unwrap();
        assert!(repo.active_rules().await.unwrap().is_empty());
        assert!(importer.export().await.unwrap().rules.is_empty());
    }

    #[tokio::test]
    async fn test_import_unavailable_repository() {
        let mut mock = MockRuleRepository::new();
        mock.expect_active_rules()
            .returning(|| Err(RuleError::Unavailable("down".to_string())));
        mock.expect_create_batch().never();

        let importer = RuleSetImporter::new(Arc::new(mock), RuleCompiler::default());
        let err = importer
            .import(&RuleSetDocument::new(vec![rule_doc("a", 1)]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNAVAILABLE");
    }
}
