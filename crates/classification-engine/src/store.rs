//! 规则与分类结果存储
//!
//! 定义仓储接口，引擎和导入器只依赖抽象，便于 mock 测试。
//! 内存实现使用 DashMap 保存数据，写操作由一把互斥锁串行化，
//! 保证名称唯一性检查与批量写入的原子性。写入前对草稿重新校验，
//! 超出最大树深或引用未知字段的条件树不会被保存。

use crate::compiler::RuleCompiler;
use crate::error::{Result, RuleError, RuleValidationError};
use crate::models::{ClassificationResult, Rule, RuleDraft};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info, instrument, warn};

/// 规则仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// 全部启用中的规则（不保证顺序）
    async fn active_rules(&self) -> Result<Vec<Rule>>;
    async fn get(&self, id: i64) -> Result<Option<Rule>>;
    async fn create(&self, draft: RuleDraft) -> Result<Rule>;
    /// 批量创建，全部成功或全部不写入
    async fn create_batch(&self, drafts: Vec<RuleDraft>) -> Result<Vec<Rule>>;
    async fn update(&self, id: i64, draft: RuleDraft) -> Result<Rule>;
    /// 软删除
    async fn deactivate(&self, id: i64) -> Result<()>;
}

/// 分类结果仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, result: &ClassificationResult) -> Result<()>;
    async fn find_by_hash(&self, hash: &str) -> Result<Option<ClassificationResult>>;
}

/// 内存规则仓储
#[derive(Clone)]
pub struct InMemoryRuleRepository {
    rules: Arc<DashMap<i64, Rule>>,
    /// 写锁
    write_lock: Arc<parking_lot::Mutex<()>>,
    next_id: Arc<AtomicI64>,
    compiler: RuleCompiler,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self::with_compiler(RuleCompiler::default())
    }

    /// 使用指定编译器（决定最大树深）校验写入的规则
    pub fn with_compiler(compiler: RuleCompiler) -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            write_lock: Arc::new(parking_lot::Mutex::new(())),
            next_id: Arc::new(AtomicI64::new(1)),
            compiler,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.compiler.max_depth()
    }

    /// 规则总数（包括已停用）
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 检查名称是否被其他启用中的规则占用
    fn name_taken(&self, name: &str, except: Option<i64>) -> bool {
        self.rules
            .iter()
            .any(|r| r.active && r.name == name && Some(r.id) != except)
    }

    /// 校验一批草稿，返回有问题的规则
    fn check_drafts<'a>(
        &self,
        drafts: impl IntoIterator<Item = &'a RuleDraft>,
    ) -> Result<()> {
        let errors: Vec<RuleValidationError> = drafts
            .into_iter()
            .enumerate()
            .filter_map(|(index, draft)| {
                let issues = self.compiler.validate_draft(draft);
                (!issues.is_empty()).then(|| RuleValidationError {
                    index,
                    rule_name: draft.name.clone(),
                    issues,
                })
            })
            .collect();

        if errors.is_empty() {
            return Ok(());
        }

        for error in &errors {
            warn!("拒绝写入无效规则: {}", error);
        }
        Err(RuleError::Validation(errors))
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// 获取仓储统计信息
    pub fn stats(&self) -> RuleStoreStats {
        let rules_count = self.rules.len();
        let active_count = self.rules.iter().filter(|r| r.active).count();
        let total_fields: usize = self
            .rules
            .iter()
            .filter(|r| r.active)
            .map(|r| r.condition.fields().len())
            .sum();

        RuleStoreStats {
            rules_count,
            active_count,
            total_fields,
            avg_fields_per_rule: if active_count > 0 {
                total_fields as f64 / active_count as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for InMemoryRuleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn active_rules(&self) -> Result<Vec<Rule>> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.active)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn get(&self, id: i64) -> Result<Option<Rule>> {
        Ok(self.rules.get(&id).map(|r| r.value().clone()))
    }

    #[instrument(skip(self, draft), fields(rule_name = %draft.name))]
    async fn create(&self, draft: RuleDraft) -> Result<Rule> {
        self.check_drafts([&draft])?;
        let _guard = self.write_lock.lock();

        if self.name_taken(&draft.name, None) {
            warn!("规则名称已存在: {}", draft.name);
            return Err(RuleError::DuplicateName(draft.name));
        }

        let rule = Rule::from_draft(self.allocate_id(), draft);
        self.rules.insert(rule.id, rule.clone());

        info!(rule_id = rule.id, "规则已创建");
        Ok(rule)
    }

    #[instrument(skip(self, drafts), fields(count = drafts.len()))]
    async fn create_batch(&self, drafts: Vec<RuleDraft>) -> Result<Vec<Rule>> {
        self.check_drafts(&drafts)?;
        let _guard = self.write_lock.lock();

        // 先整体检查，再统一写入
        let mut seen = std::collections::HashSet::new();
        for draft in &drafts {
            if !seen.insert(draft.name.as_str()) || self.name_taken(&draft.name, None) {
                warn!("批量创建因名称重复被拒绝: {}", draft.name);
                return Err(RuleError::DuplicateName(draft.name.clone()));
            }
        }

        let created: Vec<Rule> = drafts
            .into_iter()
            .map(|draft| Rule::from_draft(self.allocate_id(), draft))
            .collect();

        for rule in &created {
            self.rules.insert(rule.id, rule.clone());
        }

        info!("批量创建完成: {} 条规则", created.len());
        Ok(created)
    }

    #[instrument(skip(self, draft))]
    async fn update(&self, id: i64, draft: RuleDraft) -> Result<Rule> {
        self.check_drafts([&draft])?;
        let _guard = self.write_lock.lock();

        if !self.rules.contains_key(&id) {
            warn!("更新不存在的规则: {}", id);
            return Err(RuleError::RuleNotFound(id));
        }

        if self.name_taken(&draft.name, Some(id)) {
            warn!("规则名称已存在: {}", draft.name);
            return Err(RuleError::DuplicateName(draft.name));
        }

        let mut entry = self.rules.get_mut(&id).ok_or(RuleError::RuleNotFound(id))?;
        let rule = entry.value_mut();
        rule.name = draft.name;
        rule.description = draft.description;
        rule.condition = draft.condition;
        rule.classification = draft.classification;
        rule.confidence_score = draft.confidence_score;
        rule.priority = draft.priority;
        rule.updated_at = Utc::now();

        info!("规则已更新: {}", id);
        Ok(rule.clone())
    }

    #[instrument(skip(self))]
    async fn deactivate(&self, id: i64) -> Result<()> {
        let _guard = self.write_lock.lock();

        match self.rules.get_mut(&id) {
            Some(mut entry) => {
                let rule = entry.value_mut();
                rule.active = false;
                rule.updated_at = Utc::now();
                info!("规则已停用: {}", id);
                Ok(())
            }
            None => {
                warn!("停用不存在的规则: {}", id);
                Err(RuleError::RuleNotFound(id))
            }
        }
    }
}

/// 规则仓储统计信息
#[derive(Debug, Clone)]
pub struct RuleStoreStats {
    /// 规则总数
    pub rules_count: usize,
    /// 启用中的规则数
    pub active_count: usize,
    /// 启用规则引用的字段总数
    pub total_fields: usize,
    /// 平均每条启用规则引用的字段数
    pub avg_fields_per_rule: f64,
}

/// 内存分类结果存储，以分类哈希为键
#[derive(Clone, Default)]
pub struct InMemoryResultStore {
    results: Arc<DashMap<String, ClassificationResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save(&self, result: &ClassificationResult) -> Result<()> {
        self.results
            .insert(result.classification_hash.clone(), result.clone());
        debug!(hash = %result.classification_hash, "分类结果已保存");
        Ok(())
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<ClassificationResult>> {
        Ok(self.results.get(hash).map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, ConditionNode};
    use crate::operators::Operator;
    use crate::value::FieldValue;

    fn sample_draft(name: &str, priority: i32) -> RuleDraft {
        RuleDraft {
            name: name.to_string(),
            description: String::new(),
            condition: ConditionNode::and(vec![
                ConditionNode::comparison("assetType", Operator::Equals, "Database"),
                ConditionNode::comparison("custom.users", Operator::GreaterThan, 500i64),
            ]),
            classification: Classification::A,
            confidence_score: 0.9,
            priority,
        }
    }

    #[tokio::test]
    async fn test_create_rule() {
        let repo = InMemoryRuleRepository::new();
        let rule = repo.create(sample_draft("db", 10)).await.unwrap();

        assert_eq!(rule.id, 1);
        assert!(rule.active);
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.get(1).await.unwrap().unwrap().name, "db");
    }

    #[tokio::test]
    async fn test_create_duplicate_name() {
        let repo = InMemoryRuleRepository::new();
        repo.create(sample_draft("db", 10)).await.unwrap();

        let err = repo.create(sample_draft("db", 20)).await.unwrap_err();
        assert!(matches!(err, RuleError::DuplicateName(name) if name == "db"));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_name_reusable_after_deactivate() {
        let repo = InMemoryRuleRepository::new();
        let rule = repo.create(sample_draft("db", 10)).await.unwrap();
        repo.deactivate(rule.id).await.unwrap();

        assert!(repo.active_rules().await.unwrap().is_empty());
        assert!(repo.create(sample_draft("db", 10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_batch_is_atomic() {
        let repo = InMemoryRuleRepository::new();
        let drafts = vec![
            sample_draft("a", 1),
            sample_draft("b", 2),
            sample_draft("a", 3),
        ];

        assert!(repo.create_batch(drafts).await.is_err());
        assert!(repo.is_empty());

        let created = repo
            .create_batch(vec![sample_draft("a", 1), sample_draft("b", 2)])
            .await
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].id + 1, created[1].id);
    }

    #[tokio::test]
    async fn test_update_rule() {
        let repo = InMemoryRuleRepository::new();
        let rule = repo.create(sample_draft("db", 10)).await.unwrap();

        let mut draft = rule.to_draft();
        draft.name = "database".to_string();
        draft.priority = 1;
        let updated = repo.update(rule.id, draft).await.unwrap();

        assert_eq!(updated.id, rule.id);
        assert_eq!(updated.name, "database");
        assert_eq!(updated.priority, 1);
        assert!(updated.updated_at >= rule.updated_at);
    }

    #[tokio::test]
    async fn test_update_nonexistent_rule() {
        let repo = InMemoryRuleRepository::new();
        let err = repo.update(42, sample_draft("x", 1)).await.unwrap_err();
        assert!(matches!(err, RuleError::RuleNotFound(42)));
    }

    #[tokio::test]
    async fn test_update_to_taken_name() {
        let repo = InMemoryRuleRepository::new();
        repo.create(sample_draft("a", 1)).await.unwrap();
        let b = repo.create(sample_draft("b", 2)).await.unwrap();

        let err = repo.update(b.id, sample_draft("a", 2)).await.unwrap_err();
        assert!(matches!(err, RuleError::DuplicateName(_)));
        // 保留原名称更新自身不算重复
        assert!(repo.update(b.id, sample_draft("b", 5)).await.is_ok());
    }

    /// 构造 NOT 链，深度为 `depth`
    fn not_chain(depth: usize) -> ConditionNode {
        let mut node = ConditionNode::comparison("assetType", Operator::Equals, "Database");
        for _ in 1..depth {
            node = ConditionNode::not(node);
        }
        node
    }

    #[tokio::test]
    async fn test_over_deep_tree_never_stored() {
        let repo = InMemoryRuleRepository::new();
        assert_eq!(repo.max_depth(), 10);

        let mut deep = sample_draft("deep", 1);
        deep.condition = not_chain(21);

        let err = repo.create(deep.clone()).await.unwrap_err();
        let errors = err.validation_errors();
        assert_eq!(errors[0].rule_name, "deep");
        assert_eq!(errors[0].issues[0].code(), "DEPTH_EXCEEDED");

        assert!(repo
            .create_batch(vec![sample_draft("ok", 1), deep.clone()])
            .await
            .is_err());
        assert!(repo.is_empty());

        let stored = repo.create(sample_draft("ok", 1)).await.unwrap();
        assert!(repo.update(stored.id, deep).await.is_err());
        assert_eq!(repo.get(stored.id).await.unwrap().unwrap().condition.depth(), 2);
    }

    #[tokio::test]
    async fn test_write_path_rejects_unknown_field() {
        let repo = InMemoryRuleRepository::with_compiler(RuleCompiler::new(3));
        let mut draft = sample_draft("typo", 1);
        draft.condition = ConditionNode::comparison("assetOwner2", Operator::IsNull, FieldValue::Null);

        let err = repo.create(draft).await.unwrap_err();
        assert_eq!(err.validation_errors()[0].issues[0].code(), "UNKNOWN_FIELD");

        let mut at_limit = sample_draft("limit", 1);
        at_limit.condition = not_chain(3);
        assert!(repo.create(at_limit).await.is_ok());
    }

    #[tokio::test]
    async fn test_deactivate_nonexistent_rule() {
        let repo = InMemoryRuleRepository::new();
        assert!(matches!(
            repo.deactivate(7).await,
            Err(RuleError::RuleNotFound(7))
        ));
    }

    #[tokio::test]
    async fn test_stats() {
        let repo = InMemoryRuleRepository::new();
        repo.create(sample_draft("a", 1)).await.unwrap();
        let b = repo.create(sample_draft("b", 2)).await.unwrap();
        repo.deactivate(b.id).await.unwrap();

        let stats = repo.stats();
        assert_eq!(stats.rules_count, 2);
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.total_fields, 2);
        assert_eq!(stats.avg_fields_per_rule, 2.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create() {
        let repo = InMemoryRuleRepository::new();

        let mut handles = Vec::new();
        for worker in 0..4 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    repo.create(sample_draft(&format!("rule-{}-{}", worker, i), i))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let rules = repo.active_rules().await.unwrap();
        assert_eq!(rules.len(), 200);

        let mut ids: Vec<i64> = rules.iter().map(|r| r.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_names() {
        let repo = InMemoryRuleRepository::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(
                async move { repo.create(sample_draft("same", 1)).await },
            ));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn test_result_store() {
        let store = InMemoryResultStore::new();
        let result = ClassificationResult {
            classification: Classification::B,
            classification_hash: "abc".to_string(),
            confidence_score: 0.6,
            applied_rule_name: Some("r".to_string()),
            evaluation_log: vec![],
            timestamp: Utc::now(),
        };

        store.save(&result).await.unwrap();
        assert_eq!(store.len(), 1);

        let found = store.find_by_hash("abc").await.unwrap().unwrap();
        assert_eq!(found.applied_rule_name.as_deref(), Some("r"));
        assert!(store.find_by_hash("missing").await.unwrap().is_none());
    }
}
