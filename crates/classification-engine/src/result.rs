//! 分类结果构建
//!
//! 结果哈希是对规范化 JSON 的 SHA-256：对象键按字典序排列，时间戳精确到秒（UTC）。
//! 哈希覆盖完整的需求记录，任何字段被篡改都会导致校验失败。

use crate::models::{Classification, ClassificationResult, Demand};
use crate::resolver::{FIXED_FIELDS, FieldResolver};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// 无规则命中时参与哈希的规则名占位符
pub const NO_RULE_MATCHED: &str = "__NO_RULE_MATCHED__";

/// 分类结果构建器
pub struct ResultBuilder;

impl ResultBuilder {
    /// 构建分类结果，时间戳截断到秒
    pub fn build(
        demand: &Demand,
        classification: Classification,
        confidence_score: f64,
        applied_rule_name: Option<String>,
        evaluation_log: Vec<String>,
        now: DateTime<Utc>,
    ) -> ClassificationResult {
        let timestamp = now.trunc_subsecs(0);
        let classification_hash = Self::compute_hash(
            demand,
            applied_rule_name.as_deref(),
            classification,
            timestamp,
        );

        ClassificationResult {
            classification,
            classification_hash,
            confidence_score,
            applied_rule_name,
            evaluation_log,
            timestamp,
        }
    }

    /// 计算分类哈希（64 位小写十六进制）
    pub fn compute_hash(
        demand: &Demand,
        applied_rule_name: Option<&str>,
        classification: Classification,
        timestamp: DateTime<Utc>,
    ) -> String {
        let canonical = Self::canonical_json(demand, applied_rule_name, classification, timestamp);

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// 校验结果哈希与需求记录是否一致
    pub fn verify(result: &ClassificationResult, demand: &Demand) -> bool {
        let expected = Self::compute_hash(
            demand,
            result.applied_rule_name.as_deref(),
            result.classification,
            result.timestamp,
        );
        expected == result.classification_hash
    }

    /// 规范化 JSON 文本
    pub fn canonical_json(
        demand: &Demand,
        applied_rule_name: Option<&str>,
        classification: Classification,
        timestamp: DateTime<Utc>,
    ) -> String {
        let mut root = BTreeMap::new();
        root.insert(
            "appliedRule",
            Value::String(applied_rule_name.unwrap_or(NO_RULE_MATCHED).to_string()),
        );
        root.insert(
            "classification",
            Value::String(classification.as_str().to_string()),
        );
        root.insert("record", Self::canonical_record(demand));
        root.insert(
            "timestamp",
            Value::String(
                timestamp
                    .trunc_subsecs(0)
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        );

        // BTreeMap 序列化时键已有序
        serde_json::to_string(&root).unwrap_or_default()
    }

    /// 需求记录的规范化形式：固定字段全部出现（缺失为 null），自定义字段放在 `custom` 下
    pub fn canonical_record(demand: &Demand) -> Value {
        let mut record: BTreeMap<String, Value> = FIXED_FIELDS
            .iter()
            .map(|field| {
                (
                    field.to_string(),
                    FieldResolver::resolve(demand, field).to_json(),
                )
            })
            .collect();

        let custom: BTreeMap<String, Value> = demand
            .custom_fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        record.insert("custom".to_string(), Self::sorted(custom));

        Self::sorted(record)
    }

    fn sorted(map: BTreeMap<String, Value>) -> Value {
        Value::Object(map.into_iter().collect())
    }
}
