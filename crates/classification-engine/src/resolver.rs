//! 字段解析器
//!
//! 按字段名从需求记录中取值。`custom.` 前缀的字段从自定义字段表中查找，
//! 其余字段映射到记录的固定属性。

use crate::models::Demand;
use crate::value::FieldValue;
use regex::Regex;
use std::sync::LazyLock;

/// 自定义字段前缀
pub const CUSTOM_PREFIX: &str = "custom.";

/// 可在规则中引用的固定字段
pub const FIXED_FIELDS: [&str; 7] = [
    "title",
    "description",
    "demandType",
    "priority",
    "businessJustification",
    "assetType",
    "assetOwner",
];

static CUSTOM_FIELD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^custom\.[A-Za-z0-9_-]+$").expect("custom field pattern"));

/// 字段查找结果
#[derive(Debug, Clone, PartialEq)]
pub enum FieldLookup {
    /// 已识别的字段（值可能为 Null）
    Found(FieldValue),
    /// 未识别的字段名
    NotFound,
}

impl FieldLookup {
    pub fn into_value(self) -> FieldValue {
        match self {
            Self::Found(value) => value,
            Self::NotFound => FieldValue::Null,
        }
    }
}

/// 字段解析器
pub struct FieldResolver;

impl FieldResolver {
    /// 解析字段值，未识别的字段解析为 Null
    pub fn resolve(demand: &Demand, field: &str) -> FieldValue {
        Self::lookup(demand, field).into_value()
    }

    /// 查找字段并区分“未识别字段”与“值为空”
    pub fn lookup(demand: &Demand, field: &str) -> FieldLookup {
        if let Some(name) = field.strip_prefix(CUSTOM_PREFIX) {
            if !Self::is_recognized(field) {
                return FieldLookup::NotFound;
            }
            return FieldLookup::Found(
                demand
                    .custom_fields
                    .get(name)
                    .cloned()
                    .unwrap_or(FieldValue::Null),
            );
        }

        let value = match field {
            "title" => Self::text(&demand.title),
            "description" => Self::text(&demand.description),
            "demandType" => demand
                .demand_type
                .map(|t| FieldValue::from(t.as_str()))
                .unwrap_or(FieldValue::Null),
            "priority" => demand
                .priority
                .map(|p| FieldValue::from(p.as_str()))
                .unwrap_or(FieldValue::Null),
            "businessJustification" => Self::text(&demand.business_justification),
            "assetType" => Self::text(&demand.asset_type),
            "assetOwner" => Self::text(&demand.asset_owner),
            _ => return FieldLookup::NotFound,
        };

        FieldLookup::Found(value)
    }

    /// 字段名是否在白名单内
    pub fn is_recognized(field: &str) -> bool {
        FIXED_FIELDS.contains(&field) || CUSTOM_FIELD_REGEX.is_match(field)
    }

    fn text(value: &Option<String>) -> FieldValue {
        value
            .as_ref()
            .map(|s| FieldValue::String(s.clone()))
            .unwrap_or(FieldValue::Null)
    }
}
