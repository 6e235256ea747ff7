//! 分类引擎错误类型

use thiserror::Error;

/// 单条规则的校验问题
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationIssue {
    #[error("条件树深度 {depth} 超过上限 {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("规则名称重复: {0}")]
    DuplicateName(String),

    #[error("未识别的字段 '{field}' ({path})")]
    UnknownField { path: String, field: String },

    #[error("未识别的操作符 '{operator}' ({path})")]
    UnknownOperator { path: String, operator: String },

    #[error("操作符 {operator} 的值无效 ({path}): {reason}")]
    InvalidValue {
        path: String,
        operator: String,
        reason: String,
    },

    #[error("置信度 {0} 超出范围 [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("无效的条件节点 ({path}): {reason}")]
    MalformedNode { path: String, reason: String },

    #[error("字段 {field} 无效: {message}")]
    InvalidAttribute { field: String, message: String },
}

impl ValidationIssue {
    /// 获取问题码
    pub fn code(&self) -> &'static str {
        match self {
            Self::DepthExceeded { .. } => "DEPTH_EXCEEDED",
            Self::DuplicateName(_) => "DUPLICATE_NAME",
            Self::UnknownField { .. } => "UNKNOWN_FIELD",
            Self::UnknownOperator { .. } => "UNKNOWN_OPERATOR",
            Self::InvalidValue { .. } => "INVALID_VALUE",
            Self::ConfidenceOutOfRange(_) => "CONFIDENCE_OUT_OF_RANGE",
            Self::MalformedNode { .. } => "MALFORMED_NODE",
            Self::InvalidAttribute { .. } => "INVALID_ATTRIBUTE",
        }
    }
}

/// 某条规则的全部校验问题
#[derive(Debug, Clone, PartialEq)]
pub struct RuleValidationError {
    /// 规则在导入文档中的位置
    pub index: usize,
    pub rule_name: String,
    pub issues: Vec<ValidationIssue>,
}

impl std::fmt::Display for RuleValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let issues: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        write!(
            f,
            "规则 #{} '{}': {}",
            self.index,
            self.rule_name,
            issues.join("; ")
        )
    }
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则校验失败: {} 条规则存在问题", .0.len())]
    Validation(Vec<RuleValidationError>),

    #[error("规则仓储不可用: {0}")]
    Unavailable(String),

    #[error("规则未找到: {0}")]
    RuleNotFound(i64),

    #[error("规则名称已存在: {0}")]
    DuplicateName(String),

    #[error("配置无效: {0}")]
    Config(String),

    #[error("不支持的规则集版本: {0}")]
    UnsupportedVersion(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::DuplicateName(_) => "DUPLICATE_NAME",
            Self::Config(_) => "CONFIG_ERROR",
            Self::UnsupportedVersion(_) => "UNSUPPORTED_VERSION",
            Self::JsonError(_) => "JSON_ERROR",
        }
    }

    /// 校验错误的明细，其他错误返回空切片
    pub fn validation_errors(&self) -> &[RuleValidationError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(RuleError::Unavailable("db down".into()).code(), "UNAVAILABLE");
        assert_eq!(
            ValidationIssue::DepthExceeded { depth: 11, max: 10 }.code(),
            "DEPTH_EXCEEDED"
        );
    }

    #[test]
    fn test_validation_error_display() {
        let err = RuleValidationError {
            index: 1,
            rule_name: "Dup".to_string(),
            issues: vec![
                ValidationIssue::DuplicateName("Dup".to_string()),
                ValidationIssue::ConfidenceOutOfRange(1.5),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("Dup"));
        assert!(text.contains("1.5"));

        let wrapped = RuleError::Validation(vec![err]);
        assert_eq!(wrapped.validation_errors().len(), 1);
        assert!(wrapped.to_string().contains("1 条规则"));
    }
}
