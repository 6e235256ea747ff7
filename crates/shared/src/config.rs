//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 分类引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// 条件树允许的最大深度，超出的规则在创建/导入时即被拒绝
    pub max_tree_depth: usize,
    /// 无规则命中时使用的置信度
    pub default_confidence: f64,
    /// 无规则命中时使用的分类等级（A/B/C）
    pub default_classification: String,
    /// 是否生成评估日志
    pub evaluation_log_enabled: bool,
    /// 启动时导入的规则集文件
    pub rules_file: Option<PathBuf>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: 10,
            default_confidence: 0.5,
            default_classification: "C".to_string(),
            evaluation_log_enabled: true,
            rules_file: None,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，用于标识追踪和指标的来源
    pub service_name: String,
    pub log_level: String,
    /// 是否输出 JSON 格式日志（否则为人类可读格式）
    pub json_logs: bool,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    /// OpenTelemetry OTLP 端点，为空时禁用分布式追踪导出
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_port: 9090,
            otlp_endpoint: None,
        }
    }
}

impl ObservabilityConfig {
    /// 注入服务名
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub classification: ClassificationConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（CLASSIFIER_ 前缀，`__` 分隔层级，
    ///    如 CLASSIFIER_CLASSIFICATION__MAX_TREE_DEPTH -> classification.max_tree_depth）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("CLASSIFIER_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(service_name, &env, Path::new(&config_dir))
    }

    /// 从指定目录加载配置
    pub fn load_from(service_name: &str, env: &str, config_dir: &Path) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(
                Environment::with_prefix("CLASSIFIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.classification.max_tree_depth, 10);
        assert_eq!(config.classification.default_confidence, 0.5);
        assert_eq!(config.classification.default_classification, "C");
        assert!(config.classification.evaluation_log_enabled);
        assert_eq!(config.observability.metrics_port, 9090);
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let dir = std::env::temp_dir().join("classifier-config-missing");
        let config = AppConfig::load_from("classification-engine", "test", &dir).unwrap();

        assert_eq!(config.service_name, "classification-engine");
        assert_eq!(config.environment, "test");
        assert_eq!(config.classification.max_tree_depth, 10);
    }

    #[test]
    fn test_load_service_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("classifier-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("classification-engine.toml"),
            "[classification]\nmax_tree_depth = 4\ndefault_classification = \"B\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from("classification-engine", "test", &dir).unwrap();
        assert_eq!(config.classification.max_tree_depth, 4);
        assert_eq!(config.classification.default_classification, "B");
        // 未覆盖的字段保持默认值
        assert_eq!(config.classification.default_confidence, 0.5);

        std::fs::remove_dir_all(&dir).ok();
    }
}
