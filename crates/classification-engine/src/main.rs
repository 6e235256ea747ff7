//! 需求分类引擎服务
//!
//! 从标准输入逐行读取需求 JSON，向标准输出逐行写出分类结果 JSON。

use anyhow::{Context, Result};
use classification_engine::{
    ClassificationEngine, ClassificationResult, Demand, EngineSettings, InMemoryResultStore, InMemoryRuleRepository,
    ResultStore, RuleCompiler, RuleSetImporter,
};
use classifier_shared::config::AppConfig;
use classifier_shared::observability;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "classification-engine";
const INVALID_DEMAND: &str = "INVALID_DEMAND";

#[tokio::main]
async fn main() -> Result<()> {
    // 统一加载配置：从 config/{service_name}.toml 加载，包含可观测性配置
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let service_name = if config.service_name.is_empty() {
        SERVICE_NAME
    } else {
        config.service_name.as_str()
    };
    let obs_config = config.observability.clone().with_service_name(service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting {} ({})...", service_name, config.environment);

    let settings = EngineSettings::try_from(&config.classification)
        .context("invalid classification settings")?;

    let compiler = RuleCompiler::new(settings.max_tree_depth);
    let repository = Arc::new(InMemoryRuleRepository::with_compiler(compiler.clone()));
    let importer = RuleSetImporter::new(repository.clone(), compiler);
    let engine = ClassificationEngine::new(repository.clone(), settings);
    let results = InMemoryResultStore::new();

    if let Some(path) = &config.classification.rules_file {
        let count = import_rules_file(&importer, path).await?;
        info!(
            max_depth = repository.max_depth(),
            "Loaded {} rules from {}",
            count,
            path.display()
        );
    } else {
        warn!(
            "No rules file configured, every demand will receive the default classification {}",
            engine.settings().default_classification
        );
    }

    tokio::select! {
        outcome = run(&engine, &results) => outcome?,
        _ = shutdown_signal() => {}
    }

    info!(
        results = results.len(),
        rules = repository.stats().active_count,
        "Service shutdown complete"
    );
    Ok(())
}

/// 导入启动时的规则集文件
async fn import_rules_file(importer: &RuleSetImporter, path: &Path) -> Result<usize> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read rules file {}", path.display()))?;

    match importer.import_json(&json).await {
        Ok(rules) => Ok(rules.len()),
        Err(e) => {
            for rule_error in e.validation_errors() {
                error!("{}", rule_error);
            }
            Err(e).context("rules file rejected")
        }
    }
}

/// 逐行处理标准输入中的需求
async fn run(engine: &ClassificationEngine, results: &InMemoryResultStore) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let output = match classify_line(engine, results, line).await {
            Ok(result) => serde_json::to_value(&result)?,
            Err((code, message)) => error_line(code, &message),
        };

        let mut out = serde_json::to_vec(&output)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    info!("Input closed");
    Ok(())
}

/// 处理单行输入，失败时返回错误码与描述
async fn classify_line(
    engine: &ClassificationEngine,
    results: &InMemoryResultStore,
    line: &str,
) -> std::result::Result<ClassificationResult, (&'static str, String)> {
    // 结构非法的需求在进入引擎前被拒绝
    let demand: Demand = serde_json::from_str(line).map_err(|e| {
        warn!(error = %e, "Rejecting malformed demand");
        (INVALID_DEMAND, e.to_string())
    })?;

    let result = engine.classify(&demand).await.map_err(|e| {
        error!(code = e.code(), error = %e, "Classification failed");
        (e.code(), e.to_string())
    })?;

    results.save(&result).await.map_err(|e| {
        error!(code = e.code(), error = %e, "Failed to store classification result");
        (e.code(), e.to_string())
    })?;

    Ok(result)
}

/// 失败行的输出对象，保持输入与输出逐行对应
fn error_line(code: &str, message: &str) -> serde_json::Value {
    json!({ "error": { "code": code, "message": message } })
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classification_engine::RuleError;

    fn engine(repository: Arc<dyn classification_engine::RuleRepository>) -> ClassificationEngine {
        ClassificationEngine::new(repository, EngineSettings::default())
    }

    #[tokio::test]
    async fn test_classify_line_success() {
        let engine = engine(Arc::new(InMemoryRuleRepository::new()));
        let results = InMemoryResultStore::new();

        let result = classify_line(&engine, &results, r#"{"assetType": "Database"}"#)
            .await
            .unwrap();

        assert_eq!(result.classification.as_str(), "C");
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_classify_line_malformed_demand() {
        let engine = engine(Arc::new(InMemoryRuleRepository::new()));
        let results = InMemoryResultStore::new();

        let (code, _) = classify_line(&engine, &results, r#"{"priority": "URGENT"}"#)
            .await
            .unwrap_err();

        assert_eq!(code, INVALID_DEMAND);
        assert!(results.is_empty());
    }

    #[test]
    fn test_error_line_shape() {
        let line = error_line(RuleError::Unavailable("down".into()).code(), "down");
        assert_eq!(
            line,
            json!({"error": {"code": "UNAVAILABLE", "message": "down"}})
        );
    }
}
