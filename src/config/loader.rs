//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::{AppConfig, EngineKind, InferenceBackendKind};

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// 按优先级从高到低合并配置：
/// 1. 环境变量（前缀 `AILAB_`，层级分隔符 `__`）
/// 2. 配置文件（config.toml 或 config.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `AILAB_SERVER__PORT=8080`
/// - `AILAB_ENGINE__URL=http://127.0.0.1:8888`
/// - `AILAB_ENGINE__KIND=fake`
/// - `AILAB_INFERENCE__BACKEND=cluster`
/// - `AILAB_CLUSTER__API_URL=https://10.0.0.1:6443`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 首先设置默认值（最低优先级）
    builder = builder
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 5070)?
        .set_default("engine.kind", "podman")?
        .set_default("engine.url", "http://127.0.0.1:8888")?
        .set_default("engine.connection_name", "podman")?
        .set_default("engine.vm_type", "native")?
        .set_default("engine.timeout_secs", 60)?
        .set_default("cluster.enabled", false)?
        .set_default("cluster.api_url", "https://127.0.0.1:6443")?
        .set_default("cluster.namespace", "default")?
        .set_default("cluster.context_name", "default")?
        .set_default("inference.backend", "engine")?
        .set_default("inference.refresh_retries", 3)?
        .set_default("inference.status_poll_secs", 10)?
        .set_default("applications.health_check_interval_secs", 10)?
        .set_default("applications.container_start_poll_secs", 5)?
        .set_default("applications.container_start_timeout_secs", 3600)?
        .set_default("storage.models_dir", "data/models")?
        .set_default("storage.recipes_dir", "data/recipes")?
        .set_default("log.level", "info")?
        .set_default("log.json", false)?;

    // 2. 添加配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 添加环境变量（最高优先级）
    // 注意: 环境变量名会被转换为小写
    builder = builder.add_source(
        Environment::with_prefix("AILAB")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ConfigError::ParseError(format!("Failed to deserialize config: {}", e))
    })?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "Server port cannot be 0".to_string(),
        ));
    }

    if config.engine.kind == EngineKind::Podman && config.engine.url.is_empty() {
        return Err(ConfigError::ValidationError(
            "Engine URL cannot be empty when engine kind is podman".to_string(),
        ));
    }

    if config.inference.backend == InferenceBackendKind::Cluster {
        if !config.cluster.enabled {
            return Err(ConfigError::ValidationError(
                "Cluster inference backend requires cluster.enabled".to_string(),
            ));
        }
        if config.cluster.api_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "Cluster API URL cannot be empty when the cluster backend is selected".to_string(),
            ));
        }
    }

    if config.inference.status_poll_secs == 0
        || config.applications.health_check_interval_secs == 0
        || config.applications.container_start_poll_secs == 0
    {
        return Err(ConfigError::ValidationError(
            "Poll intervals cannot be 0".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("Server: {}", config.server.addr());
    tracing::info!("Engine: {:?} ({})", config.engine.kind, config.engine.url);
    tracing::info!("Engine Connection: {} ({:?})", config.engine.connection_name, config.engine.vm_type);
    if config.cluster.enabled {
        tracing::info!(
            "Cluster: {} (context {}, namespace {})",
            config.cluster.api_url,
            config.cluster.context_name,
            config.cluster.namespace
        );
    }
    tracing::info!("Inference Backend: {}", config.inference.backend.as_str());
    tracing::info!("Inference Status Poll: {}s", config.inference.status_poll_secs);
    tracing::info!("Health Check Interval: {}s", config.applications.health_check_interval_secs);
    tracing::info!("Models Directory: {:?}", config.storage.models_dir);
    tracing::info!("Recipes Directory: {:?}", config.storage.recipes_dir);
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validation_passes_for_valid_config() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_error_for_zero_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_empty_engine_url() {
        let mut config = AppConfig::default();
        config.engine.url = String::new();
        assert!(validate_config(&config).is_err());

        config.engine.kind = EngineKind::Fake;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_cluster_backend() {
        let mut config = AppConfig::default();
        config.inference.backend = InferenceBackendKind::Cluster;
        assert!(validate_config(&config).is_err());

        config.cluster.enabled = true;
        assert!(validate_config(&config).is_ok());

        config.cluster.api_url = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_zero_poll() {
        let mut config = AppConfig::default();
        config.applications.container_start_poll_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[engine]\nkind = \"fake\"\n\n[inference]\nrefresh_retries = 5\n\n[storage]\nmodels_dir = \"/srv/models\""
        )
        .unwrap();

        let config = load_config_from_path(Some(file.path())).unwrap();
        assert_eq!(config.engine.kind, EngineKind::Fake);
        assert_eq!(config.inference.refresh_retries, 5);
        assert_eq!(config.storage.models_dir, std::path::PathBuf::from("/srv/models"));
        assert_eq!(config.server.port, 5070);
    }
}
