use crate::config::config::{AppConfig, DatabaseConfig, SecurityConfig};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use std::path::PathBuf;

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 搜索路径：
    /// 1. ./config.toml
    /// 2. 环境变量
    pub fn load() -> Result<AppConfig, figment::Error> {
        let figment = Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("PGMCP_").split("_").global());

        figment.extract()
    }

    /// 从指定路径加载配置
    pub fn load_from(path: PathBuf) -> Result<AppConfig, figment::Error> {
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("PGMCP_").split("_").global());

        figment.extract()
    }

    /// 加载数据库配置
    pub fn load_database_config() -> Result<DatabaseConfig, figment::Error> {
        let figment = Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("PGMCP_DATABASE_").split("_").global());

        figment.extract()
    }

    /// 加载安全配置
    pub fn load_security_config() -> Result<SecurityConfig, figment::Error> {
        let figment = Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("PGMCP_SECURITY_").split("_").global());

        figment.extract()
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        if config.server.port == 0 {
            return Err(ConfigValidationError::InvalidPort);
        }

        if config.database.url.is_empty() {
            return Err(ConfigValidationError::MissingDatabaseUrl);
        }

        if !config.database.url.starts_with("postgres://")
            && !config.database.url.starts_with("postgresql://")
        {
            return Err(ConfigValidationError::InvalidDatabaseUrl);
        }

        if config.security.jwt_secret.is_empty() {
            return Err(ConfigValidationError::MissingJwtSecret);
        }

        if config.security.rate_limit_per_minute == 0 {
            return Err(ConfigValidationError::InvalidRateLimit);
        }

        for network in &config.security.trusted_networks {
            if network.parse::<ipnet::IpNet>().is_err() {
                return Err(ConfigValidationError::InvalidTrustedNetwork(
                    network.clone(),
                ));
            }
        }

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigValidationError {
    #[error("服务端口无效，必须大于 0")]
    InvalidPort,

    #[error("数据库连接 URL 未配置")]
    MissingDatabaseUrl,

    #[error("数据库连接 URL 必须以 postgres:// 或 postgresql:// 开头")]
    InvalidDatabaseUrl,

    #[error("JWT 签名密钥未配置")]
    MissingJwtSecret,

    #[error("限流阈值无效，必须大于 0")]
    InvalidRateLimit,

    #[error("可信网段无效: {0}")]
    InvalidTrustedNetwork(String),

    #[error("配置路径无效: {0}")]
    InvalidPath(String),
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("config.toml")
}

/// 检查配置文件是否存在
pub fn config_exists() -> bool {
    default_config_path().exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_development_config() {
        let config = AppConfig::development();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_database_url() {
        let mut config = AppConfig::development();
        config.database.url = "mysql://localhost/db".into();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidDatabaseUrl)
        ));
    }

    #[test]
    fn test_validate_rejects_bad_trusted_network() {
        let mut config = AppConfig::development();
        config.security.trusted_networks.push("not-a-cidr".into());
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidTrustedNetwork(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_rate_limit() {
        let mut config = AppConfig::development();
        config.security.rate_limit_per_minute = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidRateLimit)
        ));
    }
}
