//! 应用配置
//!
//! TOML文件 + DATASYNC_* 环境变量两层来源，环境变量优先。

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auditor: AuditorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/datasync.db".to_string(),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
    /// 缺数汇总缓存的TTL（秒）
    pub cache_ttl_seconds: u64,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 300,
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let config: AppConfig = builder
            .add_source(Environment::with_prefix("DATASYNC").separator("__"))
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("服务端口不能为0");
        }
        if self.database.url.is_empty() {
            anyhow::bail!("数据库URL不能为空");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("数据库连接数必须大于0");
        }
        if self.auditor.cache_ttl_seconds == 0 {
            anyhow::bail!("缺数审计缓存TTL必须大于0");
        }
        Ok(())
    }
}
