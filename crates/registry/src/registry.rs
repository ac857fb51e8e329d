//! 插件注册表
//!
//! 进程启动时从声明式目录加载一次，依赖拓扑不可变；
//! 运行期只允许启停和调度配置两类变更，读多写少。

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::info;

use datasync_domain::entities::{Plugin, PluginRole, PluginSchedule};
use datasync_domain::{SyncError, SyncResult};

use crate::graph::DependencyGraph;

pub struct PluginRegistry {
    graph: DependencyGraph,
    order: Vec<String>,
    plugins: RwLock<HashMap<String, Plugin>>,
}

impl PluginRegistry {
    /// 加载目录并校验硬依赖无环，违例立即失败
    pub fn load(catalog: Vec<Plugin>) -> SyncResult<Self> {
        for plugin in &catalog {
            if plugin.schedule.parse_time().is_none() {
                return Err(SyncError::config_error(format!(
                    "插件 {} 的调度时间无效: {}",
                    plugin.name, plugin.schedule.time
                )));
            }
            if plugin.table_name.is_empty()
                || !plugin
                    .table_name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(SyncError::config_error(format!(
                    "插件 {} 的表名非法: {}",
                    plugin.name, plugin.table_name
                )));
            }
        }

        let graph = DependencyGraph::build(&catalog)?;
        let order: Vec<String> = catalog.iter().map(|p| p.name.clone()).collect();
        let plugins = catalog
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect::<HashMap<_, _>>();

        info!("插件注册表加载完成，共 {} 个插件", plugins.len());
        Ok(Self {
            graph,
            order,
            plugins: RwLock::new(plugins),
        })
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn declaration_order(&self) -> &[String] {
        &self.order
    }

    pub async fn get(&self, name: &str) -> Option<Plugin> {
        self.plugins.read().await.get(name).cloned()
    }

    pub async fn require(&self, name: &str) -> SyncResult<Plugin> {
        self.get(name)
            .await
            .ok_or_else(|| SyncError::plugin_not_found(name))
    }

    /// 按声明顺序列出，支持分类/角色过滤
    pub async fn list(&self, category: Option<&str>, role: Option<PluginRole>) -> Vec<Plugin> {
        let plugins = self.plugins.read().await;
        self.order
            .iter()
            .filter_map(|name| plugins.get(name))
            .filter(|p| category.map_or(true, |c| p.category == c))
            .filter(|p| role.map_or(true, |r| p.role == r))
            .cloned()
            .collect()
    }

    /// 参与定时调度的插件：启用且调度开启
    pub async fn schedule_candidates(&self) -> Vec<Plugin> {
        let plugins = self.plugins.read().await;
        self.order
            .iter()
            .filter_map(|name| plugins.get(name))
            .filter(|p| p.enabled && p.schedule_enabled)
            .cloned()
            .collect()
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> SyncResult<Plugin> {
        let mut plugins = self.plugins.write().await;
        let plugin = plugins
            .get_mut(name)
            .ok_or_else(|| SyncError::plugin_not_found(name))?;
        plugin.enabled = enabled;
        info!("插件 {} 已{}", name, if enabled { "启用" } else { "禁用" });
        Ok(plugin.clone())
    }

    pub async fn set_schedule_enabled(&self, name: &str, enabled: bool) -> SyncResult<Plugin> {
        let mut plugins = self.plugins.write().await;
        let plugin = plugins
            .get_mut(name)
            .ok_or_else(|| SyncError::plugin_not_found(name))?;
        plugin.schedule_enabled = enabled;
        Ok(plugin.clone())
    }

    pub async fn update_schedule(&self, name: &str, schedule: PluginSchedule) -> SyncResult<Plugin> {
        if schedule.parse_time().is_none() {
            return Err(SyncError::invalid_params(format!(
                "调度时间无效: {}",
                schedule.time
            )));
        }
        let mut plugins = self.plugins.write().await;
        let plugin = plugins
            .get_mut(name)
            .ok_or_else(|| SyncError::plugin_not_found(name))?;
        plugin.schedule = schedule;
        Ok(plugin.clone())
    }
}
