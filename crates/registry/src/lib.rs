//! 插件注册表与依赖图

pub mod catalog;
pub mod graph;
pub mod registry;

pub use catalog::{builtin_catalog, predefined_groups};
pub use graph::DependencyGraph;
pub use registry::PluginRegistry;
