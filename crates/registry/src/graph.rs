//! 插件依赖图
//!
//! 由注册表构建一次，之后只读。硬依赖子图必须无环，
//! 每次构建都防御性校验；无序节点间的平局按注册表声明顺序打破，
//! 保证拓扑排序结果可复现。

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use datasync_domain::entities::Plugin;
use datasync_domain::{SyncError, SyncResult};

pub struct DependencyGraph {
    /// 声明顺序的插件名
    order: Vec<String>,
    index: HashMap<String, usize>,
    hard: HashMap<String, Vec<String>>,
    optional: HashMap<String, Vec<String>>,
    /// 硬依赖的直接反向边：被依赖方 -> 依赖方
    reverse_hard: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn build(plugins: &[Plugin]) -> SyncResult<Self> {
        let mut order = Vec::with_capacity(plugins.len());
        let mut index = HashMap::new();
        for (i, plugin) in plugins.iter().enumerate() {
            if index.insert(plugin.name.clone(), i).is_some() {
                return Err(SyncError::config_error(format!(
                    "插件名重复: {}",
                    plugin.name
                )));
            }
            order.push(plugin.name.clone());
        }

        let mut hard: HashMap<String, Vec<String>> = HashMap::new();
        let mut optional: HashMap<String, Vec<String>> = HashMap::new();
        let mut reverse_hard: HashMap<String, Vec<String>> = HashMap::new();
        for plugin in plugins {
            for dep in plugin.dependencies.iter().chain(&plugin.optional_dependencies) {
                if !index.contains_key(dep) {
                    return Err(SyncError::config_error(format!(
                        "插件 {} 声明了未知依赖: {}",
                        plugin.name, dep
                    )));
                }
            }
            hard.insert(plugin.name.clone(), plugin.dependencies.clone());
            optional.insert(plugin.name.clone(), plugin.optional_dependencies.clone());
            for dep in &plugin.dependencies {
                reverse_hard
                    .entry(dep.clone())
                    .or_default()
                    .push(plugin.name.clone());
            }
        }

        let graph = Self {
            order,
            index,
            hard,
            optional,
            reverse_hard,
        };
        // 硬依赖无环是注册表的硬性不变式，加载即校验
        graph.topological_order(&graph.order.clone(), false)?;
        Ok(graph)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn declaration_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn hard_dependencies(&self, name: &str) -> &[String] {
        self.hard.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn optional_dependencies(&self, name: &str) -> &[String] {
        self.optional.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn direct_dependents(&self, name: &str) -> &[String] {
        self.reverse_hard.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 对给定子集做拓扑排序
    ///
    /// 只考虑子集内部的边；include_optional时可选依赖参与排序，
    /// 但环检测仅针对硬依赖，可选边构成的环通过忽略可选边打破。
    pub fn topological_order(
        &self,
        plugin_names: &[String],
        include_optional: bool,
    ) -> SyncResult<Vec<String>> {
        let subset: HashSet<&str> = plugin_names.iter().map(String::as_str).collect();
        for name in plugin_names {
            if !self.index.contains_key(name) {
                return Err(SyncError::plugin_not_found(name.clone()));
            }
        }

        let mut hard_indeg: HashMap<&str, usize> = HashMap::new();
        let mut opt_indeg: HashMap<&str, usize> = HashMap::new();
        let mut hard_out: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut opt_out: HashMap<&str, Vec<&str>> = HashMap::new();
        for &name in &subset {
            hard_indeg.insert(name, 0);
            opt_indeg.insert(name, 0);
        }
        for &name in &subset {
            for dep in self.hard_dependencies(name) {
                if subset.contains(dep.as_str()) {
                    *hard_indeg.get_mut(name).unwrap() += 1;
                    hard_out.entry(dep.as_str()).or_default().push(name);
                }
            }
            if include_optional {
                for dep in self.optional_dependencies(name) {
                    if subset.contains(dep.as_str()) {
                        *opt_indeg.get_mut(name).unwrap() += 1;
                        opt_out.entry(dep.as_str()).or_default().push(name);
                    }
                }
            }
        }

        // (声明序号, 名称) 的有序就绪池，保证平局打破确定
        let mut fully_ready: BTreeSet<(usize, &str)> = BTreeSet::new();
        let mut hard_ready: BTreeSet<(usize, &str)> = BTreeSet::new();
        for &name in &subset {
            if hard_indeg[name] == 0 {
                let key = (self.index[name], name);
                hard_ready.insert(key);
                if opt_indeg[name] == 0 {
                    fully_ready.insert(key);
                }
            }
        }

        let mut result = Vec::with_capacity(subset.len());
        while result.len() < subset.len() {
            // 优先取硬/可选依赖都就绪的节点；若只剩可选环，
            // 退而取硬依赖就绪者，等价于忽略成环的可选边
            let key = match fully_ready.iter().next().copied() {
                Some(key) => key,
                None => match hard_ready.iter().next().copied() {
                    Some(key) => key,
                    None => return Err(SyncError::CircularDependency),
                },
            };
            fully_ready.remove(&key);
            hard_ready.remove(&key);
            let (_, name) = key;
            result.push(name.to_string());

            for &succ in hard_out.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                let d = hard_indeg.get_mut(succ).unwrap();
                *d -= 1;
                if *d == 0 {
                    let key = (self.index[succ], succ);
                    hard_ready.insert(key);
                    if opt_indeg[succ] == 0 {
                        fully_ready.insert(key);
                    }
                }
            }
            for &succ in opt_out.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                let d = opt_indeg.get_mut(succ).unwrap();
                *d -= 1;
                if *d == 0 && hard_indeg[succ] == 0 {
                    fully_ready.insert((self.index[succ], succ));
                }
            }
        }

        Ok(result)
    }

    /// 传递闭包意义上的硬依赖下游，供级联取消使用
    pub fn reverse_dependents(&self, plugin_name: &str) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        for dep in self.direct_dependents(plugin_name) {
            if visited.insert(dep.clone()) {
                queue.push_back(dep.clone());
            }
        }
        while let Some(current) = queue.pop_front() {
            for dep in self.direct_dependents(&current) {
                if visited.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
        }
        visited
    }

    /// 把插件集合连同其硬依赖（可选include_optional时含可选依赖）
    /// 一并展开，结果按声明顺序返回
    pub fn expand_with_dependencies(
        &self,
        plugin_names: &[String],
        include_optional: bool,
    ) -> SyncResult<Vec<String>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for name in plugin_names {
            if !self.index.contains_key(name) {
                return Err(SyncError::plugin_not_found(name.clone()));
            }
            if visited.insert(name.clone()) {
                queue.push_back(name.clone());
            }
        }
        while let Some(current) = queue.pop_front() {
            let deps = self.hard_dependencies(&current).iter();
            let opt_deps = if include_optional {
                self.optional_dependencies(&current)
            } else {
                &[]
            };
            for dep in deps.chain(opt_deps) {
                if visited.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
        }

        let mut result: Vec<String> = visited.into_iter().collect();
        result.sort_by_key(|name| self.index[name]);
        Ok(result)
    }

    /// 正向邻接表（硬依赖），供API导出
    pub fn forward_adjacency(&self) -> HashMap<String, Vec<String>> {
        self.hard.clone()
    }

    /// 反向邻接表（直接硬依赖下游），供API导出
    pub fn reverse_adjacency(&self) -> HashMap<String, Vec<String>> {
        self.order
            .iter()
            .map(|name| (name.clone(), self.direct_dependents(name).to_vec()))
            .collect()
    }
}
