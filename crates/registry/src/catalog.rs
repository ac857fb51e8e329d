//! 内置插件目录
//!
//! 插件在部署时静态声明，进程启动加载一次。依赖声明顺序即
//! 拓扑平局的打破顺序，调整顺序属于行为变更。

use datasync_domain::entities::{
    ColumnDef, Plugin, PluginGroup, PluginRole, PluginSchedule, ScheduleFrequency, SyncTaskType,
};

/// 插件分类常量（开放集合，允许扩展出cn_stock/hk_stock等新分类）
pub mod category {
    pub const STOCK: &str = "stock";
    pub const INDEX: &str = "index";
    pub const ETF_FUND: &str = "etf_fund";
    pub const SYSTEM: &str = "system";
}

struct PluginSpec {
    name: &'static str,
    category: &'static str,
    role: PluginRole,
    description: &'static str,
    dependencies: &'static [&'static str],
    optional_dependencies: &'static [&'static str],
    frequency: ScheduleFrequency,
    time: &'static str,
    columns: &'static [(&'static str, &'static str)],
}

impl PluginSpec {
    fn build(&self) -> Plugin {
        Plugin {
            name: self.name.to_string(),
            category: self.category.to_string(),
            role: self.role,
            description: self.description.to_string(),
            dependencies: self.dependencies.iter().map(|s| s.to_string()).collect(),
            optional_dependencies: self
                .optional_dependencies
                .iter()
                .map(|s| s.to_string())
                .collect(),
            schedule: PluginSchedule::new(self.frequency, self.time),
            schedule_enabled: true,
            enabled: true,
            table_name: self.name.to_string(),
            table_schema: self
                .columns
                .iter()
                .map(|(name, data_type)| ColumnDef::new(name, data_type))
                .collect(),
        }
    }
}

const CATALOG: &[PluginSpec] = &[
    PluginSpec {
        name: "trade_calendar",
        category: category::SYSTEM,
        role: PluginRole::Basic,
        description: "交易日历",
        dependencies: &[],
        optional_dependencies: &[],
        frequency: ScheduleFrequency::Daily,
        time: "08:30",
        columns: &[("exchange", "TEXT"), ("is_open", "INTEGER")],
    },
    PluginSpec {
        name: "stock_basic",
        category: category::STOCK,
        role: PluginRole::Basic,
        description: "股票基础信息",
        dependencies: &[],
        optional_dependencies: &[],
        frequency: ScheduleFrequency::Weekday,
        time: "17:00",
        columns: &[("ts_code", "TEXT"), ("name", "TEXT"), ("list_date", "TEXT")],
    },
    PluginSpec {
        name: "daily_quote",
        category: category::STOCK,
        role: PluginRole::Primary,
        description: "股票日线行情",
        dependencies: &["stock_basic"],
        optional_dependencies: &[],
        frequency: ScheduleFrequency::Weekday,
        time: "17:30",
        columns: &[
            ("ts_code", "TEXT"),
            ("open", "REAL"),
            ("high", "REAL"),
            ("low", "REAL"),
            ("close", "REAL"),
            ("vol", "REAL"),
        ],
    },
    PluginSpec {
        name: "daily_basic",
        category: category::STOCK,
        role: PluginRole::Primary,
        description: "股票每日指标",
        dependencies: &["stock_basic"],
        optional_dependencies: &["trade_calendar"],
        frequency: ScheduleFrequency::Weekday,
        time: "17:30",
        columns: &[
            ("ts_code", "TEXT"),
            ("turnover_rate", "REAL"),
            ("pe", "REAL"),
            ("pb", "REAL"),
            ("total_mv", "REAL"),
        ],
    },
    PluginSpec {
        name: "adj_factor",
        category: category::STOCK,
        role: PluginRole::Primary,
        description: "复权因子",
        dependencies: &["stock_basic"],
        optional_dependencies: &[],
        frequency: ScheduleFrequency::Weekday,
        time: "17:30",
        columns: &[("ts_code", "TEXT"), ("adj_factor", "REAL")],
    },
    PluginSpec {
        name: "money_flow",
        category: category::STOCK,
        role: PluginRole::Auxiliary,
        description: "个股资金流向",
        dependencies: &["daily_quote"],
        optional_dependencies: &[],
        frequency: ScheduleFrequency::Weekday,
        time: "18:00",
        columns: &[
            ("ts_code", "TEXT"),
            ("buy_lg_amount", "REAL"),
            ("sell_lg_amount", "REAL"),
            ("net_mf_amount", "REAL"),
        ],
    },
    PluginSpec {
        name: "index_basic",
        category: category::INDEX,
        role: PluginRole::Basic,
        description: "指数基础信息",
        dependencies: &[],
        optional_dependencies: &[],
        frequency: ScheduleFrequency::Weekday,
        time: "17:00",
        columns: &[("ts_code", "TEXT"), ("name", "TEXT"), ("market", "TEXT")],
    },
    PluginSpec {
        name: "index_daily",
        category: category::INDEX,
        role: PluginRole::Primary,
        description: "指数日线行情",
        dependencies: &["index_basic"],
        optional_dependencies: &[],
        frequency: ScheduleFrequency::Weekday,
        time: "17:30",
        columns: &[
            ("ts_code", "TEXT"),
            ("open", "REAL"),
            ("close", "REAL"),
            ("vol", "REAL"),
        ],
    },
    PluginSpec {
        name: "etf_fund_basic",
        category: category::ETF_FUND,
        role: PluginRole::Basic,
        description: "ETF基金基础信息",
        dependencies: &[],
        optional_dependencies: &[],
        frequency: ScheduleFrequency::Weekday,
        time: "17:00",
        columns: &[("ts_code", "TEXT"), ("name", "TEXT"), ("fund_type", "TEXT")],
    },
    PluginSpec {
        name: "etf_fund_daily",
        category: category::ETF_FUND,
        role: PluginRole::Primary,
        description: "ETF基金日线行情",
        dependencies: &["etf_fund_basic"],
        optional_dependencies: &[],
        frequency: ScheduleFrequency::Weekday,
        time: "18:00",
        columns: &[("ts_code", "TEXT"), ("close", "REAL"), ("vol", "REAL")],
    },
    PluginSpec {
        name: "derived_factor",
        category: category::STOCK,
        role: PluginRole::Derived,
        description: "衍生因子（依赖行情与每日指标计算）",
        dependencies: &["daily_quote", "daily_basic"],
        optional_dependencies: &["adj_factor"],
        frequency: ScheduleFrequency::Weekday,
        time: "18:30",
        columns: &[
            ("ts_code", "TEXT"),
            ("momentum_20d", "REAL"),
            ("volatility_20d", "REAL"),
        ],
    },
];

/// 内置目录，按声明顺序返回
pub fn builtin_catalog() -> Vec<Plugin> {
    CATALOG.iter().map(PluginSpec::build).collect()
}

/// 随系统发布的预置分组，启动时按名称幂等落库
pub fn predefined_groups() -> Vec<PluginGroup> {
    let specs: &[(&str, &str, &[&str], SyncTaskType)] = &[
        (
            "股票日线",
            category::STOCK,
            &["daily_quote", "daily_basic", "adj_factor"],
            SyncTaskType::Incremental,
        ),
        (
            "指数日线",
            category::INDEX,
            &["index_basic", "index_daily"],
            SyncTaskType::Incremental,
        ),
        (
            "ETF日线",
            category::ETF_FUND,
            &["etf_fund_basic", "etf_fund_daily"],
            SyncTaskType::Incremental,
        ),
        (
            "基础数据",
            category::SYSTEM,
            &["trade_calendar", "stock_basic"],
            SyncTaskType::Full,
        ),
    ];

    specs
        .iter()
        .map(|(name, cat, plugins, task_type)| {
            let mut group = PluginGroup::new(
                name,
                plugins.iter().map(|s| s.to_string()).collect(),
                *task_type,
            );
            group.category = cat.to_string();
            group.is_predefined = true;
            group.is_readonly = true;
            group
        })
        .collect()
}
