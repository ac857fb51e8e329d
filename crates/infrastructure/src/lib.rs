//! 基础设施层：SQLite仓储、数仓适配器、交易日历与内置执行器

pub mod calendar;
pub mod database;
pub mod executor;
pub mod warehouse;

pub use calendar::WeekdayCalendar;
pub use database::{
    create_pool, SqliteConfigRepository, SqliteExecutionRepository, SqliteGroupRepository,
    SqliteTaskRepository,
};
pub use executor::WarehousePluginExecutor;
pub use warehouse::SqliteWarehouse;
