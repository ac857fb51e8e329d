//! datasync领域层：实体、错误、仓储与端口抽象

pub mod entities;
pub mod errors;
pub mod ports;
pub mod repositories;

pub use errors::{SyncError, SyncResult};
