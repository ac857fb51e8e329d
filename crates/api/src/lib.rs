//! HTTP接口层
//!
//! 把调度器、注册表和仓储暴露为REST端点，
//! 统一的响应信封和错误映射。

pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use response::{ApiResponse, PaginatedResponse};
pub use routes::{create_routes, AppState};
