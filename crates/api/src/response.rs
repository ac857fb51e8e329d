//! 成功响应信封与分页封装
//!
//! 错误走error.rs的独立信封，这里只负责成功路径。

use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// 统一成功信封，无载荷时省略data字段
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn with_data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            timestamp: Utc::now(),
        }
    }
}

impl ApiResponse<()> {
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            timestamp: Utc::now(),
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, page_size: i64) -> Self {
        // page_size已在仓储层钳制，0只会出现在手工构造的过滤器里
        let total_pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };

        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}

pub fn success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, ApiResponse::with_data(data))
}

pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, ApiResponse::with_data(data))
}

pub fn no_content() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub fn accepted() -> impl IntoResponse {
    (StatusCode::ACCEPTED, ApiResponse::empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_with_data() {
        let response = ApiResponse::with_data("data");
        assert!(response.success);
        assert_eq!(response.data, Some("data"));

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"data\":\"data\""));
    }

    #[test]
    fn test_empty_envelope_omits_data() {
        let json = serde_json::to_string(&ApiResponse::empty()).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_paginated_response_total_pages() {
        let response: PaginatedResponse<&str> =
            PaginatedResponse::new(vec!["a", "b", "c"], 10, 2, 3);
        assert_eq!(response.total_pages, 4);

        let response: PaginatedResponse<&str> = PaginatedResponse::new(vec![], 0, 1, 10);
        assert_eq!(response.total_pages, 0);

        let response: PaginatedResponse<&str> = PaginatedResponse::new(vec!["a"], 1, 1, 0);
        assert_eq!(response.total_pages, 0);
    }
}
