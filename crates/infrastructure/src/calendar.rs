//! 交易日历实现
//!
//! 默认按工作日近似（周一至周五），节假日表可通过排除日期注入。

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};

use datasync_domain::ports::TradingCalendar;
use datasync_domain::{SyncError, SyncResult};

#[derive(Default)]
pub struct WeekdayCalendar {
    holidays: HashSet<NaiveDate>,
}

impl WeekdayCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    fn is_weekday(date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

#[async_trait]
impl TradingCalendar for WeekdayCalendar {
    async fn is_trading_day(&self, date: NaiveDate) -> SyncResult<bool> {
        Ok(Self::is_weekday(date) && !self.holidays.contains(&date))
    }

    async fn trading_days_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<Vec<NaiveDate>> {
        if start > end {
            return Err(SyncError::invalid_params(format!(
                "日期区间无效: {start} > {end}"
            )));
        }

        let mut days = Vec::new();
        let mut cur = start;
        while cur <= end {
            if Self::is_weekday(cur) && !self.holidays.contains(&cur) {
                days.push(cur);
            }
            cur = cur
                .succ_opt()
                .ok_or_else(|| SyncError::Internal("日期越界".to_string()))?;
        }
        Ok(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_weekends_excluded() {
        let calendar = WeekdayCalendar::new();
        assert!(calendar.is_trading_day(d("2026-08-21")).await.unwrap()); // 周五
        assert!(!calendar.is_trading_day(d("2026-08-22")).await.unwrap()); // 周六
        assert!(!calendar.is_trading_day(d("2026-08-23")).await.unwrap()); // 周日

        let days = calendar
            .trading_days_between(d("2026-08-17"), d("2026-08-23"))
            .await
            .unwrap();
        assert_eq!(days.len(), 5);
    }

    #[tokio::test]
    async fn test_holidays_excluded() {
        let calendar = WeekdayCalendar::with_holidays([d("2026-08-20")]);
        assert!(!calendar.is_trading_day(d("2026-08-20")).await.unwrap());

        let days = calendar
            .trading_days_between(d("2026-08-17"), d("2026-08-21"))
            .await
            .unwrap();
        assert_eq!(days.len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let calendar = WeekdayCalendar::new();
        let result = calendar
            .trading_days_between(d("2026-08-21"), d("2026-08-17"))
            .await;
        assert!(result.is_err());
    }
}
