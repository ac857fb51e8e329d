//! 定时调度循环
//!
//! 每天在配置的时间点触发一次全量调度。配置每轮重读，
//! 运行期修改触发时间或开关下一轮即生效。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use datasync_domain::repositories::ConfigRepository;
use datasync_domain::{SyncError, SyncResult};

use crate::scheduler::SyncScheduler;

/// 配置无效或关闭时的重查间隔
const IDLE_RECHECK: Duration = Duration::from_secs(60);

pub struct ScheduleLoop {
    scheduler: Arc<SyncScheduler>,
    config_repo: Arc<dyn ConfigRepository>,
}

impl ScheduleLoop {
    pub fn new(scheduler: Arc<SyncScheduler>, config_repo: Arc<dyn ConfigRepository>) -> Self {
        Self {
            scheduler,
            config_repo,
        }
    }

    /// "HH:MM" 展开为每日一次的CRON表达式
    fn daily_cron(time: &str) -> SyncResult<Schedule> {
        let (hour, minute) = time
            .split_once(':')
            .and_then(|(h, m)| Some((h.parse::<u32>().ok()?, m.parse::<u32>().ok()?)))
            .filter(|(h, m)| *h < 24 && *m < 60)
            .ok_or_else(|| SyncError::config_error(format!("调度时间格式无效: {time}")))?;

        let expr = format!("0 {minute} {hour} * * *");
        Schedule::from_str(&expr)
            .map_err(|e| SyncError::config_error(format!("CRON表达式无效 {expr}: {e}")))
    }

    fn next_tick(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        schedule.after(&now).next()
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("定时调度循环启动");

        loop {
            let config = match self.config_repo.get_schedule_config().await {
                Ok(config) => config,
                Err(e) => {
                    error!("读取调度配置失败: {}", e);
                    if Self::wait_or_shutdown(&mut shutdown, IDLE_RECHECK).await {
                        break;
                    }
                    continue;
                }
            };

            if !config.enabled {
                debug!("定时调度已关闭，{}秒后重查", IDLE_RECHECK.as_secs());
                if Self::wait_or_shutdown(&mut shutdown, IDLE_RECHECK).await {
                    break;
                }
                continue;
            }

            let schedule = match Self::daily_cron(&config.time) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!("{}", e);
                    if Self::wait_or_shutdown(&mut shutdown, IDLE_RECHECK).await {
                        break;
                    }
                    continue;
                }
            };

            let now = Utc::now();
            let Some(next) = Self::next_tick(&schedule, now) else {
                warn!("无法计算下一次调度时间");
                if Self::wait_or_shutdown(&mut shutdown, IDLE_RECHECK).await {
                    break;
                }
                continue;
            };

            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            // 等待期间配置可能变化，最多睡到重查间隔
            let sleep_for = wait.min(IDLE_RECHECK);
            debug!(
                "下一次定时调度: {}, 本轮等待{}秒",
                next.format("%Y-%m-%d %H:%M:%S UTC"),
                sleep_for.as_secs()
            );
            if Self::wait_or_shutdown(&mut shutdown, sleep_for).await {
                break;
            }

            if Utc::now() >= next {
                match self.scheduler.trigger_schedule().await {
                    Ok(record) => info!(
                        "定时调度触发: 执行={}, 状态={}",
                        record.id,
                        record.status.as_str()
                    ),
                    Err(e) => error!("定时调度触发失败: {}", e),
                }
            }
        }

        info!("定时调度循环退出");
    }

    async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            result = shutdown.changed() => result.is_err() || *shutdown.borrow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_daily_cron_parses_valid_time() {
        let schedule = ScheduleLoop::daily_cron("17:30").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap();
        let next = ScheduleLoop::next_tick(&schedule, now).unwrap();
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2026, 8, 20, 17, 30, 0).unwrap()
        );

        // 当天时间已过则滚动到次日
        let late = Utc.with_ymd_and_hms(2026, 8, 20, 18, 0, 0).unwrap();
        let next = ScheduleLoop::next_tick(&schedule, late).unwrap();
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2026, 8, 21, 17, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_daily_cron_rejects_invalid_time() {
        assert!(ScheduleLoop::daily_cron("25:00").is_err());
        assert!(ScheduleLoop::daily_cron("17:60").is_err());
        assert!(ScheduleLoop::daily_cron("1730").is_err());
    }
}
