//! 进程级并发控制
//!
//! 全局信号量限制同时运行的任务数，预算用完时准入排队等待而不报错。
//! 运维可在运行期调整上限：扩容直接补发许可，缩容异步吸收差额。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

use datasync_domain::{SyncError, SyncResult};

pub struct ConcurrencyController {
    semaphore: Arc<Semaphore>,
    limit: Mutex<usize>,
}

impl ConcurrencyController {
    pub fn new(max_concurrent_tasks: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks)),
            limit: Mutex::new(max_concurrent_tasks),
        }
    }

    pub fn limit(&self) -> usize {
        *self.limit.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 申请一个运行许可，预算耗尽时挂起等待
    pub async fn acquire(&self) -> SyncResult<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::Internal("并发信号量已关闭".to_string()))
    }

    /// 运行期调整并发上限
    ///
    /// 缩容不打断在途任务，差额许可由后台任务逐个吸收后销毁。
    pub fn resize(&self, new_limit: usize) -> SyncResult<()> {
        if new_limit == 0 {
            return Err(SyncError::invalid_params("最大并发任务数必须大于0"));
        }

        let mut limit = self.limit.lock().unwrap_or_else(|e| e.into_inner());
        let old_limit = *limit;
        if new_limit > old_limit {
            self.semaphore.add_permits(new_limit - old_limit);
        } else if new_limit < old_limit {
            let delta = (old_limit - new_limit) as u32;
            let semaphore = self.semaphore.clone();
            tokio::spawn(async move {
                if let Ok(permits) = semaphore.acquire_many_owned(delta).await {
                    permits.forget();
                }
            });
        }
        *limit = new_limit;

        info!("并发上限调整: {} -> {}", old_limit, new_limit);
        Ok(())
    }
}

/// 协作式取消标志登记处
///
/// 执行记录和任务各持一个标志，运行器只在日期分区边界检查，
/// 在途分区总是跑到自然结束。
#[derive(Default)]
pub struct CancelRegistry {
    flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: &str) -> Arc<AtomicBool> {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    pub fn cancel(&self, key: &str) -> bool {
        let flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        match flags.get(key) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, key: &str) -> bool {
        let flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags
            .get(key)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn remove(&self, key: &str) {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags.remove(key);
    }
}
