//! 优雅关闭
//!
//! watch通道扇出关闭信号：定时循环和HTTP服务各自订阅，
//! 置位后在各自的await点上退出。

use tokio::sync::watch;
use tracing::{debug, info};

pub struct ShutdownManager {
    tx: watch::Sender<bool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn shutdown(&self) {
        if *self.tx.borrow() {
            debug!("关闭信号已触发过");
            return;
        }
        info!("触发系统关闭，通知 {} 个订阅者", self.tx.receiver_count());
        let _ = self.tx.send(true);
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
