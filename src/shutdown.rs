use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 优雅关闭管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭后置为 None，之后的订阅者立即收到信号
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
        }
    }

    /// 订阅关闭信号
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        match &*self.shutdown_tx.read().await {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                let _ = tx.send(());
                rx
            }
        }
    }

    /// 触发关闭，重复调用无效果
    pub async fn shutdown(&self) {
        let Some(tx) = self.shutdown_tx.write().await.take() else {
            debug!("关闭管理器已经触发过关闭");
            return;
        };

        debug!(subscribers = tx.receiver_count(), "发送关闭信号");
        // 没有接收者时发送失败，忽略
        let _ = tx.send(());
        info!("关闭信号已发送");
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_subscribers_receive_signal() {
        let manager = ShutdownManager::new();

        let mut rx1 = manager.subscribe().await;
        let mut rx2 = manager.clone().subscribe().await;
        manager.shutdown().await;

        assert!(timeout(Duration::from_millis(100), rx1.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(100), rx2.recv()).await.is_ok());
        assert!(manager.shutdown_tx.read().await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown().await;
        manager.shutdown().await;

        let mut rx = manager.subscribe().await;
        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
