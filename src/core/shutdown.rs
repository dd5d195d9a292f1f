//! 关闭信号
//!
//! Ctrl+C、SIGTERM 或所有者的 quit 命令都会触发同一个 token；
//! 主循环收到后做最后一次 save，再调用 `Bot::close`。

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason: Arc<Mutex<Option<ShutdownReason>>>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 所有者在聊天中发出 quit 命令
    OwnerCommand { service: String, user_id: String },
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// 触发关闭；只记录第一次的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        tracing::info!("Shutdown requested: {:?}", reason);
        let mut recorded = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        if recorded.is_none() {
            *recorded = Some(reason);
        }
        drop(recorded);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// 触发关闭的原因
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 等待关闭信号
    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
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

    #[tokio::test]
    async fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown());
        assert_eq!(manager.reason(), None);

        manager.shutdown(ShutdownReason::OwnerCommand {
            service: "console".into(),
            user_id: "owner".into(),
        });
        manager.shutdown(ShutdownReason::Signal);
        manager.wait_for_shutdown().await;

        assert!(manager.is_shutdown());
        assert!(matches!(manager.reason(), Some(ShutdownReason::OwnerCommand { .. })));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let manager = ShutdownManager::new();
        let waiter = manager.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_shutdown().await;
            waiter.reason()
        });
        manager.shutdown(ShutdownReason::UserInitiated);
        assert_eq!(handle.await.unwrap(), Some(ShutdownReason::UserInitiated));
    }
}
