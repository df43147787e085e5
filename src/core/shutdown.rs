//! 优雅关闭处理
//!
//! 关闭契约：
//! - 触发关闭后不再接受新请求（`track` 返回 None）
//! - 在宽限期内等待进行中的请求完成
//! - 宽限期结束仍未完成的请求被强制取消

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭信号 token（停止接受新请求）
    shutdown_token: CancellationToken,
    /// 强制取消 token（宽限期结束后触发）
    force_token: CancellationToken,
    /// 进行中的请求
    tracker: TaskTracker,
    /// 关闭原因广播
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 用户发起的退出 (Ctrl+C)
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 由宿主程序调用（如 ServerHandle::shutdown）
    Requested,
    /// 致命错误
    FatalError(String),
}

/// 一个进行中请求的登记凭证；drop 即视为完成
pub struct InFlight {
    _token: TaskTrackerToken,
    force: CancellationToken,
}

impl InFlight {
    /// 运行请求；若被强制取消则返回 None（future 被 drop）
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.force.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token: CancellationToken::new(),
            force_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            reason_tx,
        }
    }

    /// 获取关闭 token（服务端据此停止 accept）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        tracing::info!(?reason, "shutdown requested");
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
        self.tracker.close();
    }

    /// 是否已触发关闭
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// 订阅关闭原因
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    /// 等待关闭信号
    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 登记一个新请求；已关闭时返回 None，调用方应拒绝该请求
    pub fn track(&self) -> Option<InFlight> {
        if self.is_shutdown() {
            return None;
        }
        Some(InFlight {
            _token: self.tracker.token(),
            force: self.force_token.clone(),
        })
    }

    /// 当前进行中的请求数
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// 等待进行中的请求结束，最多 grace；超时后强制取消。返回是否在宽限期内完成
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            tracing::info!("All in-flight requests finished");
            return true;
        }
        tracing::warn!(
            remaining = self.tracker.len(),
            "Shutdown grace period of {:?} elapsed, forcing cancellation",
            grace
        );
        self.force_token.cancel();
        self.tracker.wait().await;
        false
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

    #[test]
    fn test_shutdown_manager_new() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown());
        assert_eq!(manager.in_flight(), 0);
    }

    #[test]
    fn test_shutdown_manager_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_track_rejected_after_shutdown() {
        let manager = ShutdownManager::new();
        assert!(manager.track().is_some());
        manager.shutdown(ShutdownReason::Requested);
        assert!(manager.track().is_none());
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight() {
        let manager = ShutdownManager::new();
        let in_flight = manager.track().unwrap();
        let handle = tokio::spawn(async move {
            let out = in_flight
                .run(async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    7
                })
                .await;
            drop(in_flight);
            out
        });

        manager.shutdown(ShutdownReason::Requested);
        assert!(manager.drain(Duration::from_secs(5)).await);
        assert_eq!(handle.await.unwrap(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_forces_cancellation_after_grace() {
        let manager = ShutdownManager::new();
        let in_flight = manager.track().unwrap();
        let handle = tokio::spawn(async move {
            let out = in_flight.run(std::future::pending::<()>()).await;
            drop(in_flight);
            out
        });

        manager.shutdown(ShutdownReason::Requested);
        assert!(!manager.drain(Duration::from_secs(1)).await);
        assert_eq!(handle.await.unwrap(), None);
    }
}
