//! 待确认绑定的状态机。
//!
//! 每个用户最多一个进行中的绑定请求，每个请求带一个可取消的超时任务：
//!
//! ```text
//! Pending ──校验通过──▶ Validated
//!    │ ├──强制绑定──▶ ForceBound
//!    │ └──落库失败──▶ Errored
//!    └──窗口到期──▶ TimedOut (保留，供强制绑定返回"已过期")
//! ```
//!
//! 每个用户有独立的槽位锁，同一用户的状态变更与落库都在槽位锁内串行完成，
//! 不同用户之间互不阻塞。新请求会取消旧请求的定时器，定时器触发时还要核对
//! ticket，因此旧定时器不会误伤新请求。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStatus {
    Pending,
    Validated,
    ForceBound,
    TimedOut,
    Errored,
}

struct PendingBinding {
    ticket: u64,
    city: String,
    submitted_at: DateTime<Local>,
    deadline: Instant,
    status: BindStatus,
    cancel: CancellationToken,
}

impl PendingBinding {
    fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            ticket: self.ticket,
            city: self.city.clone(),
            submitted_at: self.submitted_at,
            deadline: self.deadline,
            status: self.status,
        }
    }
}

/// 绑定请求的只读快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSnapshot {
    pub ticket: u64,
    pub city: String,
    pub submitted_at: DateTime<Local>,
    pub deadline: Instant,
    pub status: BindStatus,
}

impl PendingSnapshot {
    /// 距离窗口关闭还剩多久
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// 校验通过后的落库结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm {
    Applied,
    /// 同一用户已经发起了更新的绑定请求
    Superseded,
    /// 请求已被解绑或卸载移除
    Cancelled,
    /// 校验返回前窗口已到期
    Expired,
    /// 请求已由强制绑定完成
    Settled,
}

/// 强制绑定的判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceBind {
    Bound,
    NoPending,
    Mismatch { pending: String },
    Expired { pending: String },
}

/// 单个用户的槽位。槽位创建后不会从表中移除，清空请求只把内容置为 `None`，
/// 这样同一用户始终只对应一把锁。
type Slot = Arc<Mutex<Option<PendingBinding>>>;

pub struct BindingTracker {
    slots: Mutex<HashMap<String, Slot>>,
    window: Duration,
    next_ticket: AtomicU64,
}

impl BindingTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            window,
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    async fn slot(&self, user_id: &str) -> Slot {
        self.slots
            .lock()
            .await
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    async fn existing(&self, user_id: &str) -> Option<Slot> {
        self.slots.lock().await.get(user_id).cloned()
    }

    /// 发起新的绑定请求，替换并取消该用户之前的请求。
    ///
    /// 窗口到期且请求仍为 `Pending` 时，状态置为 `TimedOut` 并调用 `on_timeout`。
    /// 返回本次请求的 ticket。
    pub async fn start<F, Fut>(&self, user_id: &str, city: &str, on_timeout: F) -> u64
    where
        F: FnOnce(PendingSnapshot) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + self.window;
        let slot = self.slot(user_id).await;

        {
            let mut current = slot.lock().await;
            let entry = PendingBinding {
                ticket,
                city: city.to_string(),
                submitted_at: Local::now(),
                deadline,
                status: BindStatus::Pending,
                cancel: cancel.clone(),
            };
            if let Some(prev) = current.replace(entry) {
                prev.cancel.cancel();
                debug!(target: "Weather", user_id, old = %prev.city, new = city, "绑定请求被替换");
            }
        }

        let user_id = user_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            let snapshot = {
                let mut current = slot.lock().await;
                match current.as_mut() {
                    Some(entry) if entry.ticket == ticket && entry.status == BindStatus::Pending => {
                        entry.status = BindStatus::TimedOut;
                        entry.snapshot()
                    }
                    _ => return,
                }
            };

            info!(target: "Weather", user_id = %user_id, city = %snapshot.city, "绑定请求已超时");
            on_timeout(snapshot).await;
        });

        ticket
    }

    /// 校验通过：若 `ticket` 仍是当前请求且仍为 `Pending`，则执行 `persist` 并置为 `Validated`。
    ///
    /// 落库失败时置为 `Errored` 并返回错误。定时器在两种情况下都会被取消。
    pub async fn confirm<Fut>(&self, user_id: &str, ticket: u64, persist: Fut) -> anyhow::Result<Confirm>
    where
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let Some(slot) = self.existing(user_id).await else {
            return Ok(Confirm::Cancelled);
        };
        let mut current = slot.lock().await;
        let Some(entry) = current.as_mut() else {
            return Ok(Confirm::Cancelled);
        };
        if entry.ticket != ticket {
            return Ok(Confirm::Superseded);
        }
        match entry.status {
            BindStatus::Pending => {}
            BindStatus::TimedOut => return Ok(Confirm::Expired),
            _ => return Ok(Confirm::Settled),
        }

        entry.cancel.cancel();
        match persist.await {
            Ok(()) => {
                entry.status = BindStatus::Validated;
                Ok(Confirm::Applied)
            }
            Err(e) => {
                entry.status = BindStatus::Errored;
                Err(e)
            }
        }
    }

    /// 强制绑定：城市必须与待确认请求一致且未超时。
    ///
    /// 被拒绝时不会执行 `persist`，也不改变任何状态；`persist` 失败时同样保持原状，
    /// 用户可以在窗口内重试。
    pub async fn force_bind<Fut>(&self, user_id: &str, city: &str, persist: Fut) -> anyhow::Result<ForceBind>
    where
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let Some(slot) = self.existing(user_id).await else {
            return Ok(ForceBind::NoPending);
        };
        let mut current = slot.lock().await;
        let Some(entry) = current.as_mut() else {
            return Ok(ForceBind::NoPending);
        };

        if entry.city != city {
            return Ok(ForceBind::Mismatch {
                pending: entry.city.clone(),
            });
        }
        if entry.status == BindStatus::TimedOut {
            return Ok(ForceBind::Expired {
                pending: entry.city.clone(),
            });
        }

        persist.await?;
        entry.cancel.cancel();
        entry.status = BindStatus::ForceBound;
        Ok(ForceBind::Bound)
    }

    /// 移除并取消该用户的请求
    pub async fn remove(&self, user_id: &str) -> Option<PendingSnapshot> {
        let slot = self.existing(user_id).await?;
        let entry = slot.lock().await.take()?;
        entry.cancel.cancel();
        Some(entry.snapshot())
    }

    pub async fn snapshot(&self, user_id: &str) -> Option<PendingSnapshot> {
        let slot = self.existing(user_id).await?;
        let current = slot.lock().await;
        current.as_ref().map(PendingBinding::snapshot)
    }

    /// 取消所有定时器并清空（插件卸载时调用）
    pub async fn clear(&self) {
        let slots: Vec<Slot> = self.slots.lock().await.drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            if let Some(entry) = slot.lock().await.take() {
                entry.cancel.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::{mpsc, oneshot};

    const WINDOW: Duration = Duration::from_secs(300);

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    fn notifier() -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        mpsc::unbounded_channel()
    }

    async fn start(tracker: &BindingTracker, user: &str, city: &str, tx: &mpsc::UnboundedSender<String>) -> u64 {
        let tx = tx.clone();
        tracker
            .start(user, city, move |snap| async move {
                let _ = tx.send(snap.city);
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_marks_entry_and_keeps_it() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, mut rx) = notifier();
        start(&tracker, "u1", "亚特兰蒂斯", &tx).await;

        advance(299).await;
        assert!(rx.try_recv().is_err());

        advance(2).await;
        assert_eq!(rx.try_recv().unwrap(), "亚特兰蒂斯");
        let snap = tracker.snapshot("u1").await.unwrap();
        assert_eq!(snap.status, BindStatus::TimedOut);
        assert_eq!(snap.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn new_start_cancels_previous_timer() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, mut rx) = notifier();
        let first = start(&tracker, "u1", "Atlantis", &tx).await;

        advance(100).await;
        let second = start(&tracker, "u1", "Lemuria", &tx).await;
        assert_ne!(first, second);

        // 旧请求的截止时间 (300s) 已过
        advance(250).await;
        assert!(rx.try_recv().is_err());
        let snap = tracker.snapshot("u1").await.unwrap();
        assert_eq!(snap.city, "Lemuria");
        assert_eq!(snap.status, BindStatus::Pending);

        advance(51).await;
        assert_eq!(rx.try_recv().unwrap(), "Lemuria");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn force_bind_rejects_mismatched_city_without_persisting() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, _rx) = notifier();
        start(&tracker, "u1", "Atlantis", &tx).await;

        let persisted = AtomicBool::new(false);
        let result = tracker
            .force_bind("u1", "Lemuria", async {
                persisted.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            result,
            ForceBind::Mismatch {
                pending: "Atlantis".to_string()
            }
        );
        assert!(!persisted.load(Ordering::SeqCst));
        assert_eq!(
            tracker.snapshot("u1").await.unwrap().status,
            BindStatus::Pending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn force_bind_after_timeout_is_expired() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, mut rx) = notifier();
        start(&tracker, "u1", "Atlantis", &tx).await;
        advance(301).await;
        assert_eq!(rx.try_recv().unwrap(), "Atlantis");

        let persisted = AtomicBool::new(false);
        let result = tracker
            .force_bind("u1", "Atlantis", async {
                persisted.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            result,
            ForceBind::Expired {
                pending: "Atlantis".to_string()
            }
        );
        assert!(!persisted.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn force_bind_within_window_cancels_timer() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, mut rx) = notifier();
        start(&tracker, "u1", "Atlantis", &tx).await;
        advance(120).await;

        let result = tracker
            .force_bind("u1", "Atlantis", async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(result, ForceBind::Bound);

        advance(600).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(
            tracker.snapshot("u1").await.unwrap().status,
            BindStatus::ForceBound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_force_bind_persist_keeps_pending() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, mut rx) = notifier();
        start(&tracker, "u1", "Atlantis", &tx).await;

        let result = tracker
            .force_bind("u1", "Atlantis", async { Err(anyhow::anyhow!("disk full")) })
            .await;
        assert!(result.is_err());
        assert_eq!(
            tracker.snapshot("u1").await.unwrap().status,
            BindStatus::Pending
        );

        // 定时器仍在运行
        advance(301).await;
        assert_eq!(rx.try_recv().unwrap(), "Atlantis");
    }

    #[tokio::test]
    async fn force_bind_without_entry() {
        let tracker = BindingTracker::new(WINDOW);
        let result = tracker
            .force_bind("nobody", "Atlantis", async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(result, ForceBind::NoPending);
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_ignores_superseded_ticket() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, _rx) = notifier();
        let stale = start(&tracker, "u1", "Atlantis", &tx).await;
        let current = start(&tracker, "u1", "Beijing", &tx).await;

        let persisted = AtomicBool::new(false);
        let outcome = tracker
            .confirm("u1", stale, async {
                persisted.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(outcome, Confirm::Superseded);
        assert!(!persisted.load(Ordering::SeqCst));

        let outcome = tracker
            .confirm("u1", current, async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(outcome, Confirm::Applied);
        assert_eq!(
            tracker.snapshot("u1").await.unwrap().status,
            BindStatus::Validated
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_persist_failure_marks_errored() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, mut rx) = notifier();
        let ticket = start(&tracker, "u1", "Beijing", &tx).await;

        let result = tracker
            .confirm("u1", ticket, async { Err(anyhow::anyhow!("disk full")) })
            .await;
        assert!(result.is_err());
        assert_eq!(
            tracker.snapshot("u1").await.unwrap().status,
            BindStatus::Errored
        );

        advance(301).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn remove_cancels_timer() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, mut rx) = notifier();
        start(&tracker, "u1", "Atlantis", &tx).await;

        let removed = tracker.remove("u1").await.unwrap();
        assert_eq!(removed.city, "Atlantis");
        assert!(tracker.remove("u1").await.is_none());

        advance(301).await;
        assert!(rx.try_recv().is_err());
        assert!(tracker.snapshot("u1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_every_timer() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, mut rx) = notifier();
        start(&tracker, "u1", "Atlantis", &tx).await;
        start(&tracker, "u2", "Lemuria", &tx).await;

        tracker.clear().await;
        advance(301).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_after_timeout_does_not_persist() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, mut rx) = notifier();
        let ticket = start(&tracker, "u1", "Beijing", &tx).await;
        advance(301).await;
        assert_eq!(rx.try_recv().unwrap(), "Beijing");

        let persisted = AtomicBool::new(false);
        let outcome = tracker
            .confirm("u1", ticket, async {
                persisted.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(outcome, Confirm::Expired);
        assert!(!persisted.load(Ordering::SeqCst));
        assert_eq!(
            tracker.snapshot("u1").await.unwrap().status,
            BindStatus::TimedOut
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_after_remove_is_cancelled() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, _rx) = notifier();
        let ticket = start(&tracker, "u1", "Beijing", &tx).await;
        tracker.remove("u1").await;

        let outcome = tracker
            .confirm("u1", ticket, async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(outcome, Confirm::Cancelled);
        assert!(tracker.snapshot("u1").await.is_none());

        let outcome = tracker
            .confirm("nobody", 42, async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(outcome, Confirm::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_after_force_bind_is_settled() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, _rx) = notifier();
        let ticket = start(&tracker, "u1", "Beijing", &tx).await;
        tracker
            .force_bind("u1", "Beijing", async { Ok(()) })
            .await
            .unwrap();

        let persisted = AtomicBool::new(false);
        let outcome = tracker
            .confirm("u1", ticket, async {
                persisted.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(outcome, Confirm::Settled);
        assert!(!persisted.load(Ordering::SeqCst));
        assert_eq!(
            tracker.snapshot("u1").await.unwrap().status,
            BindStatus::ForceBound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_persist_does_not_block_other_users() {
        let tracker = BindingTracker::new(WINDOW);
        let (tx, _rx) = notifier();
        let ticket = start(&tracker, "u1", "Beijing", &tx).await;
        start(&tracker, "u2", "Lemuria", &tx).await;

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let slow_confirm = tracker.confirm("u1", ticket, async {
            let _ = release_rx.await;
            Ok(())
        });
        let other_user = async {
            let snap = tracker.snapshot("u2").await.unwrap();
            let forced = tracker
                .force_bind("u2", "Lemuria", async { Ok(()) })
                .await
                .unwrap();
            let _ = release_tx.send(());
            (snap.status, forced)
        };

        let (confirmed, (status, forced)) = tokio::join!(slow_confirm, other_user);
        assert_eq!(confirmed.unwrap(), Confirm::Applied);
        assert_eq!(status, BindStatus::Pending);
        assert_eq!(forced, ForceBind::Bound);
    }
}
