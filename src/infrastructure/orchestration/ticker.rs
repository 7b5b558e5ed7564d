//! Ticker - 可取消的自调度周期任务
//!
//! 每次执行结束后才开始下一轮等待，慢的一轮不会与下一轮重叠

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Ticker {
    cancel: CancellationToken,
}

impl Ticker {
    /// 等待 `period` 后执行 `tick`，执行完成后再等待下一个周期
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick() => {}
                }
            }
        });

        Self { cancel }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
