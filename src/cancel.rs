//! 취소 신호
//!
//! `tokio::sync::watch` 채널 위에 만든 단순한 취소 토큰입니다.
//! 핸들이 `cancel()`을 호출하면 모든 신호 복제본이 깨어납니다.

use std::future::Future;

use tokio::sync::watch;

use crate::error::{KnowledgeError, Result};

/// 취소를 요청하는 쪽
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// 취소를 관찰하는 쪽 (복제 가능)
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// 핸들/신호 쌍 생성
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    /// 취소 요청
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// 이미 취소되었는지 확인
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// 취소되었으면 `Cancelled` 에러 반환
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(KnowledgeError::Cancelled);
        }
        Ok(())
    }

    /// 취소될 때까지 대기
    ///
    /// 핸들이 취소 없이 drop되면 영원히 대기합니다.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// future를 취소 신호와 경쟁시킴
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(KnowledgeError::Cancelled),
            result = fut => result,
        }
    }
}

/// 선택적 신호로 future 실행
pub async fn run_cancellable<T, F>(signal: Option<&CancelSignal>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match signal {
        Some(signal) => signal.run(fut).await,
        None => fut.await,
    }
}
