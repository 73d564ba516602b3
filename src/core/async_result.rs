use std::fmt;

use tokio::sync::oneshot;

use crate::error::{IndexError, Result};

/// 异步变更的结果：二选一，且只能有一个
#[derive(Debug)]
pub enum AsyncResult<T> {
    Succeeded(T),
    Failed(IndexError),
}

impl<T> AsyncResult<T> {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, AsyncResult::Succeeded(_))
    }

    pub fn is_failed(&self) -> bool {
        !self.is_succeeded()
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            AsyncResult::Succeeded(v) => Ok(v),
            AsyncResult::Failed(e) => Err(e),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AsyncResult<U> {
        match self {
            AsyncResult::Succeeded(v) => AsyncResult::Succeeded(f(v)),
            AsyncResult::Failed(e) => AsyncResult::Failed(e),
        }
    }
}

impl<T> From<Result<T>> for AsyncResult<T> {
    fn from(r: Result<T>) -> Self {
        match r {
            Ok(v) => AsyncResult::Succeeded(v),
            Err(e) => AsyncResult::Failed(e),
        }
    }
}

type Callback<T> = Box<dyn FnOnce(AsyncResult<T>) + Send + 'static>;

/// 单次完成回调（continuation）。
///
/// ## 契约
/// - 每个变更入口在任意路径上恰好调用一次；回调被消费后不可再用（`self` 按值传入）。
/// - 未调用就被 drop（内部错误、panic 展开、忘记回调）时，自动以
///   Internal-Consistency 失败完成，调用方不会永久挂起。
/// - 唯一例外是同步拒绝（能力缺失）：入口先 [`discard`](Self::discard) 再返回 `Err`。
pub struct AsyncResultHandler<T> {
    callback: Option<Callback<T>>,
}

impl<T: Send + 'static> AsyncResultHandler<T> {
    pub fn new(f: impl FnOnce(AsyncResult<T>) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(f)),
        }
    }

    /// 回调接到 oneshot channel，供 async 调用方 `.await`
    pub fn channel() -> (Self, oneshot::Receiver<AsyncResult<T>>) {
        let (tx, rx) = oneshot::channel();
        let handler = Self::new(move |ar| {
            // 接收端已放弃等待：结果无人消费，直接丢弃
            let _ = tx.send(ar);
        });
        (handler, rx)
    }

    /// 忽略结果（后台任务 / 测试）
    pub fn ignore() -> Self {
        Self::new(|_| {})
    }

    pub fn handle(mut self, result: AsyncResult<T>) {
        if let Some(cb) = self.callback.take() {
            cb(result);
        }
    }

    pub fn succeed(self, value: T) {
        self.handle(AsyncResult::Succeeded(value));
    }

    pub fn fail(self, err: IndexError) {
        self.handle(AsyncResult::Failed(err));
    }

    pub fn complete(self, result: Result<T>) {
        self.handle(result.into());
    }
}

impl<T> AsyncResultHandler<T> {
    /// 同步拒绝路径专用：拆除回调，不再触发
    pub fn discard(mut self) {
        self.callback = None;
    }
}

impl<T> Drop for AsyncResultHandler<T> {
    fn drop(&mut self) {
        if let Some(cb) = self.callback.take() {
            tracing::error!("AsyncResultHandler dropped without completion, failing it");
            cb(AsyncResult::Failed(IndexError::internal(
                "mutation handler dropped without completion",
            )));
        }
    }
}

impl<T> fmt::Debug for AsyncResultHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResultHandler")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// 等待 channel 形式的完成结果
pub async fn completion<T>(rx: oneshot::Receiver<AsyncResult<T>>) -> Result<T> {
    match rx.await {
        Ok(ar) => ar.into_result(),
        Err(_) => Err(IndexError::internal("completion channel closed before result")),
    }
}
