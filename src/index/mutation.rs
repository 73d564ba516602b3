//! async 调用方的变更入口：把 handler 接到 oneshot 上再 `.await`。

use std::sync::Arc;

use crate::core::{completion, AsyncResultHandler, Row, Value};
use crate::error::Result;
use crate::index::{Index, RowUpdate};
use crate::session::Session;

pub async fn add_row<I: Index + ?Sized>(index: &I, session: &Arc<Session>, row: Row) -> Result<u64> {
    let (handler, rx) = AsyncResultHandler::channel();
    index.add(session, row, handler)?;
    completion(rx).await
}

pub async fn remove_row<I: Index + ?Sized>(
    index: &I,
    session: &Arc<Session>,
    row: Row,
    old_columns: Option<Vec<Value>>,
    is_locked_by_self: bool,
) -> Result<u64> {
    let (handler, rx) = AsyncResultHandler::channel();
    index.remove(session, row, old_columns, is_locked_by_self, handler)?;
    completion(rx).await
}

pub async fn update_row<I: Index + ?Sized>(
    index: &Arc<I>,
    session: &Arc<Session>,
    update: RowUpdate,
) -> Result<u64> {
    let (handler, rx) = AsyncResultHandler::channel();
    index.clone().update(session, update, handler)?;
    completion(rx).await
}
