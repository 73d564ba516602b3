//! 后台构建：把表里已有的行分批灌进新索引。
//!
//! - 断点：每行处理完后推进 `last_indexed_row_key`，中断后从断点之后继续；
//!   断点只由构建器推进，并发写入不动它
//! - 与并发写入重叠：构建期间 add 幂等、remove 缺失不报错（见各索引实现）。
//!   每行先取行锁再按当前状态重读，读批次之后被删掉的行不会被重新加回；
//!   行锁被进行中的写入持有时让出调度等它结束
//! - 挂为索引的 operator：索引 close/remove 时构建随之取消

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::core::{Row, RowKey};
use crate::error::Result;
use crate::index::mutation::add_row;
use crate::index::{Index, IndexEvent, IndexOperator};
use crate::session::Session;

/// 按 row key 顺序提供表中行（通常是主索引）
pub trait RowSource: Send + Sync {
    /// `after` 之后（不含）至多 `limit` 行，只含会话可见的行
    fn rows_after(&self, session: &Session, after: Option<RowKey>, limit: usize) -> Result<Vec<Row>>;

    /// 会话此刻看到的某一行；已删除时为 None
    fn current(&self, session: &Session, key: RowKey) -> Result<Option<Row>>;
}

pub struct IndexBuilder {
    name: String,
    source: Arc<dyn RowSource>,
    batch_size: usize,
    commit_every_batch: bool,
    running: AtomicBool,
    cancelled: AtomicBool,
    indexed: AtomicU64,
}

impl fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("name", &self.name)
            .field("batch_size", &self.batch_size)
            .field("running", &self.is_running())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl IndexBuilder {
    pub fn new(name: impl Into<String>, source: Arc<dyn RowSource>, batch_size: usize) -> Self {
        Self {
            name: name.into(),
            source,
            batch_size: batch_size.max(1),
            commit_every_batch: true,
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            indexed: AtomicU64::new(0),
        }
    }

    /// 每批之后提交构建会话的事务（默认开启）；关闭时由调用方提交
    pub fn commit_every_batch(mut self, enabled: bool) -> Self {
        self.commit_every_batch = enabled;
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// 本构建器累计加入索引的行数
    pub fn indexed_rows(&self) -> u64 {
        self.indexed.load(Ordering::Relaxed)
    }

    fn try_start(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 执行一次构建，返回本次加入的行数。
    ///
    /// 被取消时保留 need_rebuild 与断点，下次从断点继续。
    pub async fn build(&self, session: &Arc<Session>, index: &Arc<dyn Index>) -> Result<u64> {
        index.base().check_open()?;
        if !self.try_start() {
            tracing::debug!("Build of {} already in progress, skipping", index.name());
            return Ok(0);
        }
        index.set_building(true);
        let result = self.run(session, index).await;
        index.set_building(false);
        self.running.store(false, Ordering::Release);

        match &result {
            Ok(added) if !self.is_cancelled() => {
                index.base().set_need_rebuild(false);
                tracing::info!(
                    "Index {} built: {} rows added (last row key {:?})",
                    index.name(),
                    added,
                    index.last_indexed_row_key().map(|k| k.0)
                );
            }
            Ok(added) => {
                tracing::warn!(
                    "Build of {} cancelled after {} rows, resumable from {:?}",
                    index.name(),
                    added,
                    index.last_indexed_row_key().map(|k| k.0)
                );
            }
            Err(e) => {
                tracing::warn!("Build of {} failed: {}", index.name(), e);
            }
        }
        result
    }

    async fn run(&self, session: &Arc<Session>, index: &Arc<dyn Index>) -> Result<u64> {
        let mut after = index.last_indexed_row_key();
        if let Some(k) = after {
            tracing::info!("Resuming build of {} after row key {}", index.name(), k);
        }
        let mut added = 0u64;
        loop {
            if self.is_cancelled() {
                break;
            }
            let batch = self.source.rows_after(session, after, self.batch_size)?;
            if batch.is_empty() {
                break;
            }
            let n = batch.len();
            let mut batch_added = 0u64;
            for row in batch {
                let key = row.key();
                match self.index_row(session, index, key).await? {
                    Some(k) => batch_added += k,
                    None => break,
                }
                index.set_last_indexed_row_key(Some(key));
                after = Some(key);
            }
            added += batch_added;
            self.indexed.fetch_add(batch_added, Ordering::Relaxed);
            if self.commit_every_batch {
                session.commit();
            }
            tracing::debug!("Index {}: batch of {} rows indexed", index.name(), n);
            tokio::task::yield_now().await;
        }
        Ok(added)
    }

    /// 锁住一行、重读后加入索引；返回加入数，等锁期间被取消时返回 None
    async fn index_row(
        &self,
        session: &Arc<Session>,
        index: &Arc<dyn Index>,
        key: RowKey,
    ) -> Result<Option<u64>> {
        let table = index.table();
        let held = session.is_row_locked_by_self(table.id(), key);
        loop {
            match session.lock_row(table, key) {
                Ok(()) => break,
                Err(e) if e.is_retryable() => {
                    if self.is_cancelled() {
                        return Ok(None);
                    }
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }
        let result = match self.source.current(session, key) {
            Ok(Some(row)) => add_row(&**index, session, row).await,
            Ok(None) => {
                tracing::trace!("Row {} gone before indexing {}, skipped", key, index.name());
                Ok(0)
            }
            Err(e) => Err(e),
        };
        if !held {
            session.unlock_row(table, key);
        }
        result.map(Some)
    }

    /// 挂为索引的 operator 并在 tokio 上后台构建
    pub fn spawn(
        self: Arc<Self>,
        session: Arc<Session>,
        index: Arc<dyn Index>,
    ) -> JoinHandle<Result<u64>> {
        index.set_index_operator(Some(self.clone()));
        tokio::spawn(async move { self.build(&session, &index).await })
    }
}

impl IndexOperator for IndexBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: IndexEvent) {
        match event {
            IndexEvent::Closed | IndexEvent::Removed => {
                if self.is_running() {
                    tracing::info!("Builder {}: index {:?}, cancelling", self.name, event);
                }
                self.cancel();
            }
            IndexEvent::Truncated => {
                tracing::debug!("Builder {}: index truncated", self.name);
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AsyncResultHandler, Column, IndexColumn, Table, Value};
    use crate::error::ErrorKind;
    use crate::index::mutation::remove_row;
    use crate::index::{collect_rows, IndexBase, IndexOptions, IndexType, OrderedIndex, RowIdIndex};
    use crate::session::SessionManager;

    struct Fixture {
        mgr: Arc<SessionManager>,
        primary: Arc<RowIdIndex>,
        table: Arc<Table>,
    }

    async fn fixture(rows: u64) -> Fixture {
        let id = Column::new(0, "ID").not_null();
        let table = Arc::new(Table::new(
            1,
            "PUBLIC",
            "T",
            vec![id.clone(), Column::new(1, "NAME")],
        ));
        let primary = Arc::new(RowIdIndex::new(
            1,
            "PRIMARY_KEY_T",
            table.clone(),
            Some(id),
            &IndexOptions::default(),
        ));
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        for k in 1..=rows {
            let row = Row::new(RowKey(k), vec![Value::Int(k as i64), Value::from(format!("n{}", k))]);
            add_row(&*primary, &s, row).await.unwrap();
        }
        s.commit();
        Fixture { mgr, primary, table }
    }

    fn name_index(f: &Fixture) -> Arc<dyn Index> {
        let base = IndexBase::new(
            2,
            "IDX_NAME",
            f.table.clone(),
            IndexType::non_unique(false, false),
            vec![IndexColumn::asc(Column::new(1, "NAME"))],
        );
        Arc::new(OrderedIndex::new(base, &IndexOptions::default()))
    }

    fn indexed_keys(idx: &Arc<dyn Index>, s: &Session) -> Vec<u64> {
        let mut c = idx.find(s, None, None).unwrap();
        let mut keys: Vec<u64> = collect_rows(&mut c).unwrap().iter().map(|r| r.key().0).collect();
        keys.sort_unstable();
        keys
    }

    #[tokio::test]
    async fn build_fills_index_and_clears_rebuild_flag() {
        let f = fixture(5).await;
        let idx = name_index(&f);
        assert!(idx.need_rebuild());

        let builder = IndexBuilder::new("build-idx-name", f.primary.clone(), 2);
        let s = f.mgr.create_session();
        assert_eq!(builder.build(&s, &idx).await.unwrap(), 5);
        assert!(!idx.need_rebuild());
        assert!(!idx.is_building());
        assert!(!builder.is_running());
        assert_eq!(idx.last_indexed_row_key(), Some(RowKey(5)));
        assert_eq!(builder.indexed_rows(), 5);

        let reader = f.mgr.create_session();
        assert_eq!(indexed_keys(&idx, &reader), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn build_resumes_after_checkpoint() {
        let f = fixture(4).await;
        let idx = name_index(&f);
        idx.set_last_indexed_row_key(Some(RowKey(2)));

        let builder = IndexBuilder::new("resume", f.primary.clone(), 10);
        let s = f.mgr.create_session();
        assert_eq!(builder.build(&s, &idx).await.unwrap(), 2);
        assert_eq!(indexed_keys(&idx, &s), vec![3, 4]);
    }

    #[tokio::test]
    async fn cancelled_build_keeps_rebuild_flag() {
        let f = fixture(3).await;
        let idx = name_index(&f);
        let builder = IndexBuilder::new("cancelled", f.primary.clone(), 1);
        builder.cancel();
        let s = f.mgr.create_session();
        assert_eq!(builder.build(&s, &idx).await.unwrap(), 0);
        assert!(idx.need_rebuild());
        assert!(!idx.is_building());
    }

    #[tokio::test]
    async fn closing_the_index_cancels_its_builder() {
        let f = fixture(1).await;
        let idx = name_index(&f);
        let builder = Arc::new(IndexBuilder::new("on-close", f.primary.clone(), 1));
        idx.set_index_operator(Some(builder.clone()));

        let s = f.mgr.create_session();
        idx.close(&s).unwrap();
        assert!(builder.is_cancelled());
        let err = builder.build(&s, &idx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
    }

    #[tokio::test]
    async fn spawned_build_runs_in_background() {
        let f = fixture(6).await;
        let idx = name_index(&f);
        let builder = Arc::new(IndexBuilder::new("spawned", f.primary.clone(), 4));
        let s = f.mgr.create_session();
        let handle = builder.clone().spawn(s.clone(), idx.clone());
        assert_eq!(handle.await.unwrap().unwrap(), 6);
        assert_eq!(
            idx.index_operator().map(|op| op.name().to_string()),
            Some("spawned".to_string())
        );
        assert_eq!(indexed_keys(&idx, &s).len(), 6);
    }

    /// 交出一批之后、构建器处理它之前，另一个会话删掉并提交了第 2 行
    struct DeleteAfterRead {
        primary: Arc<RowIdIndex>,
        secondary: Arc<dyn Index>,
        writer: Arc<Session>,
        fired: AtomicBool,
    }

    impl RowSource for DeleteAfterRead {
        fn rows_after(&self, session: &Session, after: Option<RowKey>, limit: usize) -> Result<Vec<Row>> {
            let batch = self.primary.rows_after(session, after, limit)?;
            if !self.fired.swap(true, Ordering::AcqRel) {
                let row = batch.iter().find(|r| r.key() == RowKey(2)).cloned().unwrap();
                self.primary
                    .remove(&self.writer, row.clone(), None, false, AsyncResultHandler::ignore())
                    .unwrap();
                self.secondary
                    .remove(&self.writer, row, None, true, AsyncResultHandler::ignore())
                    .unwrap();
                self.writer.commit();
            }
            Ok(batch)
        }

        fn current(&self, session: &Session, key: RowKey) -> Result<Option<Row>> {
            self.primary.current(session, key)
        }
    }

    #[tokio::test]
    async fn row_removed_after_batch_read_is_not_readded() {
        let f = fixture(3).await;
        let idx = name_index(&f);
        let source = Arc::new(DeleteAfterRead {
            primary: f.primary.clone(),
            secondary: idx.clone(),
            writer: f.mgr.create_session(),
            fired: AtomicBool::new(false),
        });
        let builder = IndexBuilder::new("racing", source.clone(), 10);
        let s = f.mgr.create_session();
        assert_eq!(builder.build(&s, &idx).await.unwrap(), 2);
        assert!(source.fired.load(Ordering::Acquire));
        assert_eq!(idx.last_indexed_row_key(), Some(RowKey(3)));

        let reader = f.mgr.create_session();
        assert_eq!(indexed_keys(&idx, &reader), vec![1, 3]);
    }

    #[tokio::test]
    async fn build_waits_for_pending_delete_then_indexes_restored_row() {
        let f = fixture(3).await;
        let idx = name_index(&f);
        let w = f.mgr.create_session();
        let reader = f.mgr.create_session();
        let row = f.primary.current(&reader, RowKey(2)).unwrap().unwrap();
        remove_row(&*f.primary, &w, row, None, false).await.unwrap();

        let builder = Arc::new(IndexBuilder::new("waiting", f.primary.clone(), 10));
        let handle = builder.clone().spawn(f.mgr.create_session(), idx.clone());
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert!(builder.is_running());
        assert!(!handle.is_finished());
        assert_eq!(idx.last_indexed_row_key(), Some(RowKey(1)));

        w.rollback();
        assert_eq!(handle.await.unwrap().unwrap(), 3);
        assert_eq!(indexed_keys(&idx, &reader), vec![1, 2, 3]);
    }
}
