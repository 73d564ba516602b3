pub mod lock;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use crate::core::{RowKey, Table};
use crate::error::Result;

pub use lock::RowLockTable;

/// 事务标识；`TxnId::SYSTEM` 表示已提交的基线数据（快照加载、建表导入）
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    pub const SYSTEM: TxnId = TxnId(0);
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// 事务登记表：可见性判断的唯一依据。
///
/// 可见 = 自己写的，或写入事务既不在进行中也没有被回滚。
#[derive(Debug, Default)]
pub struct TxnRegistry {
    open: DashMap<TxnId, SessionId>,
    aborted: DashSet<TxnId>,
}

impl TxnRegistry {
    fn begin(&self, txn: TxnId, session: SessionId) {
        self.open.insert(txn, session);
    }

    fn commit(&self, txn: TxnId) {
        self.open.remove(&txn);
    }

    fn abort(&self, txn: TxnId) {
        // 先登记 aborted 再移出 open：中间态对读者仍不可见
        self.aborted.insert(txn);
        self.open.remove(&txn);
    }

    pub fn is_open(&self, txn: TxnId) -> bool {
        self.open.contains_key(&txn)
    }

    pub fn is_committed(&self, txn: TxnId) -> bool {
        txn == TxnId::SYSTEM || (!self.open.contains_key(&txn) && !self.aborted.contains(&txn))
    }

    pub fn is_aborted(&self, txn: TxnId) -> bool {
        self.aborted.contains(&txn)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

/// 从某个事务看另一个事务的状态
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxnState {
    Own,
    Committed,
    /// 另一个仍在进行中的事务
    Pending,
    Aborted,
}

/// 单个事务的可见性视图；cursor 持有它以脱离 session 生命周期
#[derive(Clone, Debug)]
pub struct ReadView {
    txn: TxnId,
    registry: Arc<TxnRegistry>,
}

impl ReadView {
    pub fn txn(&self) -> TxnId {
        self.txn
    }

    pub fn state(&self, txn: TxnId) -> TxnState {
        if txn == self.txn {
            TxnState::Own
        } else if self.registry.is_committed(txn) {
            TxnState::Committed
        } else if self.registry.is_open(txn) {
            TxnState::Pending
        } else {
            TxnState::Aborted
        }
    }

    pub fn registry(&self) -> &TxnRegistry {
        &self.registry
    }
}

/// 会话/事务工厂；持有全局事务登记表与行锁表
#[derive(Debug)]
pub struct SessionManager {
    next_session: AtomicU64,
    next_txn: AtomicU64,
    registry: Arc<TxnRegistry>,
    locks: RowLockTable,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_session: AtomicU64::new(1),
            next_txn: AtomicU64::new(1),
            registry: Arc::new(TxnRegistry::default()),
            locks: RowLockTable::new(),
        })
    }

    pub fn create_session(self: &Arc<Self>) -> Arc<Session> {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let txn = self.begin(id);
        tracing::debug!("Session {} opened with txn {}", id.0, txn);
        Arc::new(Session {
            id,
            manager: self.clone(),
            txn: AtomicU64::new(txn.0),
            written: AtomicBool::new(false),
        })
    }

    pub fn registry(&self) -> &Arc<TxnRegistry> {
        &self.registry
    }

    pub fn locks(&self) -> &RowLockTable {
        &self.locks
    }

    fn begin(&self, session: SessionId) -> TxnId {
        let txn = TxnId(self.next_txn.fetch_add(1, Ordering::Relaxed));
        self.registry.begin(txn, session);
        txn
    }
}

/// 会话：同一时刻只有一个进行中的事务；commit/rollback 后自动开启下一个
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    manager: Arc<SessionManager>,
    txn: AtomicU64,
    written: AtomicBool,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn txn_id(&self) -> TxnId {
        TxnId(self.txn.load(Ordering::Acquire))
    }

    pub fn read_view(&self) -> ReadView {
        ReadView {
            txn: self.txn_id(),
            registry: self.manager.registry.clone(),
        }
    }

    /// 只含已提交数据的视图（落盘快照用）
    pub fn committed_view(&self) -> ReadView {
        ReadView {
            txn: TxnId::SYSTEM,
            registry: self.manager.registry.clone(),
        }
    }

    pub fn can_see(&self, writer: TxnId) -> bool {
        writer == self.txn_id() || self.manager.registry.is_committed(writer)
    }

    /// 索引写入前调用：回滚时据此决定是否需要登记 aborted
    pub fn mark_written(&self) {
        self.written.store(true, Ordering::Relaxed);
    }

    /// 获取行锁；同事务重入成功，冲突立即失败（LockConflict）
    pub fn lock_row(&self, table: &Table, key: RowKey) -> Result<()> {
        self.manager.locks.try_lock(table, key, self.txn_id())
    }

    /// 事务结束前提前放掉一个行锁
    pub fn unlock_row(&self, table: &Table, key: RowKey) -> bool {
        self.manager.locks.release(table.id(), key, self.txn_id())
    }

    pub fn is_row_locked_by_self(&self, table_id: u32, key: RowKey) -> bool {
        self.manager.locks.is_locked_by(table_id, key, self.txn_id())
    }

    /// 提交当前事务并开启新事务，返回已提交的事务号
    pub fn commit(&self) -> TxnId {
        let next = self.manager.begin(self.id);
        let done = TxnId(self.txn.swap(next.0, Ordering::AcqRel));
        self.written.store(false, Ordering::Relaxed);
        self.manager.registry.commit(done);
        let released = self.manager.locks.release_all(done);
        tracing::debug!("Txn {} committed ({} row locks released)", done, released);
        done
    }

    /// 回滚当前事务：其写入与删除标记对所有人（包括本会话后续事务）永久失效。
    ///
    /// 索引不在这里撤销条目，下次访问时按事务状态自行回收。
    pub fn rollback(&self) -> TxnId {
        let next = self.manager.begin(self.id);
        let done = TxnId(self.txn.swap(next.0, Ordering::AcqRel));
        self.finish_aborted(done);
        done
    }

    fn finish_aborted(&self, txn: TxnId) {
        if self.written.swap(false, Ordering::Relaxed) {
            self.manager.registry.abort(txn);
        } else {
            self.manager.registry.commit(txn);
        }
        self.manager.locks.release_all(txn);
        tracing::debug!("Txn {} rolled back", txn);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // 未提交即销毁：按回滚处理
        self.finish_aborted(self.txn_id());
    }
}
