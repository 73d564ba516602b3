//! 多版本槽位：每个索引槽位是一条由新到旧的版本链。
//!
//! - 写入事务未提交时，其他事务沿链回退到较旧的版本
//! - 删除只在版本上记下删除事务，删除提交前对其他事务不生效
//! - 回滚不需要撤销：已回滚事务的版本和删除标记对任何视图都不生效，
//!   之后由 [`Version::normalize`] 回收

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::core::Row;
use crate::session::{ReadView, TxnId, TxnRegistry, TxnState};

#[derive(Clone, Debug)]
pub(crate) struct Version {
    pub(crate) row: Row,
    pub(crate) writer: TxnId,
    pub(crate) deleter: Option<TxnId>,
    older: Option<Box<Version>>,
}

/// 写入方看到的槽位占用情况
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Claim {
    /// 没有有效行：不存在、已删除或写入已回滚
    Free,
    /// 对本事务有效的行
    Held,
    /// 另一个进行中的事务正在改写
    Pending(TxnId),
}

impl Version {
    pub(crate) fn new(row: Row, writer: TxnId) -> Self {
        Self {
            row,
            writer,
            deleter: None,
            older: None,
        }
    }

    fn chain(&self) -> impl Iterator<Item = &Version> {
        std::iter::successors(Some(self), |v| v.older.as_deref())
    }

    /// 视图下可见的行：第一个写入可见的版本，它的删除对视图可见时整行不可见
    pub(crate) fn resolve(&self, view: &ReadView) -> Option<&Row> {
        for v in self.chain() {
            match view.state(v.writer) {
                TxnState::Own | TxnState::Committed => {
                    return match v.deleter.map(|d| view.state(d)) {
                        Some(TxnState::Own | TxnState::Committed) => None,
                        _ => Some(&v.row),
                    };
                }
                TxnState::Pending | TxnState::Aborted => {}
            }
        }
        None
    }

    /// 写入方视角的占用；`matches` 挑出关心的版本（例如同一组键值）
    pub(crate) fn claim(&self, view: &ReadView, matches: impl Fn(&Row) -> bool) -> Claim {
        for v in self.chain() {
            let state = view.state(v.writer);
            match state {
                TxnState::Aborted => continue,
                // 进行中的改写若回滚，旧版本会重新生效，继续往下看
                TxnState::Pending if !matches(&v.row) => continue,
                TxnState::Pending => return Claim::Pending(v.writer),
                TxnState::Own | TxnState::Committed if !matches(&v.row) => return Claim::Free,
                TxnState::Own | TxnState::Committed => {}
            }
            return match v.deleter.map(|d| (d, view.state(d))) {
                Some((_, TxnState::Own | TxnState::Committed)) => Claim::Free,
                Some((d, TxnState::Pending)) => Claim::Pending(d),
                Some((_, TxnState::Aborted)) | None => Claim::Held,
            };
        }
        Claim::Free
    }

    /// 新版本压到链首
    pub(crate) fn push(&mut self, row: Row, writer: TxnId) {
        let older = std::mem::replace(self, Version::new(row, writer));
        self.older = Some(Box::new(older));
    }

    /// 在链首记删除；调用前链已 normalize，链首即当前版本
    pub(crate) fn mark_deleted(&mut self, txn: TxnId) {
        self.deleter = Some(txn);
    }

    /// 链上所有版本的行（含其他事务未提交的版本）
    pub(crate) fn rows(&self) -> impl Iterator<Item = &Row> {
        self.chain().map(|v| &v.row)
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.chain()
            .map(|v| (v.row.estimated_bytes() + std::mem::size_of::<Version>()) as u64)
            .sum()
    }

    /// 去掉对任何视图都不再生效的版本，整条链失效时返回 None。
    ///
    /// 已回滚的版本丢弃，已回滚的删除标记清除；最新的已提交版本之下不再保留旧版本，
    /// 它的删除也已提交时连同它一起丢弃。
    pub(crate) fn normalize(self, registry: &TxnRegistry) -> Option<Version> {
        let mut kept = Vec::new();
        let mut cur = Some(self);
        while let Some(mut v) = cur {
            cur = v.older.take().map(|b| *b);
            if registry.is_aborted(v.writer) {
                continue;
            }
            if v.deleter.is_some_and(|d| registry.is_aborted(d)) {
                v.deleter = None;
            }
            if registry.is_committed(v.writer) {
                if !v.deleter.is_some_and(|d| registry.is_committed(d)) {
                    kept.push(v);
                }
                break;
            }
            kept.push(v);
        }
        kept.into_iter().rev().fold(None, |older, mut v| {
            v.older = older.map(Box::new);
            Some(v)
        })
    }

    /// 就地 normalize；返回 false 表示整条链失效，槽位应删除
    pub(crate) fn normalize_in_place(&mut self, registry: &TxnRegistry) -> bool {
        let placeholder = Version::new(Row::new(self.row.key(), Vec::new()), self.writer);
        match std::mem::replace(self, placeholder).normalize(registry) {
            Some(v) => {
                *self = v;
                true
            }
            None => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Touch {
    /// `counted`：插入前槽位没有有效行（主索引据此维护行数）
    Insert { counted: bool },
    Delete,
}

/// 事务已结束的写集
pub(crate) struct Finished<K> {
    pub(crate) committed: bool,
    pub(crate) touches: Vec<(K, Touch)>,
}

/// 按事务记录写过的槽位；事务结束后由索引取出并回收对应槽位
#[derive(Debug)]
pub(crate) struct WriteLog<K> {
    pending: Mutex<BTreeMap<TxnId, Vec<(K, Touch)>>>,
}

impl<K> Default for WriteLog<K> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<K> WriteLog<K> {
    pub(crate) fn record(&self, txn: TxnId, key: K, touch: Touch) {
        self.pending.lock().entry(txn).or_default().push((key, touch));
    }

    /// 取出所有已提交或已回滚事务的写集
    pub(crate) fn take_finished(&self, registry: &TxnRegistry) -> Vec<Finished<K>> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Vec::new();
        }
        let done: Vec<TxnId> = pending
            .keys()
            .copied()
            .filter(|t| !registry.is_open(*t))
            .collect();
        done.into_iter()
            .filter_map(|t| {
                pending.remove(&t).map(|touches| Finished {
                    committed: registry.is_committed(t),
                    touches,
                })
            })
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.pending.lock().clear();
    }

    pub(crate) fn pending_txns(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RowKey, Value};
    use crate::session::SessionManager;

    fn row(v: i64) -> Row {
        Row::new(RowKey(1), vec![Value::Int(v)])
    }

    #[test]
    fn pending_rewrite_falls_back_to_older_version() {
        let mgr = SessionManager::new();
        let a = mgr.create_session();
        let b = mgr.create_session();
        let mut v = Version::new(row(1), TxnId::SYSTEM);
        v.mark_deleted(a.txn_id());
        v.push(row(2), a.txn_id());

        assert_eq!(v.resolve(&a.read_view()), Some(&row(2)));
        assert_eq!(v.resolve(&b.read_view()), Some(&row(1)));
        assert_eq!(v.claim(&b.read_view(), |_| true), Claim::Pending(a.txn_id()));
        assert_eq!(v.claim(&a.read_view(), |_| true), Claim::Held);
    }

    #[test]
    fn commit_collapses_and_rollback_restores() {
        let mgr = SessionManager::new();
        let a = mgr.create_session();
        let b = mgr.create_session();

        let mut updated = Version::new(row(1), TxnId::SYSTEM);
        updated.push(row(2), a.txn_id());
        let mut deleted = Version::new(row(1), TxnId::SYSTEM);
        deleted.mark_deleted(a.txn_id());
        a.mark_written();
        a.rollback();

        let updated = updated.normalize(mgr.registry()).unwrap();
        assert_eq!(updated.rows().count(), 1);
        assert_eq!(updated.resolve(&b.read_view()), Some(&row(1)));
        let deleted = deleted.normalize(mgr.registry()).unwrap();
        assert!(deleted.deleter.is_none());
        assert_eq!(deleted.claim(&b.read_view(), |_| true), Claim::Held);

        let mut gone = Version::new(row(1), TxnId::SYSTEM);
        gone.mark_deleted(b.txn_id());
        b.commit();
        assert!(gone.normalize(mgr.registry()).is_none());
    }

    #[test]
    fn write_log_hands_out_only_finished_txns() {
        let mgr = SessionManager::new();
        let a = mgr.create_session();
        let b = mgr.create_session();
        let log = WriteLog::default();
        log.record(a.txn_id(), 1u64, Touch::Insert { counted: true });
        log.record(b.txn_id(), 2u64, Touch::Delete);
        a.commit();

        let done = log.take_finished(mgr.registry());
        assert_eq!(done.len(), 1);
        assert!(done[0].committed);
        assert_eq!(done[0].touches, vec![(1, Touch::Insert { counted: true })]);
        assert_eq!(log.pending_txns(), 1);
    }
}
