use std::cmp::Ordering as CmpOrdering;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use roaring::RoaringTreemap;
use xxhash_rust::xxh3::Xxh3;

use crate::core::{
    compare_values, AsyncResultHandler, IndexColumn, Row, RowKey, SearchRow, SortType, Value,
};
use crate::error::{IndexError, Result};
use crate::index::cost::hash_cost;
use crate::index::cursor::{Cursor, RowCursor};
use crate::index::operator::IndexEvent;
use crate::index::version::{Claim, Touch, Version, WriteLog};
use crate::index::{
    ConditionMask, Index, IndexBase, IndexKind, KeyLookupIndex, MutableIndex, SortOrder,
};
use crate::session::{ReadView, Session, TxnRegistry};

/// 同一 hash 桶内的一组同值键
#[derive(Debug)]
struct KeyGroup {
    values: Vec<Value>,
    row_keys: RoaringTreemap,
}

fn same_values(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| compare_values(x, y, SortType::ASCENDING) == CmpOrdering::Equal)
}

fn values_bytes(values: &[Value]) -> u64 {
    values.iter().map(Value::estimated_bytes).sum::<usize>() as u64
}

/// Hash 索引：只支持按完整键等值点查与变更。
///
/// 键值 → xxh3 分桶 → 同值组的 row key 位图；行本体按 row key 存一条版本链，
/// 链上每个版本的键值都挂在对应的同值组里，版本回收后再摘掉。
/// 加锁顺序固定为先桶后行，同一时刻至多持有一个桶。
#[derive(Debug)]
pub struct HashIndex {
    base: IndexBase,
    columns: Arc<[IndexColumn]>,
    buckets: DashMap<u64, Vec<KeyGroup>>,
    rows: DashMap<RowKey, Version>,
    log: WriteLog<RowKey>,
    distinct_keys: AtomicU64,
    memory: AtomicU64,
}

impl HashIndex {
    pub fn new(base: IndexBase) -> Self {
        let columns: Arc<[IndexColumn]> = base.columns().into();
        base.set_need_rebuild(base.table().row_count_estimate() > 0);
        Self {
            base,
            columns,
            buckets: DashMap::new(),
            rows: DashMap::new(),
            log: WriteLog::default(),
            distinct_keys: AtomicU64::new(0),
            memory: AtomicU64::new(0),
        }
    }

    fn key_of(&self, row: &Row) -> Vec<Value> {
        self.columns
            .iter()
            .map(|ic| row.value(ic.column.id).clone())
            .collect()
    }

    fn hash_of(values: &[Value]) -> u64 {
        let mut h = Xxh3::new();
        for v in values {
            v.hash_into(&mut h);
        }
        h.finish()
    }

    /// 不同键值的个数
    pub fn distinct_key_count(&self) -> u64 {
        self.distinct_keys.load(Ordering::Relaxed)
    }

    /// 行槽位数（含其他事务未提交的行与尚未回收的删除）
    pub fn entry_count(&self) -> usize {
        self.rows.len()
    }

    fn rows_per_key(&self) -> u64 {
        if self.base.index_type().unique {
            return 1;
        }
        let rows = self.base.table().row_count_estimate();
        (rows / self.distinct_key_count().max(1)).max(1)
    }

    /// 版本链上出现过的不同键值
    fn chain_values(&self, slot: &Version) -> Vec<Vec<Value>> {
        let mut out: Vec<Vec<Value>> = Vec::new();
        for row in slot.rows() {
            let values = self.key_of(row);
            if !out.iter().any(|v| same_values(v, &values)) {
                out.push(values);
            }
        }
        out
    }

    /// 回收已结束事务写过的行
    fn reap(&self, registry: &TxnRegistry) {
        for done in self.log.take_finished(registry) {
            for (row_key, _) in done.touches {
                self.normalize_row(row_key, registry);
            }
        }
    }

    /// 回收一行的失效版本，并摘掉不再被任何版本使用的键值
    fn normalize_row(&self, row_key: RowKey, registry: &TxnRegistry) {
        let mut before = Vec::new();
        let mut after = Vec::new();
        self.rows.remove_if_mut(&row_key, |_, slot| {
            before = self.chain_values(slot);
            self.memory.fetch_sub(slot.bytes(), Ordering::Relaxed);
            if !slot.normalize_in_place(registry) {
                return true;
            }
            after = self.chain_values(slot);
            self.memory.fetch_add(slot.bytes(), Ordering::Relaxed);
            false
        });
        for values in before {
            if !after.iter().any(|v| same_values(v, &values)) {
                self.unlink_if_unused(&values, row_key);
            }
        }
    }

    /// 同值组里是否有别的行与之冲突。NULL 永不冲突；
    /// 进行中事务写入或删除的同值行结果未定，报 LockConflict。
    fn check_unique(&self, group: &KeyGroup, row_key: RowKey, view: &ReadView) -> Result<()> {
        if !self.base.index_type().unique || group.values.iter().any(Value::is_null) {
            return Ok(());
        }
        for other in group.row_keys.iter().map(RowKey) {
            if other == row_key {
                continue;
            }
            // 插入在桶锁内同时写位图与行，持同一个桶锁时看不到只挂了位的中间态；
            // 找不到行只可能是整行已被回收、位尚未摘掉
            let claim = match self.rows.get(&other) {
                Some(slot) => slot.claim(view, |r| same_values(&self.key_of(r), &group.values)),
                None => Claim::Free,
            };
            match claim {
                Claim::Free => {}
                Claim::Held => {
                    let parts: Vec<String> = group.values.iter().map(Value::to_string).collect();
                    return Err(IndexError::ConstraintViolation {
                        index: self.base.name().to_string(),
                        key: format!("({})", parts.join(", ")),
                    });
                }
                Claim::Pending(holder) => return Err(self.base.lock_conflict(other, holder)),
            }
        }
        Ok(())
    }

    /// 行的版本链里已没有这组键值时，才从同值组里摘掉 row key
    fn unlink_if_unused(&self, values: &[Value], row_key: RowKey) {
        let hash = Self::hash_of(values);
        let bucket_empty = match self.buckets.get_mut(&hash) {
            Some(mut groups) => {
                let still_used = self.rows.get(&row_key).is_some_and(|slot| {
                    slot.rows()
                        .any(|r| same_values(&self.key_of(r), values))
                });
                if !still_used {
                    if let Some(pos) = groups.iter().position(|g| same_values(&g.values, values)) {
                        groups[pos].row_keys.remove(row_key.0);
                        if groups[pos].row_keys.is_empty() {
                            let g = groups.swap_remove(pos);
                            self.memory
                                .fetch_sub(values_bytes(&g.values), Ordering::Relaxed);
                            self.distinct_keys.fetch_sub(1, Ordering::Relaxed);
                        }
                    }
                }
                groups.is_empty()
            }
            None => false,
        };
        if bucket_empty {
            self.buckets.remove_if(&hash, |_, groups| groups.is_empty());
        }
    }

    fn insert_row(&self, session: &Session, row: Row) -> Result<u64> {
        self.base.check_open()?;
        let view = session.read_view();
        self.reap(view.registry());
        let values = self.key_of(&row);
        let hash = Self::hash_of(&values);
        let row_key = row.key();
        let txn = view.txn();
        self.normalize_row(row_key, view.registry());

        // 桶锁一直持有到行写入完成：并发的同值插入在这里串行
        let mut groups = self.buckets.entry(hash).or_default();
        if let Some(Claim::Pending(holder)) =
            self.rows.get(&row_key).map(|slot| slot.claim(&view, |_| true))
        {
            return Err(self.base.lock_conflict(row_key, holder));
        }
        let pos = match groups.iter().position(|g| same_values(&g.values, &values)) {
            Some(pos) => {
                self.check_unique(&groups[pos], row_key, &view)?;
                pos
            }
            None => {
                self.memory
                    .fetch_add(values_bytes(&values), Ordering::Relaxed);
                self.distinct_keys.fetch_add(1, Ordering::Relaxed);
                groups.push(KeyGroup {
                    values,
                    row_keys: RoaringTreemap::new(),
                });
                groups.len() - 1
            }
        };
        groups[pos].row_keys.insert(row_key.0);
        match self.rows.entry(row_key) {
            Entry::Occupied(mut e) => {
                let slot = e.get_mut();
                let before = slot.bytes();
                slot.push(row, txn);
                self.memory
                    .fetch_add(slot.bytes() - before, Ordering::Relaxed);
            }
            Entry::Vacant(e) => {
                let slot = Version::new(row, txn);
                self.memory.fetch_add(slot.bytes(), Ordering::Relaxed);
                e.insert(slot);
            }
        }
        drop(groups);

        self.log.record(txn, row_key, Touch::Insert { counted: false });
        session.mark_written();
        Ok(1)
    }

    /// 行由 row key 唯一确定，前像键值不参与定位
    fn delete_row(&self, session: &Session, row: Row, is_locked_by_self: bool) -> Result<u64> {
        self.base.check_open()?;
        let row_key = row.key();
        if !is_locked_by_self {
            session.lock_row(self.base.table(), row_key)?;
        }
        let view = session.read_view();
        self.reap(view.registry());
        self.normalize_row(row_key, view.registry());
        let claim = match self.rows.get_mut(&row_key) {
            Some(mut slot) => {
                let claim = slot.claim(&view, |_| true);
                if claim == Claim::Held {
                    slot.mark_deleted(view.txn());
                }
                claim
            }
            None => Claim::Free,
        };
        match claim {
            Claim::Held => {
                self.log.record(view.txn(), row_key, Touch::Delete);
                session.mark_written();
                Ok(1)
            }
            Claim::Pending(holder) => Err(self.base.lock_conflict(row_key, holder)),
            Claim::Free if self.base.is_building() => Ok(0),
            Claim::Free => Err(self.base.row_not_found(row_key)),
        }
    }

    fn clear(&self) {
        self.buckets.clear();
        self.rows.clear();
        self.log.clear();
        self.distinct_keys.store(0, Ordering::Relaxed);
        self.memory.store(0, Ordering::Relaxed);
    }
}

impl KeyLookupIndex for HashIndex {
    fn seek(&self, session: &Session, key: &SearchRow) -> Result<Box<dyn Cursor>> {
        self.base.check_open()?;
        let mut values = Vec::with_capacity(self.columns.len());
        for ic in self.columns.iter() {
            match key.value(ic.column.id) {
                Some(v) => values.push(v.clone()),
                None => return Err(IndexError::unsupported(self.base.name(), "partial key lookup")),
            }
        }
        let view = session.read_view();
        self.reap(view.registry());
        let hash = Self::hash_of(&values);
        let row_keys: Vec<u64> = match self.buckets.get(&hash) {
            Some(groups) => groups
                .iter()
                .find(|g| same_values(&g.values, &values))
                .map(|g| g.row_keys.iter().collect())
                .unwrap_or_default(),
            None => Vec::new(),
        };

        // 同值组里的行可能已被改成别的键值，按视图解析后再核对一次
        let rows = row_keys
            .into_iter()
            .filter_map(|k| {
                let slot = self.rows.get(&RowKey(k))?;
                let row = slot.resolve(&view)?;
                same_values(&self.key_of(row), &values).then(|| row.clone())
            })
            .collect();
        Ok(Box::new(RowCursor::new(rows)))
    }
}

impl MutableIndex for HashIndex {
    fn insert(&self, session: &Arc<Session>, row: Row, handler: AsyncResultHandler<u64>) {
        handler.complete(self.insert_row(session, row));
    }

    fn delete(
        &self,
        session: &Arc<Session>,
        row: Row,
        _old_columns: Option<Vec<Value>>,
        is_locked_by_self: bool,
        handler: AsyncResultHandler<u64>,
    ) {
        handler.complete(self.delete_row(session, row, is_locked_by_self));
    }
}

impl Index for HashIndex {
    fn base(&self) -> &IndexBase {
        &self.base
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Hash
    }

    fn as_lookup(&self) -> Option<&dyn KeyLookupIndex> {
        Some(self)
    }

    fn as_mutable(&self) -> Option<&dyn MutableIndex> {
        Some(self)
    }

    fn cost(
        &self,
        _session: &Session,
        masks: Option<&[ConditionMask]>,
        _sort_order: Option<&SortOrder>,
    ) -> f64 {
        hash_cost(&self.columns, masks, self.rows_per_key())
    }

    fn close(&self, _session: &Session) -> Result<()> {
        if self.base.mark_closed() {
            self.base.notify_operator(IndexEvent::Closed);
            self.clear();
            tracing::info!("Hash index {} closed", self.base.name());
        }
        Ok(())
    }

    fn remove_index(&self, _session: &Session) -> Result<()> {
        self.base.mark_closed();
        self.base.notify_operator(IndexEvent::Removed);
        self.clear();
        tracing::info!("Hash index {} removed", self.base.name());
        Ok(())
    }

    fn truncate(&self, _session: &Session) -> Result<()> {
        self.base.check_open()?;
        self.clear();
        self.base.reset_after_truncate();
        self.base.notify_operator(IndexEvent::Truncated);
        tracing::info!("Hash index {} truncated", self.base.name());
        Ok(())
    }

    fn memory_space_used(&self) -> u64 {
        self.memory.load(Ordering::Relaxed)
    }
}
