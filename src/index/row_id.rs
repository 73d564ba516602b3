use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;

use crate::core::{AsyncResultHandler, Column, IndexColumn, Row, RowKey, SearchRow, Table, Value};
use crate::error::{IndexError, Result};
use crate::index::builder::RowSource;
use crate::index::cost::range_cost;
use crate::index::cursor::Cursor;
use crate::index::operator::IndexEvent;
use crate::index::params::{CursorParameters, RowFilter, Window};
use crate::index::version::{Claim, Touch, Version, WriteLog};
use crate::index::{
    ConditionMask, FirstLastIndex, Index, IndexBase, IndexKind, IndexOptions, IndexType,
    MutableIndex, RowIdLookup, ScanIndex, SortOrder,
};
use crate::session::{ReadView, Session, TxnRegistry};

/// 一代行树；truncate 整体换新
#[derive(Debug, Default)]
struct RowTree {
    map: RwLock<BTreeMap<RowKey, Version>>,
}

/// 主索引：按 row key 存放整行的版本链，表的行数估计由它维护。
///
/// 若表有整数主键列（main column），该列的值即 row key，条件可直接作用在 key 上。
/// 行数在写入时立即调整，回滚的写入在回收时补偿回来。
#[derive(Debug)]
pub struct RowIdIndex {
    base: IndexBase,
    main_column: Option<usize>,
    tree: ArcSwap<RowTree>,
    log: WriteLog<RowKey>,
    memory: AtomicU64,
    options: IndexOptions,
}

impl RowIdIndex {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        table: Arc<Table>,
        main_column: Option<Column>,
        options: &IndexOptions,
    ) -> Self {
        let main_id = main_column.as_ref().map(|c| c.id);
        let columns = main_column.into_iter().map(IndexColumn::asc).collect();
        let base = IndexBase::new(
            id,
            name,
            table,
            IndexType::primary_key(false, false).with_constraint(),
            columns,
        );
        Self {
            base,
            main_column: main_id,
            tree: ArcSwap::from_pointee(RowTree::default()),
            log: WriteLog::default(),
            memory: AtomicU64::new(0),
            options: options.clone(),
        }
    }

    /// 边界值：优先显式 key，其次 main column 的整数值（可以为负）
    fn bound_value(&self, bound: &SearchRow) -> Option<i128> {
        if let Some(k) = bound.key() {
            return Some(i128::from(k.0));
        }
        let col = self.main_column?;
        match bound.value(col)? {
            Value::Int(i) => Some(i128::from(*i)),
            _ => None,
        }
    }

    /// 行槽位数（含其他事务未提交的行与尚未回收的删除）
    pub fn entry_count(&self) -> usize {
        self.tree.load().map.read().len()
    }

    /// 回收已结束事务写过的行；回滚的写入补偿行数
    fn reap(&self, registry: &TxnRegistry) {
        let finished = self.log.take_finished(registry);
        if finished.is_empty() {
            return;
        }
        let tree = self.tree.load();
        let mut map = tree.map.write();
        let mut delta = 0i64;
        for done in finished {
            for (key, touch) in done.touches {
                if !done.committed {
                    delta += match touch {
                        Touch::Insert { counted: true } => -1,
                        Touch::Insert { counted: false } => 0,
                        Touch::Delete => 1,
                    };
                }
                self.normalize_slot(&mut map, key, registry);
            }
        }
        drop(map);
        if delta != 0 {
            self.base.table().adjust_row_count(delta);
        }
    }

    fn normalize_slot(&self, map: &mut BTreeMap<RowKey, Version>, key: RowKey, registry: &TxnRegistry) {
        let Some(slot) = map.get_mut(&key) else {
            return;
        };
        self.memory.fetch_sub(slot.bytes(), Ordering::Relaxed);
        if slot.normalize_in_place(registry) {
            self.memory.fetch_add(slot.bytes(), Ordering::Relaxed);
        } else {
            map.remove(&key);
        }
    }

    fn insert_row(&self, session: &Session, row: Row) -> Result<u64> {
        self.base.check_open()?;
        let view = session.read_view();
        self.reap(view.registry());
        let key = row.key();
        let tree = self.tree.load();
        let mut map = tree.map.write();
        self.normalize_slot(&mut map, key, view.registry());
        match map.get_mut(&key) {
            Some(slot) => match slot.claim(&view, |_| true) {
                Claim::Held => {
                    return Err(IndexError::ConstraintViolation {
                        index: self.base.name().to_string(),
                        key: key.to_string(),
                    })
                }
                Claim::Pending(holder) => return Err(self.base.lock_conflict(key, holder)),
                Claim::Free => {
                    let before = slot.bytes();
                    slot.push(row, view.txn());
                    self.memory
                        .fetch_add(slot.bytes() - before, Ordering::Relaxed);
                }
            },
            None => {
                let slot = Version::new(row, view.txn());
                self.memory.fetch_add(slot.bytes(), Ordering::Relaxed);
                map.insert(key, slot);
            }
        }
        drop(map);
        self.log.record(view.txn(), key, Touch::Insert { counted: true });
        self.base.table().adjust_row_count(1);
        session.mark_written();
        Ok(1)
    }

    fn delete_row(&self, session: &Session, key: RowKey, is_locked_by_self: bool) -> Result<u64> {
        self.base.check_open()?;
        if !is_locked_by_self {
            session.lock_row(self.base.table(), key)?;
        }
        let view = session.read_view();
        self.reap(view.registry());
        let tree = self.tree.load();
        let mut map = tree.map.write();
        self.normalize_slot(&mut map, key, view.registry());
        let claim = match map.get_mut(&key) {
            Some(slot) => {
                let claim = slot.claim(&view, |_| true);
                if claim == Claim::Held {
                    slot.mark_deleted(view.txn());
                }
                claim
            }
            None => Claim::Free,
        };
        drop(map);
        match claim {
            Claim::Held => {
                self.log.record(view.txn(), key, Touch::Delete);
                self.base.table().adjust_row_count(-1);
                session.mark_written();
                Ok(1)
            }
            Claim::Pending(holder) => Err(self.base.lock_conflict(key, holder)),
            Claim::Free => Err(self.base.row_not_found(key)),
        }
    }
}

/// 按 row key 的惰性分批游标；每批持读锁看至多 `batch` 个槽位，下一批从上次位置重新定位
struct KeyRangeCursor {
    tree: Arc<RowTree>,
    view: ReadView,
    lower: Bound<RowKey>,
    upper: Bound<RowKey>,
    reverse: bool,
    filter: Option<RowFilter>,
    window: Window,
    position: Option<RowKey>,
    buffer: VecDeque<Row>,
    batch: usize,
    source_done: bool,
    done: bool,
}

impl KeyRangeCursor {
    fn refill(&mut self) {
        let (lo, hi) = match (self.position, self.reverse) {
            (None, _) => (self.lower, self.upper),
            (Some(p), false) => (Bound::Excluded(p), self.upper),
            (Some(p), true) => (self.lower, Bound::Excluded(p)),
        };
        let map = self.tree.map.read();
        let range = map.range((lo, hi));
        let slots: Box<dyn Iterator<Item = (&RowKey, &Version)>> = if self.reverse {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };
        let mut seen = 0;
        for (k, slot) in slots.take(self.batch) {
            seen += 1;
            self.position = Some(*k);
            if let Some(row) = slot.resolve(&self.view) {
                self.buffer.push_back(row.clone());
            }
        }
        if seen < self.batch {
            self.source_done = true;
        }
    }
}

impl Cursor for KeyRangeCursor {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if self.done || self.window.exhausted() {
                self.done = true;
                return Ok(None);
            }
            let Some(row) = self.buffer.pop_front() else {
                if self.source_done {
                    self.done = true;
                    return Ok(None);
                }
                self.refill();
                continue;
            };
            if let Some(f) = &self.filter {
                if !f(&row) {
                    continue;
                }
            }
            if self.window.admit() {
                return Ok(Some(row));
            }
        }
    }
}

impl ScanIndex for RowIdIndex {
    fn scan(&self, session: &Session, params: &CursorParameters) -> Result<Box<dyn Cursor>> {
        self.base.check_open()?;
        let view = session.read_view();
        self.reap(view.registry());
        let lo = params.first.as_ref().and_then(|b| self.bound_value(b));
        let hi = params.last.as_ref().and_then(|b| self.bound_value(b));
        // row key 非负：负的上界之下没有行，负的下界等于不设下界
        let empty = hi.is_some_and(|h| h < 0) || matches!((lo, hi), (Some(a), Some(b)) if a > b);
        let to_key = |v: i128| RowKey(u64::try_from(v.max(0)).unwrap_or(u64::MAX));
        Ok(Box::new(KeyRangeCursor {
            tree: self.tree.load_full(),
            view,
            lower: lo.map_or(Bound::Unbounded, |v| Bound::Included(to_key(v))),
            upper: hi.map_or(Bound::Unbounded, |v| Bound::Included(to_key(v))),
            reverse: params.is_reverse(),
            filter: params.filter.clone(),
            window: Window::new(params),
            position: None,
            buffer: VecDeque::new(),
            batch: self.options.scan_batch_size.max(1),
            source_done: empty,
            done: false,
        }))
    }
}

impl FirstLastIndex for RowIdIndex {
    fn first_or_last(&self, session: &Session, first: bool) -> Result<Option<SearchRow>> {
        self.base.check_open()?;
        let view = session.read_view();
        self.reap(view.registry());
        let tree = self.tree.load();
        let map = tree.map.read();
        let found = if first {
            map.values().find_map(|slot| slot.resolve(&view))
        } else {
            map.values().rev().find_map(|slot| slot.resolve(&view))
        };
        Ok(found.map(Row::to_search_row))
    }
}

impl RowIdLookup for RowIdIndex {
    fn row_by_key(&self, session: &Session, key: RowKey) -> Result<Option<Row>> {
        self.base.check_open()?;
        let view = session.read_view();
        let tree = self.tree.load();
        let map = tree.map.read();
        Ok(map.get(&key).and_then(|slot| slot.resolve(&view)).cloned())
    }
}

impl RowSource for RowIdIndex {
    fn rows_after(&self, session: &Session, after: Option<RowKey>, limit: usize) -> Result<Vec<Row>> {
        self.base.check_open()?;
        let view = session.read_view();
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let tree = self.tree.load();
        let map = tree.map.read();
        Ok(map
            .range((lower, Bound::Unbounded))
            .filter_map(|(_, slot)| slot.resolve(&view))
            .take(limit)
            .cloned()
            .collect())
    }

    fn current(&self, session: &Session, key: RowKey) -> Result<Option<Row>> {
        self.row_by_key(session, key)
    }
}

impl MutableIndex for RowIdIndex {
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
        // 主索引按 row key 定位，前像不影响删除位置
        handler.complete(self.delete_row(session, row.key(), is_locked_by_self));
    }
}

impl Index for RowIdIndex {
    fn base(&self) -> &IndexBase {
        &self.base
    }

    fn kind(&self) -> IndexKind {
        IndexKind::RowId
    }

    fn as_scan(&self) -> Option<&dyn ScanIndex> {
        Some(self)
    }

    fn as_first_last(&self) -> Option<&dyn FirstLastIndex> {
        Some(self)
    }

    fn as_row_id(&self) -> Option<&dyn RowIdLookup> {
        Some(self)
    }

    fn as_mutable(&self) -> Option<&dyn MutableIndex> {
        Some(self)
    }

    fn compare_rows(&self, a: &SearchRow, b: &SearchRow) -> CmpOrdering {
        match (self.bound_value(a), self.bound_value(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => CmpOrdering::Equal,
        }
    }

    /// 主索引的行读取更重：代价放大 10 倍，二级索引能用时优先二级索引
    fn cost(
        &self,
        _session: &Session,
        masks: Option<&[ConditionMask]>,
        sort_order: Option<&SortOrder>,
    ) -> f64 {
        10.0 * range_cost(
            self.base.columns(),
            true,
            masks,
            self.base.table().row_count_estimate(),
            sort_order,
            self.options.cost_row_offset,
        )
    }

    fn close(&self, _session: &Session) -> Result<()> {
        if self.base.mark_closed() {
            self.base.notify_operator(IndexEvent::Closed);
            tracing::info!("Primary index {} closed", self.base.name());
        }
        Ok(())
    }

    fn remove_index(&self, _session: &Session) -> Result<()> {
        self.base.mark_closed();
        self.base.notify_operator(IndexEvent::Removed);
        self.tree.store(Arc::new(RowTree::default()));
        self.log.clear();
        self.memory.store(0, Ordering::Relaxed);
        self.base.table().set_row_count_estimate(0);
        Ok(())
    }

    fn truncate(&self, _session: &Session) -> Result<()> {
        self.base.check_open()?;
        self.tree.store(Arc::new(RowTree::default()));
        self.log.clear();
        self.memory.store(0, Ordering::Relaxed);
        self.base.table().set_row_count_estimate(0);
        self.base.reset_after_truncate();
        self.base.notify_operator(IndexEvent::Truncated);
        tracing::info!("Primary index {} truncated", self.base.name());
        Ok(())
    }

    fn memory_space_used(&self) -> u64 {
        self.memory.load(Ordering::Relaxed)
    }
}
