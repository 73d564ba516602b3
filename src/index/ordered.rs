use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;

use crate::core::{AsyncResultHandler, IndexColumn, Row, SearchRow, Value};
use crate::error::{IndexError, Result};
use crate::index::cost::range_cost;
use crate::index::cursor::Cursor;
use crate::index::key::{IndexKey, KeyOrder, Tie};
use crate::index::operator::IndexEvent;
use crate::index::params::{CursorParameters, RowFilter, Window};
use crate::index::version::{Claim, Touch, Version, WriteLog};
use crate::index::{
    within_bounds, ConditionMask, DistinctIndex, FirstLastIndex, Index, IndexBase, IndexKind,
    IndexOptions, KeyLookupIndex, MutableIndex, RowUpdate, ScanIndex, SortOrder,
};
use crate::session::{ReadView, Session, TxnId, TxnRegistry};
use crate::storage::{IndexSnapshot, SnapshotStore};

type Slots = BTreeMap<IndexKey, Version>;

/// 一代键树；truncate 整体换新，存量游标继续读旧的一代
#[derive(Debug, Default)]
struct KeyTree {
    map: RwLock<Slots>,
}

fn slot_bytes(key: &IndexKey, slot: &Version) -> u64 {
    key.estimated_bytes() as u64 + slot.bytes()
}

fn render_key(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(Value::to_string).collect();
    format!("({})", parts.join(", "))
}

/// 有序索引（BTreeMap，参考实现）。
///
/// - 能力：范围扫描、首/尾、distinct（非 unique 时）、前缀点查、变更、原子 update
/// - 可见性：每个键是一条版本链，扫描按会话视图解析；删除与改写提交前其他会话仍读旧版本
/// - 可选快照：close 时落盘，open 时恢复；快照无效则标记需要重建
#[derive(Debug)]
pub struct OrderedIndex {
    base: IndexBase,
    columns: Arc<[IndexColumn]>,
    order: Arc<KeyOrder>,
    tree: ArcSwap<KeyTree>,
    log: WriteLog<IndexKey>,
    memory: AtomicU64,
    options: IndexOptions,
    store: Option<SnapshotStore>,
}

impl OrderedIndex {
    /// 纯内存索引；建在已有数据的表上时标记需要重建
    pub fn new(base: IndexBase, options: &IndexOptions) -> Self {
        let columns: Arc<[IndexColumn]> = base.columns().into();
        let order = KeyOrder::new(&columns);
        base.set_need_rebuild(base.table().row_count_estimate() > 0);
        Self {
            base,
            columns,
            order,
            tree: ArcSwap::from_pointee(KeyTree::default()),
            log: WriteLog::default(),
            memory: AtomicU64::new(0),
            options: options.clone(),
            store: None,
        }
    }

    /// 带快照的索引：快照有效则直接恢复，否则视表内是否有数据决定是否重建
    pub fn open(base: IndexBase, options: &IndexOptions, store: SnapshotStore) -> Result<Self> {
        let mut idx = Self::new(base, options);
        match store.load_if_valid()? {
            Some(snap) if idx.accepts(&snap) => {
                let rows = snap.rows.len();
                idx.restore(snap);
                tracing::info!(
                    "Index {} restored from snapshot: {} rows (need_rebuild={})",
                    idx.base.name(),
                    rows,
                    idx.base.need_rebuild()
                );
            }
            Some(_) => {
                tracing::warn!(
                    "Snapshot {} does not match index {} definition, ignoring",
                    store.path().display(),
                    idx.base.name()
                );
            }
            None => {
                tracing::debug!("No usable snapshot for index {}", idx.base.name());
            }
        }
        idx.store = Some(store);
        Ok(idx)
    }

    fn accepts(&self, snap: &IndexSnapshot) -> bool {
        let ids: Vec<usize> = self.columns.iter().map(|ic| ic.column.id).collect();
        let bits: Vec<u8> = self.columns.iter().map(|ic| ic.sort.bits()).collect();
        snap.index_name == self.base.name() && snap.column_ids == ids && snap.sort_bits == bits
    }

    fn restore(&mut self, snap: IndexSnapshot) {
        let mut map = BTreeMap::new();
        let mut bytes = 0u64;
        for row in snap.rows {
            let key = IndexKey::for_row(&row, &self.columns, &self.order);
            let slot = Version::new(row, TxnId::SYSTEM);
            bytes += slot_bytes(&key, &slot);
            map.insert(key, slot);
        }
        let empty = map.is_empty();
        self.tree = ArcSwap::from_pointee(KeyTree {
            map: RwLock::new(map),
        });
        self.memory.store(bytes, Ordering::Relaxed);
        self.base.set_last_indexed_row_key(snap.last_indexed_row_key);
        let table_has_rows = self.base.table().row_count_estimate() > 0;
        self.base
            .set_need_rebuild(!snap.complete || (empty && table_has_rows));
    }

    fn snapshot_of(&self, view: &ReadView) -> IndexSnapshot {
        let tree = self.tree.load();
        let rows = tree
            .map
            .read()
            .values()
            .filter_map(|slot| slot.resolve(view))
            .cloned()
            .collect();
        IndexSnapshot {
            index_name: self.base.name().to_string(),
            table: self.base.table().qualified_name(),
            column_ids: self.columns.iter().map(|ic| ic.column.id).collect(),
            sort_bits: self.columns.iter().map(|ic| ic.sort.bits()).collect(),
            complete: !self.base.is_building() && !self.base.need_rebuild(),
            last_indexed_row_key: self.base.last_indexed_row_key(),
            rows,
        }
    }

    /// 立即把已提交数据写入快照；无快照存储时返回 0
    pub fn snapshot_now(&self, session: &Session) -> Result<u64> {
        self.base.check_open()?;
        match &self.store {
            Some(store) => store.write_atomic(&self.snapshot_of(&session.committed_view())),
            None => Ok(0),
        }
    }

    /// 索引内的键数（含其他事务未提交的键与尚未回收的删除）
    pub fn entry_count(&self) -> usize {
        self.tree.load().map.read().len()
    }

    fn pre_image(row: Row, old_columns: Option<Vec<Value>>) -> Row {
        match old_columns {
            Some(values) => row.with_values(values),
            None => row,
        }
    }

    /// 回收已结束事务写过的键
    fn reap(&self, registry: &TxnRegistry) {
        let finished = self.log.take_finished(registry);
        if finished.is_empty() {
            return;
        }
        let tree = self.tree.load();
        let mut map = tree.map.write();
        for done in finished {
            for (key, _) in done.touches {
                self.normalize_slot(&mut map, &key, registry);
            }
        }
    }

    fn normalize_slot(&self, map: &mut Slots, key: &IndexKey, registry: &TxnRegistry) {
        let Some((k, slot)) = map.remove_entry(key) else {
            return;
        };
        self.memory
            .fetch_sub(slot_bytes(&k, &slot), Ordering::Relaxed);
        if let Some(slot) = slot.normalize(registry) {
            self.memory
                .fetch_add(slot_bytes(&k, &slot), Ordering::Relaxed);
            map.insert(k, slot);
        }
    }

    fn claim_of(map: &Slots, key: &IndexKey, view: &ReadView) -> Claim {
        map.get(key)
            .map_or(Claim::Free, |slot| slot.claim(view, |_| true))
    }

    /// 唯一性检查：同值且不同 row key 的有效条目。NULL 永不冲突；
    /// 进行中事务写入或删除的同值条目结果未定，报 LockConflict。
    fn check_unique(
        &self,
        map: &Slots,
        key: &IndexKey,
        replacing: Option<&IndexKey>,
        view: &ReadView,
    ) -> Result<()> {
        if !self.base.index_type().unique || key.has_null() {
            return Ok(());
        }
        let lo = IndexKey::prefix(key.values().to_vec(), &self.order, Tie::Low);
        let hi = IndexKey::prefix(key.values().to_vec(), &self.order, Tie::High);
        for (k, slot) in map.range(lo..=hi) {
            if k.row_key() == key.row_key() || replacing == Some(k) {
                continue;
            }
            match slot.claim(view, |_| true) {
                Claim::Free => {}
                Claim::Held => {
                    return Err(IndexError::ConstraintViolation {
                        index: self.base.name().to_string(),
                        key: render_key(key.values()),
                    })
                }
                Claim::Pending(holder) => return Err(self.base.lock_conflict(k.row_key(), holder)),
            }
        }
        Ok(())
    }

    /// 在键上压入本事务的新版本
    fn put(&self, map: &mut Slots, key: IndexKey, row: Row, view: &ReadView) -> Result<()> {
        let txn = view.txn();
        match map.get_mut(&key) {
            Some(slot) => {
                if let Claim::Pending(holder) = slot.claim(view, |_| true) {
                    return Err(self.base.lock_conflict(key.row_key(), holder));
                }
                let before = slot.bytes();
                slot.push(row, txn);
                self.memory
                    .fetch_add(slot.bytes() - before, Ordering::Relaxed);
            }
            None => {
                let slot = Version::new(row, txn);
                self.memory
                    .fetch_add(slot_bytes(&key, &slot), Ordering::Relaxed);
                map.insert(key.clone(), slot);
            }
        }
        self.log.record(txn, key, Touch::Insert { counted: false });
        Ok(())
    }

    fn insert_row(&self, session: &Session, row: Row) -> Result<u64> {
        self.base.check_open()?;
        let view = session.read_view();
        self.reap(view.registry());
        let key = IndexKey::for_row(&row, &self.columns, &self.order);
        let tree = self.tree.load();
        let mut map = tree.map.write();
        self.check_unique(&map, &key, None, &view)?;
        self.normalize_slot(&mut map, &key, view.registry());
        self.put(&mut map, key, row, &view)?;
        session.mark_written();
        Ok(1)
    }

    fn delete_row(
        &self,
        session: &Session,
        row: Row,
        old_columns: Option<Vec<Value>>,
        is_locked_by_self: bool,
    ) -> Result<u64> {
        self.base.check_open()?;
        let row = Self::pre_image(row, old_columns);
        if !is_locked_by_self {
            session.lock_row(self.base.table(), row.key())?;
        }
        let view = session.read_view();
        self.reap(view.registry());
        let key = IndexKey::for_row(&row, &self.columns, &self.order);
        let tree = self.tree.load();
        let mut map = tree.map.write();
        self.normalize_slot(&mut map, &key, view.registry());
        match Self::claim_of(&map, &key, &view) {
            Claim::Held => {
                if let Some(slot) = map.get_mut(&key) {
                    slot.mark_deleted(view.txn());
                }
                self.log.record(view.txn(), key, Touch::Delete);
                session.mark_written();
                Ok(1)
            }
            Claim::Pending(holder) => Err(self.base.lock_conflict(row.key(), holder)),
            // 构建中：该行可能尚未被纳入索引
            Claim::Free if self.base.is_building() => Ok(0),
            Claim::Free => Err(self.base.row_not_found(row.key())),
        }
    }

    /// 单步原子更新：持写锁完成检查、旧键记删除与新版本写入，没有中间态
    fn update_in_place(&self, session: &Session, update: RowUpdate) -> Result<u64> {
        self.base.check_open()?;
        let RowUpdate {
            old_row,
            new_row,
            old_columns,
            is_locked_by_self,
            ..
        } = update;
        let old_row = Self::pre_image(old_row, old_columns);
        if !is_locked_by_self {
            session.lock_row(self.base.table(), old_row.key())?;
        }
        let view = session.read_view();
        self.reap(view.registry());
        let old_key = IndexKey::for_row(&old_row, &self.columns, &self.order);
        let new_key = IndexKey::for_row(&new_row, &self.columns, &self.order);

        let tree = self.tree.load();
        let mut map = tree.map.write();
        self.normalize_slot(&mut map, &old_key, view.registry());
        let old_claim = Self::claim_of(&map, &old_key, &view);
        match old_claim {
            Claim::Pending(holder) => return Err(self.base.lock_conflict(old_row.key(), holder)),
            Claim::Free if !self.base.is_building() => {
                return Err(self.base.row_not_found(old_row.key()))
            }
            Claim::Free | Claim::Held => {}
        }
        self.check_unique(&map, &new_key, Some(&old_key), &view)?;

        if new_key != old_key {
            self.normalize_slot(&mut map, &new_key, view.registry());
            if let Claim::Pending(holder) = Self::claim_of(&map, &new_key, &view) {
                return Err(self.base.lock_conflict(new_row.key(), holder));
            }
            if old_claim == Claim::Held {
                if let Some(slot) = map.get_mut(&old_key) {
                    slot.mark_deleted(view.txn());
                }
                self.log.record(view.txn(), old_key, Touch::Delete);
            }
        }
        // 同键时新版本直接压在旧版本之上
        self.put(&mut map, new_key, new_row, &view)?;
        session.mark_written();
        Ok(1)
    }

    fn cursor(&self, session: &Session, params: &CursorParameters, distinct: bool) -> Box<dyn Cursor> {
        let view = session.read_view();
        self.reap(view.registry());
        let lower = params
            .first
            .as_ref()
            .map(|f| IndexKey::bound_of(f, &self.columns, &self.order, Tie::Low));
        let upper = params
            .last
            .as_ref()
            .map(|l| IndexKey::bound_of(l, &self.columns, &self.order, Tie::High));
        // BTreeMap::range 对 start > end 会 panic
        let empty = matches!((&lower, &upper), (Some(lo), Some(hi)) if lo > hi);
        Box::new(RangeCursor {
            tree: self.tree.load_full(),
            columns: self.columns.clone(),
            view,
            lower: lower.map_or(Bound::Unbounded, Bound::Included),
            upper: upper.map_or(Bound::Unbounded, Bound::Included),
            first: params.first.clone(),
            last: params.last.clone(),
            reverse: params.is_reverse(),
            filter: params.filter.clone(),
            window: Window::new(params),
            distinct,
            last_emitted: None,
            position: None,
            buffer: VecDeque::new(),
            batch: self.options.scan_batch_size.max(1),
            source_done: empty,
            done: false,
        })
    }
}

/// 惰性分批游标：每批持读锁看至多 `batch` 个键，按视图解析出可见行；
/// 下一批从上次位置重新定位
struct RangeCursor {
    tree: Arc<KeyTree>,
    columns: Arc<[IndexColumn]>,
    view: ReadView,
    lower: Bound<IndexKey>,
    upper: Bound<IndexKey>,
    first: Option<SearchRow>,
    last: Option<SearchRow>,
    reverse: bool,
    filter: Option<RowFilter>,
    window: Window,
    distinct: bool,
    last_emitted: Option<IndexKey>,
    position: Option<IndexKey>,
    buffer: VecDeque<(IndexKey, Row)>,
    batch: usize,
    source_done: bool,
    done: bool,
}

impl RangeCursor {
    fn refill(&mut self) {
        let (lo, hi) = match (&self.position, self.reverse) {
            (None, _) => (self.lower.clone(), self.upper.clone()),
            (Some(p), false) => (Bound::Excluded(p.clone()), self.upper.clone()),
            (Some(p), true) => (self.lower.clone(), Bound::Excluded(p.clone())),
        };
        let map = self.tree.map.read();
        let range = map.range((lo, hi));
        let slots: Box<dyn Iterator<Item = (&IndexKey, &Version)>> = if self.reverse {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };
        let mut seen = 0;
        for (k, slot) in slots.take(self.batch) {
            seen += 1;
            self.position = Some(k.clone());
            if let Some(row) = slot.resolve(&self.view) {
                self.buffer.push_back((k.clone(), row.clone()));
            }
        }
        if seen < self.batch {
            self.source_done = true;
        }
    }
}

impl Cursor for RangeCursor {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if self.done || self.window.exhausted() {
                self.done = true;
                return Ok(None);
            }
            let Some((key, row)) = self.buffer.pop_front() else {
                if self.source_done {
                    self.done = true;
                    return Ok(None);
                }
                self.refill();
                continue;
            };
            if !within_bounds(&self.columns, &row, self.first.as_ref(), self.last.as_ref()) {
                continue;
            }
            if self.distinct
                && self
                    .last_emitted
                    .as_ref()
                    .is_some_and(|prev| prev.same_values(&key))
            {
                continue;
            }
            if let Some(f) = &self.filter {
                if !f(&row) {
                    continue;
                }
            }
            if self.distinct {
                self.last_emitted = Some(key);
            }
            if self.window.admit() {
                return Ok(Some(row));
            }
        }
    }
}

impl ScanIndex for OrderedIndex {
    fn scan(&self, session: &Session, params: &CursorParameters) -> Result<Box<dyn Cursor>> {
        self.base.check_open()?;
        Ok(self.cursor(session, params, false))
    }
}

impl FirstLastIndex for OrderedIndex {
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

impl DistinctIndex for OrderedIndex {
    fn scan_distinct(&self, session: &Session) -> Result<Box<dyn Cursor>> {
        self.base.check_open()?;
        Ok(self.cursor(session, &CursorParameters::new(), true))
    }
}

impl KeyLookupIndex for OrderedIndex {
    fn seek(&self, session: &Session, key: &SearchRow) -> Result<Box<dyn Cursor>> {
        self.base.check_open()?;
        let params = CursorParameters::range(Some(key.clone()), Some(key.clone()));
        Ok(self.cursor(session, &params, false))
    }
}

impl MutableIndex for OrderedIndex {
    fn insert(&self, session: &Arc<Session>, row: Row, handler: AsyncResultHandler<u64>) {
        let key = row.key();
        let result = self.insert_row(session, row);
        if let Err(e) = &result {
            tracing::debug!("Index {}: add row {} failed: {}", self.base.name(), key, e);
        }
        handler.complete(result);
    }

    fn delete(
        &self,
        session: &Arc<Session>,
        row: Row,
        old_columns: Option<Vec<Value>>,
        is_locked_by_self: bool,
        handler: AsyncResultHandler<u64>,
    ) {
        handler.complete(self.delete_row(session, row, old_columns, is_locked_by_self));
    }
}

impl Index for OrderedIndex {
    fn base(&self) -> &IndexBase {
        &self.base
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Ordered
    }

    fn as_scan(&self) -> Option<&dyn ScanIndex> {
        Some(self)
    }

    fn as_first_last(&self) -> Option<&dyn FirstLastIndex> {
        Some(self)
    }

    fn as_distinct(&self) -> Option<&dyn DistinctIndex> {
        // unique 索引每行一个键，distinct 扫描没有意义
        if self.base.index_type().unique {
            None
        } else {
            Some(self)
        }
    }

    fn as_lookup(&self) -> Option<&dyn KeyLookupIndex> {
        Some(self)
    }

    fn as_mutable(&self) -> Option<&dyn MutableIndex> {
        Some(self)
    }

    fn update(
        self: Arc<Self>,
        session: &Arc<Session>,
        update: RowUpdate,
        handler: AsyncResultHandler<u64>,
    ) -> Result<()> {
        handler.complete(self.update_in_place(session, update));
        Ok(())
    }

    fn cost(
        &self,
        _session: &Session,
        masks: Option<&[ConditionMask]>,
        sort_order: Option<&SortOrder>,
    ) -> f64 {
        range_cost(
            &self.columns,
            self.base.index_type().unique,
            masks,
            self.base.table().row_count_estimate(),
            sort_order,
            self.options.cost_row_offset,
        )
    }

    fn close(&self, session: &Session) -> Result<()> {
        if !self.base.mark_closed() {
            return Ok(());
        }
        let written = match &self.store {
            Some(store) => store
                .write_atomic(&self.snapshot_of(&session.committed_view()))
                .map(|_| ()),
            None => Ok(()),
        };
        self.base.notify_operator(IndexEvent::Closed);
        self.tree.store(Arc::new(KeyTree::default()));
        self.log.clear();
        self.memory.store(0, Ordering::Relaxed);
        tracing::info!("Index {} closed", self.base.name());
        written
    }

    fn remove_index(&self, _session: &Session) -> Result<()> {
        self.base.mark_closed();
        self.base.notify_operator(IndexEvent::Removed);
        self.tree.store(Arc::new(KeyTree::default()));
        self.log.clear();
        self.memory.store(0, Ordering::Relaxed);
        if let Some(store) = &self.store {
            store.remove()?;
        }
        tracing::info!("Index {} removed", self.base.name());
        Ok(())
    }

    fn truncate(&self, session: &Session) -> Result<()> {
        self.base.check_open()?;
        self.tree.store(Arc::new(KeyTree::default()));
        self.log.clear();
        self.memory.store(0, Ordering::Relaxed);
        self.base.reset_after_truncate();
        if let Some(store) = &self.store {
            // 已有快照时覆盖为空快照，否则重启会把旧数据读回来
            if store.exists() {
                store.write_atomic(&self.snapshot_of(&session.committed_view()))?;
            }
        }
        self.base.notify_operator(IndexEvent::Truncated);
        tracing::info!("Index {} truncated", self.base.name());
        Ok(())
    }

    fn disk_space_used(&self) -> u64 {
        self.store.as_ref().map_or(0, SnapshotStore::disk_size)
    }

    fn memory_space_used(&self) -> u64 {
        self.memory.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AsyncResultHandler, Column, RowKey, Table};
    use crate::error::ErrorKind;
    use crate::index::mutation::{add_row, remove_row, update_row};
    use crate::index::{collect_rows, IndexType};
    use crate::session::SessionManager;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("rowdex-{}-{}", tag, nanos))
    }

    fn table() -> Arc<Table> {
        Arc::new(Table::new(
            1,
            "PUBLIC",
            "T",
            vec![Column::new(0, "ID"), Column::new(1, "NAME")],
        ))
    }

    fn options() -> IndexOptions {
        // 小批量：强制游标多次重新定位
        IndexOptions {
            scan_batch_size: 2,
            ..IndexOptions::default()
        }
    }

    fn name_id_base(ty: IndexType) -> IndexBase {
        IndexBase::new(
            2,
            "IDX_NAME_ID",
            table(),
            ty,
            vec![
                IndexColumn::asc(Column::new(1, "NAME")),
                IndexColumn::asc(Column::new(0, "ID")),
            ],
        )
    }

    fn name_id_index() -> Arc<OrderedIndex> {
        Arc::new(OrderedIndex::new(
            name_id_base(IndexType::non_unique(false, false)),
            &options(),
        ))
    }

    fn unique_id_index() -> Arc<OrderedIndex> {
        let base = IndexBase::new(
            3,
            "UQ_ID",
            table(),
            IndexType::unique(false, false),
            vec![IndexColumn::asc(Column::new(0, "ID"))],
        );
        Arc::new(OrderedIndex::new(base, &options()))
    }

    fn row(key: u64, id: i64, name: &str) -> Row {
        Row::new(RowKey(key), vec![Value::Int(id), Value::from(name)])
    }

    /// OrderedIndex 同步完成 handler，测试里直接取结果
    fn add_now(idx: &dyn Index, s: &Arc<Session>, r: Row) -> Result<u64> {
        let (h, mut rx) = AsyncResultHandler::channel();
        idx.add(s, r, h)?;
        rx.try_recv().unwrap().into_result()
    }

    fn scan_all(idx: &dyn Index, s: &Session) -> Vec<Row> {
        let mut c = idx.find(s, None, None).unwrap();
        collect_rows(&mut c).unwrap()
    }

    fn names(rows: &[Row]) -> Vec<String> {
        rows.iter().map(|r| r.value(1).to_string()).collect()
    }

    #[tokio::test]
    async fn scan_returns_rows_in_index_order_across_batches() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        for (k, id, name) in [(1, 5, "d"), (2, 1, "b"), (3, 4, "a"), (4, 2, "b"), (5, 3, "c")] {
            add_row(&*idx, &s, row(k, id, name)).await.unwrap();
        }
        let rows = scan_all(&*idx, &s);
        assert_eq!(names(&rows), vec!["'a'", "'b'", "'b'", "'c'", "'d'"]);
        let keys: Vec<u64> = rows.iter().map(|r| r.key().0).collect();
        assert_eq!(keys, vec![3, 2, 4, 5, 1]);
        for w in rows.windows(2) {
            assert_ne!(
                idx.compare_rows(&w[0].to_search_row(), &w[1].to_search_row()),
                std::cmp::Ordering::Greater
            );
        }
        assert_eq!(idx.entry_count(), 5);
        assert!(idx.memory_space_used() > 0);
    }

    #[tokio::test]
    async fn bounds_are_inclusive_prefixes() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        for (k, id, name) in [(1, 1, "a"), (2, 2, "b"), (3, 3, "c"), (4, 4, "c"), (5, 5, "d")] {
            add_row(&*idx, &s, row(k, id, name)).await.unwrap();
        }

        let first = SearchRow::new(2).with(1, "b");
        let last = SearchRow::new(2).with(1, "c");
        let mut c = idx.find(&s, Some(&first), Some(&last)).unwrap();
        assert_eq!(names(&collect_rows(&mut c).unwrap()), vec!["'b'", "'c'", "'c'"]);

        // 首列缺省：边界不约束任何列，后面的列也不参与
        let id_from_3 = SearchRow::new(2).with(0, 3);
        let mut c = idx.find(&s, Some(&id_from_3), None).unwrap();
        assert_eq!(collect_rows(&mut c).unwrap().len(), 5);

        // 完整前缀：(c, 4) 起
        let c_4 = SearchRow::new(2).with(1, "c").with(0, 4);
        let mut c = idx.find(&s, Some(&c_4), None).unwrap();
        let ids: Vec<String> = collect_rows(&mut c)
            .unwrap()
            .iter()
            .map(|r| r.value(0).to_string())
            .collect();
        assert_eq!(ids, vec!["4", "5"]);

        // first > last：空结果而不是 panic
        let mut c = idx.find(&s, Some(&last), Some(&first)).unwrap();
        assert!(c.next().unwrap().is_none());
    }

    #[tokio::test]
    async fn reverse_limit_offset_and_filter() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        for k in 1..=6u64 {
            let name = ((b'a' + k as u8 - 1) as char).to_string();
            add_row(&*idx, &s, row(k, k as i64, &name)).await.unwrap();
        }
        let params = CursorParameters::new()
            .reverse()
            .filter(|r| r.key().0 != 5)
            .offset(1)
            .limit(2);
        let mut c = idx.find_with(&s, &params).unwrap();
        // 逆序 f e d c b a，过滤掉 e，跳过 f，取 d c
        assert_eq!(names(&collect_rows(&mut c).unwrap()), vec!["'d'", "'c'"]);
        assert!(c.next().unwrap().is_none());
    }

    #[test]
    fn unique_violation_leaves_single_row() {
        let idx = unique_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        add_now(&*idx, &s, row(1, 1, "a")).unwrap();
        let err = add_now(&*idx, &s, row(2, 1, "b")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        let rows = scan_all(&*idx, &s);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value(1), &Value::from("a"));
    }

    #[test]
    fn null_keys_never_collide_on_unique() {
        let idx = unique_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        let null_row = |k| Row::new(RowKey(k), vec![Value::Null, Value::from("x")]);
        add_now(&*idx, &s, null_row(1)).unwrap();
        add_now(&*idx, &s, null_row(2)).unwrap();
        assert_eq!(scan_all(&*idx, &s).len(), 2);
    }

    #[test]
    fn unique_conflict_with_pending_writer_is_lock_conflict() {
        let idx = unique_id_index();
        let mgr = SessionManager::new();
        let a = mgr.create_session();
        let b = mgr.create_session();
        add_now(&*idx, &a, row(1, 7, "a")).unwrap();
        let err = add_now(&*idx, &b, row(2, 7, "b")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockConflict);
        assert!(err.is_retryable());
        a.commit();
        let err = add_now(&*idx, &b, row(2, 7, "b")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }

    #[test]
    fn uncommitted_rows_are_private_until_commit() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let a = mgr.create_session();
        let b = mgr.create_session();
        add_now(&*idx, &a, row(1, 1, "a")).unwrap();
        assert_eq!(scan_all(&*idx, &a).len(), 1);
        assert!(scan_all(&*idx, &b).is_empty());
        assert!(idx.find_first_or_last(&b, true).unwrap().is_none());
        a.commit();
        assert_eq!(scan_all(&*idx, &b).len(), 1);
    }

    #[tokio::test]
    async fn uncommitted_remove_and_update_stay_invisible_to_others() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let a = mgr.create_session();
        let b = mgr.create_session();
        add_row(&*idx, &a, row(1, 1, "x")).await.unwrap();
        add_row(&*idx, &a, row(2, 2, "y")).await.unwrap();
        a.commit();

        remove_row(&*idx, &b, row(1, 1, "x"), None, false).await.unwrap();
        let update = RowUpdate::new(row(2, 2, "y"), row(2, 2, "z")).columns(vec![1]);
        update_row(&idx, &b, update).await.unwrap();

        assert_eq!(names(&scan_all(&*idx, &a)), vec!["'x'", "'y'"]);
        assert_eq!(names(&scan_all(&*idx, &b)), vec!["'z'"]);
        let first = idx.find_first_or_last(&a, true).unwrap().unwrap();
        assert_eq!(first.key(), Some(RowKey(1)));

        // 删除未决：第三个会话既不能再删，也看不到空位
        let c = mgr.create_session();
        let err = remove_row(&*idx, &c, row(1, 1, "x"), None, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockConflict);

        b.commit();
        assert_eq!(names(&scan_all(&*idx, &a)), vec!["'z'"]);
        assert_eq!(idx.entry_count(), 1);
    }

    #[tokio::test]
    async fn rollback_restores_removed_and_updated_rows() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let a = mgr.create_session();
        let b = mgr.create_session();
        add_row(&*idx, &a, row(1, 1, "x")).await.unwrap();
        add_row(&*idx, &a, row(2, 2, "y")).await.unwrap();
        a.commit();

        remove_row(&*idx, &b, row(1, 1, "x"), None, false).await.unwrap();
        let update = RowUpdate::new(row(2, 2, "y"), row(2, 2, "z")).columns(vec![1]);
        update_row(&idx, &b, update).await.unwrap();
        b.rollback();

        assert_eq!(names(&scan_all(&*idx, &a)), vec!["'x'", "'y'"]);
        assert_eq!(names(&scan_all(&*idx, &b)), vec!["'x'", "'y'"]);
        // 回滚写入的 (z, 2) 已回收
        assert_eq!(idx.entry_count(), 2);
        remove_row(&*idx, &b, row(1, 1, "x"), None, false).await.unwrap();
        assert_eq!(names(&scan_all(&*idx, &b)), vec!["'y'"]);
    }

    #[tokio::test]
    async fn pending_remove_keeps_unique_key_taken() {
        let idx = unique_id_index();
        let mgr = SessionManager::new();
        let a = mgr.create_session();
        let b = mgr.create_session();
        add_row(&*idx, &a, row(1, 7, "a")).await.unwrap();
        a.commit();

        remove_row(&*idx, &b, row(1, 7, "a"), None, false).await.unwrap();
        // b 可能回滚：键值归属未定
        let err = add_now(&*idx, &a, row(2, 7, "b")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockConflict);
        // 删除者自己可以复用键值
        add_now(&*idx, &b, row(3, 7, "c")).unwrap();
        b.commit();
        let err = add_now(&*idx, &a, row(2, 7, "b")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        assert_eq!(names(&scan_all(&*idx, &a)), vec!["'c'"]);
    }

    #[tokio::test]
    async fn atomic_update_matches_remove_then_add() {
        let atomic = name_id_index();
        let composed = name_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        for idx in [&atomic, &composed] {
            add_row(&**idx, &s, row(1, 1, "a")).await.unwrap();
            add_row(&**idx, &s, row(2, 2, "b")).await.unwrap();
        }

        let update = RowUpdate::new(row(1, 1, "a"), row(1, 1, "z")).columns(vec![1]);
        update_row(&atomic, &s, update).await.unwrap();
        remove_row(&*composed, &s, row(1, 1, "a"), None, false).await.unwrap();
        add_row(&*composed, &s, row(1, 1, "z")).await.unwrap();

        assert_eq!(scan_all(&*atomic, &s), scan_all(&*composed, &s));
        assert_eq!(names(&scan_all(&*atomic, &s)), vec!["'b'", "'z'"]);
    }

    #[tokio::test]
    async fn update_of_missing_row_fails_without_side_effects() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        add_row(&*idx, &s, row(1, 1, "a")).await.unwrap();
        let update = RowUpdate::new(row(9, 9, "q"), row(9, 9, "r"));
        let err = update_row(&idx, &s, update).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalConsistency);
        assert_eq!(names(&scan_all(&*idx, &s)), vec!["'a'"]);
    }

    #[tokio::test]
    async fn old_columns_select_the_entry_to_remove() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        add_row(&*idx, &s, row(1, 1, "old")).await.unwrap();
        // 调用方手里已是新值，前像由 old_columns 提供
        let pre_image = vec![Value::Int(1), Value::from("old")];
        remove_row(&*idx, &s, row(1, 1, "new"), Some(pre_image), false)
            .await
            .unwrap();
        assert!(scan_all(&*idx, &s).is_empty());
    }

    #[test]
    fn first_and_last_bound_every_row() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        add_now(&*idx, &s, row(1, 3, "m")).unwrap();
        add_now(&*idx, &s, Row::new(RowKey(2), vec![Value::Int(1), Value::Null])).unwrap();
        add_now(&*idx, &s, row(3, 2, "z")).unwrap();

        let first = idx.find_first_or_last(&s, true).unwrap().unwrap();
        let last = idx.find_first_or_last(&s, false).unwrap().unwrap();
        for r in scan_all(&*idx, &s) {
            let sr = r.to_search_row();
            assert_ne!(idx.compare_rows(&first, &sr), std::cmp::Ordering::Greater);
            assert_ne!(idx.compare_rows(&last, &sr), std::cmp::Ordering::Less);
        }
        assert_eq!(first.key(), Some(RowKey(2)));
        assert_eq!(last.key(), Some(RowKey(3)));
    }

    #[test]
    fn empty_index_has_no_first_or_last() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        assert!(idx.find_first_or_last(&s, true).unwrap().is_none());
        assert!(idx.find_first_or_last(&s, false).unwrap().is_none());
    }

    #[test]
    fn distinct_scan_yields_one_row_per_key() {
        let base = IndexBase::new(
            4,
            "IDX_NAME",
            table(),
            IndexType::non_unique(false, false),
            vec![IndexColumn::asc(Column::new(1, "NAME"))],
        );
        let idx = OrderedIndex::new(base, &options());
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        for (k, name) in [(1, "a"), (2, "b"), (3, "a"), (4, "c"), (5, "b"), (6, "a")] {
            add_now(&idx, &s, row(k, k as i64, name)).unwrap();
        }
        assert!(idx.supports_distinct_query());
        let mut c = idx.find_distinct(&s).unwrap();
        assert_eq!(names(&collect_rows(&mut c).unwrap()), vec!["'a'", "'b'", "'c'"]);

        assert!(!unique_id_index().supports_distinct_query());
        let err = unique_id_index().find_distinct(&s).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedCapability);
    }

    #[test]
    fn closed_index_rejects_scans_and_mutations() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        add_now(&*idx, &s, row(1, 1, "a")).unwrap();
        idx.close(&s).unwrap();
        assert!(idx.is_closed());
        assert_eq!(idx.find(&s, None, None).err().unwrap().kind(), ErrorKind::Closed);
        assert_eq!(add_now(&*idx, &s, row(2, 2, "b")).unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(idx.memory_space_used(), 0);
        // 重复 close 无副作用
        idx.close(&s).unwrap();
    }

    #[test]
    fn live_cursor_survives_truncate() {
        let idx = name_id_index();
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        for k in 1..=3 {
            add_now(&*idx, &s, row(k, k as i64, "x")).unwrap();
        }
        let mut c = idx.find(&s, None, None).unwrap();
        idx.truncate(&s).unwrap();
        assert_eq!(collect_rows(&mut c).unwrap().len(), 3);
        assert!(scan_all(&*idx, &s).is_empty());
    }

    #[test]
    fn truncate_resets_state_and_shrinks_snapshot() {
        let dir = unique_tmp_dir("ordered-truncate");
        let store = SnapshotStore::for_index(&dir, "T", "IDX_NAME_ID");
        let t = table();
        t.set_row_count_estimate(3);
        let base = IndexBase::new(
            2,
            "IDX_NAME_ID",
            t,
            IndexType::non_unique(true, false),
            vec![IndexColumn::asc(Column::new(1, "NAME"))],
        );
        let idx = OrderedIndex::open(base, &options(), store).unwrap();
        // 表里已有行、没有快照：需要重建
        assert!(idx.need_rebuild());

        let mgr = SessionManager::new();
        let s = mgr.create_session();
        for k in 1..=3 {
            add_now(&idx, &s, row(k, k as i64, "some longer name")).unwrap();
        }
        s.commit();
        idx.snapshot_now(&s).unwrap();
        let before = idx.disk_space_used();
        assert!(before > 0);

        idx.truncate(&s).unwrap();
        assert!(!idx.need_rebuild());
        assert!(idx.last_indexed_row_key().is_none());
        assert!(scan_all(&idx, &s).is_empty());
        assert!(idx.disk_space_used() <= before);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reopen_restores_committed_rows_from_snapshot() {
        let dir = unique_tmp_dir("ordered-reopen");
        let mgr = SessionManager::new();
        let s = mgr.create_session();
        let open = || {
            let store = SnapshotStore::for_index(&dir, "T", "IDX_NAME_ID");
            OrderedIndex::open(
                name_id_base(IndexType::non_unique(true, false)),
                &options(),
                store,
            )
            .unwrap()
        };

        let idx = open();
        add_now(&idx, &s, row(1, 1, "a")).unwrap();
        add_now(&idx, &s, row(2, 2, "b")).unwrap();
        s.commit();
        // 未提交的行不进快照
        add_now(&idx, &s, row(3, 3, "c")).unwrap();
        idx.close(&s).unwrap();

        let reopened = open();
        assert!(!reopened.need_rebuild());
        let other = mgr.create_session();
        assert_eq!(names(&scan_all(&reopened, &other)), vec!["'a'", "'b'"]);

        reopened.remove_index(&other).unwrap();
        assert_eq!(reopened.disk_space_used(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    fn arb_row_values() -> impl Strategy<Value = (Option<i64>, String)> {
        (prop::option::of(-5i64..5), "[a-c]{0,2}")
    }

    fn to_row(k: usize, (id, name): &(Option<i64>, String)) -> Row {
        let id = id.map_or(Value::Null, Value::Int);
        Row::new(RowKey(k as u64), vec![id, Value::from(name.as_str())])
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn compare_rows_is_a_total_order(
            a in arb_row_values(),
            b in arb_row_values(),
            c in arb_row_values(),
        ) {
            let idx = name_id_index();
            let (a, b, c) = (
                to_row(1, &a).to_search_row(),
                to_row(2, &b).to_search_row(),
                to_row(3, &c).to_search_row(),
            );
            prop_assert_eq!(idx.compare_rows(&a, &b), idx.compare_rows(&b, &a).reverse());
            if idx.compare_rows(&a, &b) != std::cmp::Ordering::Greater
                && idx.compare_rows(&b, &c) != std::cmp::Ordering::Greater
            {
                prop_assert_ne!(idx.compare_rows(&a, &c), std::cmp::Ordering::Greater);
            }
        }

        #[test]
        fn unbounded_scan_returns_exactly_the_added_rows_in_order(
            rows in prop::collection::vec(arb_row_values(), 0..40),
        ) {
            let idx = name_id_index();
            let mgr = SessionManager::new();
            let s = mgr.create_session();
            for (k, v) in rows.iter().enumerate() {
                add_now(&*idx, &s, to_row(k, v)).unwrap();
            }
            let scanned = scan_all(&*idx, &s);
            let mut keys: Vec<u64> = scanned.iter().map(|r| r.key().0).collect();
            keys.sort_unstable();
            prop_assert_eq!(keys, (0..rows.len() as u64).collect::<Vec<_>>());
            for w in scanned.windows(2) {
                prop_assert_ne!(
                    idx.compare_rows(&w[0].to_search_row(), &w[1].to_search_row()),
                    std::cmp::Ordering::Greater
                );
            }
        }
    }
}
