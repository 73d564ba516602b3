use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::{IndexColumn, RowKey, Table};
use crate::error::{IndexError, Result};
use crate::index::index_type::IndexType;
use crate::index::operator::{IndexEvent, IndexOperator};
use crate::session::TxnId;

/// 各索引实现共享的定义与生命周期状态
#[derive(Debug)]
pub struct IndexBase {
    id: u32,
    name: String,
    table: Arc<Table>,
    index_type: IndexType,
    columns: Vec<IndexColumn>,
    comment: Option<String>,

    building: AtomicBool,
    need_rebuild: AtomicBool,
    closed: AtomicBool,
    /// 构建断点：已纳入索引的最大 row key
    last_indexed_row_key: Mutex<Option<RowKey>>,
    operator: RwLock<Option<Arc<dyn IndexOperator>>>,
}

impl IndexBase {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        table: Arc<Table>,
        index_type: IndexType,
        columns: Vec<IndexColumn>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            table,
            index_type,
            columns,
            comment: None,
            building: AtomicBool::new(false),
            need_rebuild: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_indexed_row_key: Mutex::new(None),
            operator: RwLock::new(None),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn index_type(&self) -> &IndexType {
        &self.index_type
    }

    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(IndexError::Closed(self.name.clone()))
        } else {
            Ok(())
        }
    }

    pub(crate) fn lock_conflict(&self, row_key: RowKey, holder: TxnId) -> IndexError {
        IndexError::LockConflict {
            table: self.table.name().to_string(),
            row_key,
            holder,
        }
    }

    pub(crate) fn row_not_found(&self, row_key: RowKey) -> IndexError {
        IndexError::RowNotFound {
            index: self.name.clone(),
            row_key,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 首次关闭返回 true
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::Acquire)
    }

    pub fn set_building(&self, building: bool) {
        self.building.store(building, Ordering::Release);
    }

    pub fn need_rebuild(&self) -> bool {
        self.need_rebuild.load(Ordering::Acquire)
    }

    pub fn set_need_rebuild(&self, need: bool) {
        self.need_rebuild.store(need, Ordering::Release);
    }

    pub fn last_indexed_row_key(&self) -> Option<RowKey> {
        *self.last_indexed_row_key.lock()
    }

    /// 构建中只允许前进；非构建状态可任意设置（含清空）
    pub fn set_last_indexed_row_key(&self, key: Option<RowKey>) {
        let mut cur = self.last_indexed_row_key.lock();
        if self.is_building() {
            if let (Some(new), Some(old)) = (key, *cur) {
                if new <= old {
                    return;
                }
            } else if key.is_none() {
                return;
            }
        }
        *cur = key;
    }

    pub fn index_operator(&self) -> Option<Arc<dyn IndexOperator>> {
        self.operator.read().clone()
    }

    pub fn set_index_operator(&self, op: Option<Arc<dyn IndexOperator>>) {
        *self.operator.write() = op;
    }

    pub fn notify_operator(&self, event: IndexEvent) {
        // 回调期间不持锁：驱动可能反过来调用 set_index_operator
        let op = self.operator.read().clone();
        if let Some(op) = op {
            tracing::debug!("Index {}: notify operator {} of {:?}", self.name, op.name(), event);
            op.on_event(event);
        }
    }

    /// truncate 后的状态复位：无需重建、断点清空
    pub fn reset_after_truncate(&self) {
        self.set_building(false);
        self.set_need_rebuild(false);
        *self.last_indexed_row_key.lock() = None;
    }
}
