//! 索引抽象层：planner/executor 与各物理索引之间的统一契约。
//!
//! ## 结构
//! - [`Index`]：元数据、生命周期、代价估算，以及带能力检查的便捷入口
//! - 能力 trait：[`ScanIndex`] / [`FirstLastIndex`] / [`DistinctIndex`] /
//!   [`RowIdLookup`] / [`KeyLookupIndex`] / [`MutableIndex`]，通过 `as_*` 取得
//! - 能力缺失时便捷入口同步返回 `Err(Unsupported)`，不产生游标、不触发 handler
//!
//! ## 变更契约
//! - 变更全部异步：结果通过 [`AsyncResultHandler`] 交付，每条路径恰好一次
//! - 默认 `update` = `remove(old)` 成功后再 `add(new)`；任一步失败即原样上报

pub mod base;
pub mod builder;
pub mod condition;
pub mod cost;
pub mod cursor;
pub mod hash;
pub mod index_type;
pub mod key;
pub mod mutation;
pub mod operator;
pub mod ordered;
pub mod params;
pub mod row_id;
pub(crate) mod version;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::core::{
    compare_values, AsyncResult, AsyncResultHandler, Column, IndexColumn, Row, RowKey, SearchRow,
    Table, Value,
};
use crate::error::{IndexError, Result};
use crate::session::Session;
use crate::stats::IndexReport;

pub use base::IndexBase;
pub use builder::{IndexBuilder, RowSource};
pub use condition::{ConditionMask, SortOrder};
pub use cursor::{collect_rows, Cursor, RowCursor};
pub use hash::HashIndex;
pub use index_type::IndexType;
pub use operator::{IndexEvent, IndexOperator};
pub use ordered::OrderedIndex;
pub use params::{CursorParameters, RowFilter, ScanDirection};
pub use row_id::RowIdIndex;

/// 具体实现种类（诊断/报告用的封闭枚举）
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Ordered,
    Hash,
    RowId,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexKind::Ordered => "ordered",
            IndexKind::Hash => "hash",
            IndexKind::RowId => "row-id",
        };
        f.write_str(s)
    }
}

/// 构造索引时的运行参数（来自 EngineConfig）
#[derive(Clone, Debug)]
pub struct IndexOptions {
    pub cost_row_offset: u64,
    /// 游标每次持锁搬运的条目数
    pub scan_batch_size: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            cost_row_offset: cost::COST_ROW_OFFSET,
            scan_batch_size: 256,
        }
    }
}

/// 一次行更新的全部输入
#[derive(Clone, Debug)]
pub struct RowUpdate {
    pub old_row: Row,
    pub new_row: Row,
    /// 旧行前像；存在时覆盖 `old_row` 的列值
    pub old_columns: Option<Vec<Value>>,
    /// 本次被修改的列（column id）
    pub update_columns: Vec<usize>,
    pub is_locked_by_self: bool,
}

impl RowUpdate {
    pub fn new(old_row: Row, new_row: Row) -> Self {
        Self {
            old_row,
            new_row,
            old_columns: None,
            update_columns: Vec::new(),
            is_locked_by_self: false,
        }
    }

    pub fn columns(mut self, update_columns: Vec<usize>) -> Self {
        self.update_columns = update_columns;
        self
    }

    pub fn locked_by_self(mut self) -> Self {
        self.is_locked_by_self = true;
        self
    }
}

/// 有序范围扫描
pub trait ScanIndex: Send + Sync {
    fn scan(&self, session: &Session, params: &CursorParameters) -> Result<Box<dyn Cursor>>;
}

pub trait FirstLastIndex: Send + Sync {
    /// 空索引返回 `None`
    fn first_or_last(&self, session: &Session, first: bool) -> Result<Option<SearchRow>>;
}

pub trait DistinctIndex: Send + Sync {
    fn scan_distinct(&self, session: &Session) -> Result<Box<dyn Cursor>>;
}

pub trait RowIdLookup: Send + Sync {
    /// 不存在返回 `Ok(None)`
    fn row_by_key(&self, session: &Session, key: RowKey) -> Result<Option<Row>>;
}

/// 按完整索引键的点查（hash 索引的等值查找）
pub trait KeyLookupIndex: Send + Sync {
    fn seek(&self, session: &Session, key: &SearchRow) -> Result<Box<dyn Cursor>>;
}

pub trait MutableIndex: Send + Sync {
    fn insert(&self, session: &Arc<Session>, row: Row, handler: AsyncResultHandler<u64>);

    fn delete(
        &self,
        session: &Arc<Session>,
        row: Row,
        old_columns: Option<Vec<Value>>,
        is_locked_by_self: bool,
        handler: AsyncResultHandler<u64>,
    );
}

pub trait Index: Send + Sync + 'static {
    fn base(&self) -> &IndexBase;

    fn kind(&self) -> IndexKind;

    // ---- 元数据 ----

    fn id(&self) -> u32 {
        self.base().id()
    }

    fn name(&self) -> &str {
        self.base().name()
    }

    fn table(&self) -> &Arc<Table> {
        self.base().table()
    }

    fn index_type(&self) -> &IndexType {
        self.base().index_type()
    }

    fn index_columns(&self) -> &[IndexColumn] {
        self.base().columns()
    }

    fn columns(&self) -> Vec<&Column> {
        self.index_columns().iter().map(|ic| &ic.column).collect()
    }

    fn column_ids(&self) -> Vec<usize> {
        self.index_columns().iter().map(|ic| ic.column.id).collect()
    }

    /// 列在索引中的 0-based 位置
    fn column_index(&self, column: &Column) -> Option<usize> {
        self.index_columns()
            .iter()
            .position(|ic| ic.column.id == column.id)
    }

    fn comment(&self) -> Option<&str> {
        self.base().comment()
    }

    fn create_sql(&self) -> String {
        let cols: Vec<String> = self.index_columns().iter().map(IndexColumn::sql).collect();
        let mut sql = format!(
            "CREATE {} {} ON {}({})",
            self.index_type().sql(),
            self.name(),
            self.table().qualified_name(),
            cols.join(", ")
        );
        if let Some(c) = self.comment() {
            sql.push_str(&format!(" COMMENT '{}'", c.replace('\'', "''")));
        }
        sql
    }

    fn plan_sql(&self) -> String {
        format!("{}.{}", self.table().qualified_name(), self.name())
    }

    // ---- 能力 ----

    fn as_scan(&self) -> Option<&dyn ScanIndex> {
        None
    }

    fn as_first_last(&self) -> Option<&dyn FirstLastIndex> {
        None
    }

    fn as_distinct(&self) -> Option<&dyn DistinctIndex> {
        None
    }

    fn as_row_id(&self) -> Option<&dyn RowIdLookup> {
        None
    }

    fn as_lookup(&self) -> Option<&dyn KeyLookupIndex> {
        None
    }

    fn as_mutable(&self) -> Option<&dyn MutableIndex> {
        None
    }

    fn can_scan(&self) -> bool {
        self.as_scan().is_some()
    }

    fn can_get_first_or_last(&self) -> bool {
        self.as_first_last().is_some()
    }

    fn supports_distinct_query(&self) -> bool {
        self.as_distinct().is_some()
    }

    fn is_row_id_index(&self) -> bool {
        self.as_row_id().is_some()
    }

    // ---- 扫描 ----

    fn find(
        &self,
        session: &Session,
        first: Option<&SearchRow>,
        last: Option<&SearchRow>,
    ) -> Result<Box<dyn Cursor>> {
        self.find_with(
            session,
            &CursorParameters::range(first.cloned(), last.cloned()),
        )
    }

    fn find_with(&self, session: &Session, params: &CursorParameters) -> Result<Box<dyn Cursor>> {
        self.base().check_open()?;
        let scan = self
            .as_scan()
            .ok_or_else(|| IndexError::unsupported(self.name(), "scan"))?;
        scan.scan(session, params)
    }

    fn find_first_or_last(&self, session: &Session, first: bool) -> Result<Option<SearchRow>> {
        self.base().check_open()?;
        let fl = self
            .as_first_last()
            .ok_or_else(|| IndexError::unsupported(self.name(), "first/last lookup"))?;
        fl.first_or_last(session, first)
    }

    fn find_distinct(&self, session: &Session) -> Result<Box<dyn Cursor>> {
        self.base().check_open()?;
        let d = self
            .as_distinct()
            .ok_or_else(|| IndexError::unsupported(self.name(), "distinct scan"))?;
        d.scan_distinct(session)
    }

    fn get_row(&self, session: &Session, key: RowKey) -> Result<Option<Row>> {
        self.base().check_open()?;
        let r = self
            .as_row_id()
            .ok_or_else(|| IndexError::unsupported(self.name(), "row id lookup"))?;
        r.row_by_key(session, key)
    }

    fn lookup(&self, session: &Session, key: &SearchRow) -> Result<Box<dyn Cursor>> {
        self.base().check_open()?;
        let l = self
            .as_lookup()
            .ok_or_else(|| IndexError::unsupported(self.name(), "key lookup"))?;
        l.seek(session, key)
    }

    /// 按索引列顺序与方向比较；任一侧缺省的列不参与比较
    fn compare_rows(&self, a: &SearchRow, b: &SearchRow) -> Ordering {
        compare_search_rows(self.index_columns(), a, b)
    }

    // ---- 变更 ----

    fn add(
        &self,
        session: &Arc<Session>,
        row: Row,
        handler: AsyncResultHandler<u64>,
    ) -> Result<()> {
        match self.as_mutable() {
            Some(m) => {
                m.insert(session, row, handler);
                Ok(())
            }
            None => {
                handler.discard();
                Err(IndexError::unsupported(self.name(), "add"))
            }
        }
    }

    fn remove(
        &self,
        session: &Arc<Session>,
        row: Row,
        old_columns: Option<Vec<Value>>,
        is_locked_by_self: bool,
        handler: AsyncResultHandler<u64>,
    ) -> Result<()> {
        match self.as_mutable() {
            Some(m) => {
                m.delete(session, row, old_columns, is_locked_by_self, handler);
                Ok(())
            }
            None => {
                handler.discard();
                Err(IndexError::unsupported(self.name(), "remove"))
            }
        }
    }

    /// 默认两步：remove(old) 成功后才 add(new)；remove 失败原样上报，add 不会发生
    fn update(
        self: Arc<Self>,
        session: &Arc<Session>,
        update: RowUpdate,
        handler: AsyncResultHandler<u64>,
    ) -> Result<()> {
        let Some(m) = self.as_mutable() else {
            handler.discard();
            return Err(IndexError::unsupported(self.name(), "update"));
        };
        let RowUpdate {
            old_row,
            new_row,
            old_columns,
            is_locked_by_self,
            ..
        } = update;

        let this = self.clone();
        let sess = session.clone();
        let then_add = AsyncResultHandler::new(move |removed: AsyncResult<u64>| match removed {
            AsyncResult::Failed(e) => handler.fail(e),
            AsyncResult::Succeeded(_) => match this.as_mutable() {
                Some(m) => m.insert(&sess, new_row, handler),
                None => handler.fail(IndexError::unsupported(this.name(), "add")),
            },
        });
        m.delete(session, old_row, old_columns, is_locked_by_self, then_add);
        Ok(())
    }

    // ---- 代价 ----

    fn cost(
        &self,
        session: &Session,
        masks: Option<&[ConditionMask]>,
        sort_order: Option<&SortOrder>,
    ) -> f64;

    // ---- 生命周期 ----

    fn need_rebuild(&self) -> bool {
        self.base().need_rebuild()
    }

    fn is_building(&self) -> bool {
        self.base().is_building()
    }

    fn set_building(&self, building: bool) {
        self.base().set_building(building)
    }

    fn last_indexed_row_key(&self) -> Option<RowKey> {
        self.base().last_indexed_row_key()
    }

    fn set_last_indexed_row_key(&self, key: Option<RowKey>) {
        self.base().set_last_indexed_row_key(key)
    }

    fn index_operator(&self) -> Option<Arc<dyn IndexOperator>> {
        self.base().index_operator()
    }

    fn set_index_operator(&self, op: Option<Arc<dyn IndexOperator>>) {
        self.base().set_index_operator(op)
    }

    fn is_closed(&self) -> bool {
        self.base().is_closed()
    }

    fn close(&self, session: &Session) -> Result<()>;

    /// 销毁持久化状态（索引被 DROP）
    fn remove_index(&self, session: &Session) -> Result<()>;

    fn truncate(&self, session: &Session) -> Result<()>;

    fn disk_space_used(&self) -> u64 {
        0
    }

    fn memory_space_used(&self) -> u64;

    fn report(&self) -> IndexReport {
        IndexReport {
            index_name: self.name().to_string(),
            table: self.table().qualified_name(),
            kind: self.kind().to_string(),
            type_sql: self.index_type().sql().to_string(),
            columns: self
                .index_columns()
                .iter()
                .map(|ic| {
                    let dir = if ic.sort.descending { "D" } else { "A" };
                    format!("{} {}", ic.column.name, dir)
                })
                .collect(),
            unique: self.index_type().unique,
            primary_key: self.index_type().primary_key,
            belongs_to_constraint: self.index_type().belongs_to_constraint,
            row_count_estimate: self.table().row_count_estimate(),
            last_indexed_row_key: self.last_indexed_row_key().map(|k| k.0),
            building: self.is_building(),
            need_rebuild: self.need_rebuild(),
            closed: self.is_closed(),
            disk_bytes: self.disk_space_used(),
            memory_bytes: self.memory_space_used(),
            comment: self.comment().map(str::to_string),
        }
    }
}

/// 按索引列比较两个查找行，比到任一侧第一个缺省的列为止（前缀语义）
pub fn compare_search_rows(columns: &[IndexColumn], a: &SearchRow, b: &SearchRow) -> Ordering {
    for ic in columns {
        let (Some(va), Some(vb)) = (a.value(ic.column.id), b.value(ic.column.id)) else {
            break;
        };
        let c = compare_values(va, vb, ic.sort);
        if c != Ordering::Equal {
            return c;
        }
    }
    Ordering::Equal
}

/// 完整行与边界比较；边界只约束第一个缺省列之前的前缀
pub(crate) fn compare_row_to_bound(columns: &[IndexColumn], row: &Row, bound: &SearchRow) -> Ordering {
    for ic in columns {
        let Some(vb) = bound.value(ic.column.id) else {
            break;
        };
        let c = compare_values(row.value(ic.column.id), vb, ic.sort);
        if c != Ordering::Equal {
            return c;
        }
    }
    Ordering::Equal
}

/// 行是否落在闭区间 [first, last]
pub(crate) fn within_bounds(
    columns: &[IndexColumn],
    row: &Row,
    first: Option<&SearchRow>,
    last: Option<&SearchRow>,
) -> bool {
    first.map_or(true, |f| compare_row_to_bound(columns, row, f) != Ordering::Less)
        && last.map_or(true, |l| compare_row_to_bound(columns, row, l) != Ordering::Greater)
}
