//! 有序索引的 BTreeMap 键。
//!
//! 存储键 = 全部索引列值 + row key（`Tie::Exact`）；探测键只带前缀值，
//! 用 `Tie::Low` / `Tie::High` 表示“该前缀下的最小/最大位置”，用于范围定位。

use std::cmp::Ordering;
use std::sync::Arc;

use crate::core::{compare_values, IndexColumn, Row, RowKey, SearchRow, SortType, Value};

/// 每列的排序方式；同一索引的所有键共享一份
#[derive(Debug, PartialEq, Eq)]
pub struct KeyOrder {
    sorts: Vec<SortType>,
}

impl KeyOrder {
    pub fn new(columns: &[IndexColumn]) -> Arc<Self> {
        Arc::new(Self {
            sorts: columns.iter().map(|ic| ic.sort).collect(),
        })
    }

    pub fn sorts(&self) -> &[SortType] {
        &self.sorts
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tie {
    Low,
    Exact,
    High,
}

#[derive(Clone, Debug)]
pub struct IndexKey {
    values: Vec<Value>,
    row_key: RowKey,
    tie: Tie,
    order: Arc<KeyOrder>,
}

impl IndexKey {
    /// 从整行提取存储键
    pub fn for_row(row: &Row, columns: &[IndexColumn], order: &Arc<KeyOrder>) -> Self {
        Self {
            values: columns
                .iter()
                .map(|ic| row.value(ic.column.id).clone())
                .collect(),
            row_key: row.key(),
            tie: Tie::Exact,
            order: order.clone(),
        }
    }

    /// 从边界提取前缀探测键：取到第一个缺省列为止
    pub fn bound_of(bound: &SearchRow, columns: &[IndexColumn], order: &Arc<KeyOrder>, tie: Tie) -> Self {
        let values = columns
            .iter()
            .map_while(|ic| bound.value(ic.column.id).cloned())
            .collect();
        Self {
            values,
            row_key: RowKey(0),
            tie,
            order: order.clone(),
        }
    }

    /// 给定完整值的前缀探测（唯一性检查、distinct 跳跃）
    pub fn prefix(values: Vec<Value>, order: &Arc<KeyOrder>, tie: Tie) -> Self {
        Self {
            values,
            row_key: RowKey(0),
            tie,
            order: order.clone(),
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn row_key(&self) -> RowKey {
        self.row_key
    }

    pub fn has_null(&self) -> bool {
        self.values.iter().any(Value::is_null)
    }

    /// 只比较索引列值（不含 row key）
    pub fn same_values(&self, other: &IndexKey) -> bool {
        self.values.len() == other.values.len() && self.cmp_values(other) == Ordering::Equal
    }

    fn cmp_values(&self, other: &IndexKey) -> Ordering {
        let sorts = self.order.sorts();
        for (i, (a, b)) in self.values.iter().zip(&other.values).enumerate() {
            let sort = sorts.get(i).copied().unwrap_or_default();
            let c = compare_values(a, b, sort);
            if c != Ordering::Equal {
                return c;
            }
        }
        Ordering::Equal
    }

    pub fn estimated_bytes(&self) -> usize {
        std::mem::size_of::<IndexKey>() + self.values.iter().map(Value::estimated_bytes).sum::<usize>()
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let c = self.cmp_values(other);
        if c != Ordering::Equal {
            return c;
        }
        // 公共前缀相等：较短一方的 tie 决定位置（Low 在前、High 在后）
        match self.values.len().cmp(&other.values.len()) {
            Ordering::Less => match self.tie {
                Tie::High => Ordering::Greater,
                Tie::Low | Tie::Exact => Ordering::Less,
            },
            Ordering::Greater => match other.tie {
                Tie::High => Ordering::Less,
                Tie::Low | Tie::Exact => Ordering::Greater,
            },
            Ordering::Equal => match (self.tie, other.tie) {
                (Tie::Exact, Tie::Exact) => self.row_key.cmp(&other.row_key),
                (a, b) => tie_rank(a).cmp(&tie_rank(b)),
            },
        }
    }
}

fn tie_rank(t: Tie) -> u8 {
    match t {
        Tie::Low => 0,
        Tie::Exact => 1,
        Tie::High => 2,
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}
