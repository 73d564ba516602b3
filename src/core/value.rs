use std::cmp::Ordering;
use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};

use crate::core::column::{NullOrdering, SortType};

/// 列值。`Null` 是真实的 SQL NULL（与 SearchRow 中“缺省=无界”不同）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Double(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
        }
    }

    /// 非 NULL 值之间的全序；数值跨类型按数值比较，double 用 total_cmp。
    /// 调用方负责 NULL（见 [`compare_values`]）。
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Double(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Value::Double(a), Value::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    /// 写入 hash（hash 索引分桶用）；与 `compare == Equal` 保持一致。
    pub fn hash_into<H: Hasher>(&self, h: &mut H) {
        h.write_u8(self.type_rank());
        match self {
            Value::Null => {}
            Value::Bool(b) => h.write_u8(*b as u8),
            Value::Int(i) => h.write_i64(*i),
            Value::Double(d) => h.write_u64(d.to_bits()),
            Value::Text(s) => {
                h.write_usize(s.len());
                h.write(s.as_bytes());
            }
            Value::Bytes(b) => {
                h.write_usize(b.len());
                h.write(b);
            }
        }
    }

    /// 估算堆+内联占用（字节，偏保守）
    pub fn estimated_bytes(&self) -> usize {
        let inline = std::mem::size_of::<Value>();
        match self {
            Value::Text(s) => inline + s.capacity(),
            Value::Bytes(b) => inline + b.capacity(),
            _ => inline,
        }
    }
}

/// 按索引列的 sort type 比较两个值（含 NULL 放置规则）。
///
/// 默认 NULL 视为最小：升序排在最前，降序排在最后；显式 NULLS FIRST/LAST 不受方向影响。
pub fn compare_values(a: &Value, b: &Value, sort: SortType) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (a_null, true) | (a_null @ true, _) => {
            let null_low = if a_null {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            match sort.nulls {
                NullOrdering::First => null_low,
                NullOrdering::Last => null_low.reverse(),
                NullOrdering::Default if sort.descending => null_low.reverse(),
                NullOrdering::Default => null_low,
            }
        }
        _ => {
            let c = a.compare(b);
            if sort.descending {
                c.reverse()
            } else {
                c
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => {
                write!(f, "X'")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                write!(f, "'")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
