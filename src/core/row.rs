use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::value::Value;

/// 行的稳定标识（物理 row id）
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey(pub u64);

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 扫描边界/探测键：按表列宽度存放，`None` 表示该列无界（不参与比较）。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRow {
    key: Option<RowKey>,
    values: Vec<Option<Value>>,
}

impl SearchRow {
    /// 全部列缺省的探测行
    pub fn new(width: usize) -> Self {
        Self {
            key: None,
            values: vec![None; width],
        }
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            key: None,
            values: values.into_iter().map(Some).collect(),
        }
    }

    pub fn for_key(key: RowKey) -> Self {
        Self {
            key: Some(key),
            values: Vec::new(),
        }
    }

    /// 构造器风格设置某列；越界时自动扩宽
    pub fn with(mut self, column_id: usize, value: impl Into<Value>) -> Self {
        self.set(column_id, Some(value.into()));
        self
    }

    pub fn set(&mut self, column_id: usize, value: Option<Value>) {
        if column_id >= self.values.len() {
            self.values.resize(column_id + 1, None);
        }
        self.values[column_id] = value;
    }

    pub fn value(&self, column_id: usize) -> Option<&Value> {
        self.values.get(column_id).and_then(|v| v.as_ref())
    }

    pub fn key(&self) -> Option<RowKey> {
        self.key
    }

    pub fn set_key(&mut self, key: Option<RowKey>) {
        self.key = key;
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }
}

/// 完整行：稳定 row key + 表宽度的全部列值
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    key: RowKey,
    values: Vec<Value>,
}

impl Row {
    pub fn new(key: RowKey, values: Vec<Value>) -> Self {
        Self { key, values }
    }

    pub fn key(&self) -> RowKey {
        self.key
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// 越界视为 NULL（表新增列后老行的读法）
    pub fn value(&self, column_id: usize) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(column_id).unwrap_or(&NULL)
    }

    /// 用前像替换列值（remove 时 old_columns 覆盖当前值）
    pub fn with_values(&self, values: Vec<Value>) -> Row {
        Row {
            key: self.key,
            values,
        }
    }

    pub fn to_search_row(&self) -> SearchRow {
        SearchRow {
            key: Some(self.key),
            values: self.values.iter().cloned().map(Some).collect(),
        }
    }

    pub fn estimated_bytes(&self) -> usize {
        std::mem::size_of::<Row>() + self.values.iter().map(Value::estimated_bytes).sum::<usize>()
    }
}

impl From<&Row> for SearchRow {
    fn from(row: &Row) -> Self {
        row.to_search_row()
    }
}
