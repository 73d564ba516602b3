use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::column::Column;

/// 表的索引视角：标识、列定义、行数估计。
///
/// 行数估计由持有行数据的主索引维护，cost 估算只读。
#[derive(Debug)]
pub struct Table {
    id: u32,
    schema: String,
    name: String,
    columns: Vec<Column>,
    row_count: AtomicU64,
}

impl Table {
    pub fn new(id: u32, schema: impl Into<String>, name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            id,
            schema: schema.into(),
            name: name.into(),
            columns,
            row_count: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn row_count_estimate(&self) -> u64 {
        self.row_count.load(Ordering::Relaxed)
    }

    pub fn set_row_count_estimate(&self, rows: u64) {
        self.row_count.store(rows, Ordering::Relaxed);
    }

    pub(crate) fn adjust_row_count(&self, delta: i64) {
        if delta >= 0 {
            self.row_count.fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            let dec = delta.unsigned_abs();
            let _ = self
                .row_count
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                    Some(c.saturating_sub(dec))
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_count_never_underflows() {
        let t = Table::new(1, "PUBLIC", "T", vec![Column::new(0, "ID")]);
        t.adjust_row_count(2);
        t.adjust_row_count(-5);
        assert_eq!(t.row_count_estimate(), 0);
        assert_eq!(t.column("id").map(|c| c.id), Some(0));
        assert_eq!(t.qualified_name(), "PUBLIC.T");
    }
}
