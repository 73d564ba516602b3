use std::collections::VecDeque;

use crate::core::Row;
use crate::error::Result;

/// 单次扫描的游标：惰性、只进、一次性。
///
/// 返回 `Ok(None)` 后永远返回 `Ok(None)`；迭代中的存储错误在出错那一步返回。
pub trait Cursor: Send {
    fn next(&mut self) -> Result<Option<Row>>;
}

impl<C: Cursor + ?Sized> Cursor for Box<C> {
    fn next(&mut self) -> Result<Option<Row>> {
        (**self).next()
    }
}

/// 已物化的结果集游标（点查 / distinct / 小结果）
#[derive(Debug, Default)]
pub struct RowCursor {
    rows: VecDeque<Row>,
}

impl RowCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: rows.into() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl Cursor for RowCursor {
    fn next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }
}

/// 取尽游标
pub fn collect_rows(cursor: &mut dyn Cursor) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    while let Some(row) = cursor.next()? {
        out.push(row);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RowKey, Value};

    #[test]
    fn row_cursor_stays_exhausted() {
        let mut c = RowCursor::new(vec![Row::new(RowKey(1), vec![Value::Int(1)])]);
        assert!(c.next().unwrap().is_some());
        assert!(c.next().unwrap().is_none());
        assert!(c.next().unwrap().is_none());
        assert!(collect_rows(&mut RowCursor::empty()).unwrap().is_empty());
    }
}
