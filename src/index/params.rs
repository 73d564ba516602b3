use std::fmt;
use std::sync::Arc;

use crate::core::{Row, SearchRow};

/// 行级附加谓词（不能下推成边界的条件）
pub type RowFilter = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ScanDirection {
    #[default]
    Forward,
    Reverse,
}

/// 扫描参数：边界（均可缺省，闭区间）+ limit/offset + 方向 + 过滤。
///
/// 先按边界取行，再依次应用 filter → offset → limit。
#[derive(Clone, Default)]
pub struct CursorParameters {
    pub first: Option<SearchRow>,
    pub last: Option<SearchRow>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub direction: Option<ScanDirection>,
    pub filter: Option<RowFilter>,
}

impl CursorParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(first: Option<SearchRow>, last: Option<SearchRow>) -> Self {
        Self {
            first,
            last,
            ..Self::default()
        }
    }

    pub fn first(mut self, first: SearchRow) -> Self {
        self.first = Some(first);
        self
    }

    pub fn last(mut self, last: SearchRow) -> Self {
        self.last = Some(last);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn reverse(mut self) -> Self {
        self.direction = Some(ScanDirection::Reverse);
        self
    }

    pub fn filter(mut self, f: impl Fn(&Row) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(f));
        self
    }

    pub fn is_reverse(&self) -> bool {
        self.direction == Some(ScanDirection::Reverse)
    }

    pub fn accepts(&self, row: &Row) -> bool {
        self.filter.as_ref().map_or(true, |f| f(row))
    }
}

impl fmt::Debug for CursorParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorParameters")
            .field("first", &self.first)
            .field("last", &self.last)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("direction", &self.direction)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// filter/offset/limit 的逐行状态机，各游标共用
#[derive(Debug)]
pub(crate) struct Window {
    skip: usize,
    remaining: Option<usize>,
}

impl Window {
    pub(crate) fn new(params: &CursorParameters) -> Self {
        Self {
            skip: params.offset,
            remaining: params.limit,
        }
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// 该行是否输出（已通过 filter 的行才调用）
    pub(crate) fn admit(&mut self) -> bool {
        if self.skip > 0 {
            self.skip -= 1;
            return false;
        }
        match &mut self.remaining {
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
            None => true,
        }
    }
}
