use serde::{Deserialize, Serialize};

/// 未知分布时的列选择度（百分比，100 = 每行取值都不同）
pub const DEFAULT_SELECTIVITY: u8 = 50;

/// 表列定义（由表/schema 层提供，索引只读）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// 在表内的 0-based 位置，同时也是 SearchRow/Row 的取值下标
    pub id: usize,
    pub name: String,
    pub nullable: bool,
    /// 0..=100；cost 估算用
    pub selectivity: u8,
}

impl Column {
    pub fn new(id: usize, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            nullable: true,
            selectivity: DEFAULT_SELECTIVITY,
        }
    }

    pub fn with_selectivity(mut self, selectivity: u8) -> Self {
        self.selectivity = selectivity.min(100);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullOrdering {
    /// NULL 视为最小值（随方向翻转）
    #[default]
    Default,
    First,
    Last,
}

/// 列排序方式。位编码与 catalog 的 SORT_TYPE 一致：ASC=0, DESC=1, NULLS_FIRST=2, NULLS_LAST=4
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortType {
    pub descending: bool,
    pub nulls: NullOrdering,
}

impl SortType {
    pub const ASCENDING: SortType = SortType {
        descending: false,
        nulls: NullOrdering::Default,
    };
    pub const DESCENDING: SortType = SortType {
        descending: true,
        nulls: NullOrdering::Default,
    };

    pub fn bits(self) -> u8 {
        let dir = self.descending as u8;
        let nulls = match self.nulls {
            NullOrdering::Default => 0,
            NullOrdering::First => 2,
            NullOrdering::Last => 4,
        };
        dir | nulls
    }

    pub fn from_bits(bits: u8) -> Self {
        let nulls = if bits & 2 != 0 {
            NullOrdering::First
        } else if bits & 4 != 0 {
            NullOrdering::Last
        } else {
            NullOrdering::Default
        };
        Self {
            descending: bits & 1 != 0,
            nulls,
        }
    }

    fn sql_suffix(self) -> &'static str {
        match (self.descending, self.nulls) {
            (false, NullOrdering::Default) => "",
            (true, NullOrdering::Default) => " DESC",
            (false, NullOrdering::First) => " NULLS FIRST",
            (false, NullOrdering::Last) => " NULLS LAST",
            (true, NullOrdering::First) => " DESC NULLS FIRST",
            (true, NullOrdering::Last) => " DESC NULLS LAST",
        }
    }
}

/// 索引列：表列 + 排序方式
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub column: Column,
    pub sort: SortType,
}

impl IndexColumn {
    pub fn asc(column: Column) -> Self {
        Self {
            column,
            sort: SortType::ASCENDING,
        }
    }

    pub fn desc(column: Column) -> Self {
        Self {
            column,
            sort: SortType::DESCENDING,
        }
    }

    pub fn sql(&self) -> String {
        format!("{}{}", self.column.name, self.sort.sql_suffix())
    }
}
