use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::core::SortType;

/// 单列上可用于索引的条件类型（位掩码，与 planner 约定一致）
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConditionMask(u8);

impl ConditionMask {
    pub const NONE: ConditionMask = ConditionMask(0);
    /// `col = ?`
    pub const EQUALITY: ConditionMask = ConditionMask(1);
    /// `col >= ?`
    pub const START: ConditionMask = ConditionMask(2);
    /// `col <= ?`
    pub const END: ConditionMask = ConditionMask(4);
    pub const RANGE: ConditionMask = ConditionMask(2 | 4);
    /// 条件恒假（例如 `col = 1 AND col = 2`）
    pub const ALWAYS_FALSE: ConditionMask = ConditionMask(8);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0x0f)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: ConditionMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ConditionMask {
    type Output = ConditionMask;

    fn bitor(self, rhs: Self) -> Self {
        ConditionMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for ConditionMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// 查询要求的输出顺序（ORDER BY）：按优先级排列的 (column_id, sort type)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortOrder {
    keys: Vec<(usize, SortType)>,
}

impl SortOrder {
    pub fn new(keys: Vec<(usize, SortType)>) -> Self {
        Self { keys }
    }

    pub fn ascending(column_ids: &[usize]) -> Self {
        Self {
            keys: column_ids
                .iter()
                .map(|&c| (c, SortType::ASCENDING))
                .collect(),
        }
    }

    pub fn keys(&self) -> &[(usize, SortType)] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// 按表宽度构造全空掩码（下标 = column id）
pub fn masks_for(width: usize) -> Vec<ConditionMask> {
    vec![ConditionMask::NONE; width]
}
