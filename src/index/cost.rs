//! 代价估算（planner 用于在候选索引之间选最便宜的一个）。
//!
//! 单位是“大约要读多少行”，只有相对大小有意义。

use crate::core::IndexColumn;
use crate::index::condition::{ConditionMask, SortOrder};

/// 行数估计的固定偏移：避免小表/空表上所有索引代价相同
pub const COST_ROW_OFFSET: u64 = 1000;

/// 无法使用时返回的代价（hash 索引遇到非等值条件）
pub const COST_UNUSABLE: f64 = f64::MAX;

/// 有序（range）索引的代价。
///
/// - 从首列开始逐列累积等值选择度；最后一列也等值且索引 unique → 3
/// - 遇到第一个非等值列：range → rows/4，start → rows/3，end → rows/3，然后停止
/// - 请求的排序与索引前缀列一致时，减去覆盖列数
/// - `masks == None`：没有可用条件，等于全扫描
pub fn range_cost(
    columns: &[IndexColumn],
    unique: bool,
    masks: Option<&[ConditionMask]>,
    row_count: u64,
    sort_order: Option<&SortOrder>,
    row_offset: u64,
) -> f64 {
    let row_count = row_count.saturating_add(row_offset);
    let full = row_count as f64;
    let Some(masks) = masks else {
        return full;
    };
    if masks.iter().any(|m| m.contains(ConditionMask::ALWAYS_FALSE)) {
        return 1.0;
    }

    let mut cost = row_count;
    let mut rows = row_count;
    let mut total_selectivity: u64 = 0;
    for (i, ic) in columns.iter().enumerate() {
        let mask = masks.get(ic.column.id).copied().unwrap_or_default();
        if mask.contains(ConditionMask::EQUALITY) {
            if i + 1 == columns.len() && unique {
                cost = 3;
                break;
            }
            let sel = u64::from(ic.column.selectivity.min(100));
            total_selectivity = 100 - ((100 - total_selectivity) * (100 - sel) / 100);
            let distinct = (row_count * total_selectivity / 100).max(1);
            rows = (row_count / distinct).max(1);
            // 选择度为 0 的列做等值也不会比全扫描更贵
            cost = (2 + rows).min(row_count);
        } else if mask.contains(ConditionMask::RANGE) {
            cost = 2 + rows / 4;
            break;
        } else if mask.contains(ConditionMask::START) {
            cost = 2 + rows / 3;
            break;
        } else if mask.contains(ConditionMask::END) {
            cost = rows / 3;
            break;
        } else {
            break;
        }
    }

    let covering = sort_order.map_or(0, |so| covering_count(columns, so));
    (cost.saturating_sub(covering as u64)).max(1) as f64
}

/// ORDER BY 与索引列前缀逐项比较（列与 sort type 都相同）；全部匹配才返回覆盖数
pub fn covering_count(columns: &[IndexColumn], sort_order: &SortOrder) -> usize {
    let mut covering = 0;
    for (i, &(column_id, sort)) in sort_order.keys().iter().enumerate() {
        let Some(ic) = columns.get(i) else {
            break;
        };
        if ic.column.id != column_id || ic.sort != sort {
            return 0;
        }
        covering += 1;
    }
    covering
}

/// hash 索引：所有索引列都是等值条件才可用
pub fn hash_cost(columns: &[IndexColumn], masks: Option<&[ConditionMask]>, rows_per_key: u64) -> f64 {
    let Some(masks) = masks else {
        return COST_UNUSABLE;
    };
    let all_equal = columns.iter().all(|ic| {
        masks
            .get(ic.column.id)
            .is_some_and(|m| m.contains(ConditionMask::EQUALITY))
    });
    if all_equal {
        (2 + rows_per_key) as f64
    } else {
        COST_UNUSABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, SortType};
    use crate::index::condition::masks_for;

    fn cols() -> Vec<IndexColumn> {
        vec![
            IndexColumn::asc(Column::new(0, "A").with_selectivity(90)),
            IndexColumn::asc(Column::new(1, "B")),
        ]
    }

    #[test]
    fn no_masks_means_full_scan() {
        assert_eq!(range_cost(&cols(), false, None, 9000, None, COST_ROW_OFFSET), 10_000.0);
    }

    #[test]
    fn unique_equality_on_all_columns_is_three() {
        let mut m = masks_for(2);
        m[0] = ConditionMask::EQUALITY;
        m[1] = ConditionMask::EQUALITY;
        assert_eq!(range_cost(&cols(), true, Some(&m), 9000, None, COST_ROW_OFFSET), 3.0);
    }

    #[test]
    fn leading_equality_beats_range_beats_full() {
        let mut eq = masks_for(2);
        eq[0] = ConditionMask::EQUALITY;
        let mut range = masks_for(2);
        range[0] = ConditionMask::RANGE;
        let full = range_cost(&cols(), false, Some(&masks_for(2)), 9000, None, COST_ROW_OFFSET);
        let e = range_cost(&cols(), false, Some(&eq), 9000, None, COST_ROW_OFFSET);
        let r = range_cost(&cols(), false, Some(&range), 9000, None, COST_ROW_OFFSET);
        // 10000 行、选择度 90 → 9000 个不同值 → 每值约 1 行
        assert_eq!(e, 3.0);
        assert_eq!(r, 2502.0);
        assert_eq!(full, 10_000.0);
    }

    #[test]
    fn zero_selectivity_equality_never_exceeds_full_scan() {
        let c = vec![IndexColumn::asc(Column::new(0, "FLAG").with_selectivity(0))];
        let mut eq = masks_for(1);
        eq[0] = ConditionMask::EQUALITY;
        let e = range_cost(&c, false, Some(&eq), 10, None, COST_ROW_OFFSET);
        assert!(e <= range_cost(&c, false, None, 10, None, COST_ROW_OFFSET));
    }

    #[test]
    fn matching_sort_order_lowers_cost() {
        let so = SortOrder::ascending(&[0, 1]);
        let other = SortOrder::new(vec![(0, SortType::DESCENDING)]);
        let base = range_cost(&cols(), false, None, 0, None, COST_ROW_OFFSET);
        let hit = range_cost(&cols(), false, Some(&masks_for(2)), 0, Some(&so), COST_ROW_OFFSET);
        let miss = range_cost(&cols(), false, Some(&masks_for(2)), 0, Some(&other), COST_ROW_OFFSET);
        assert_eq!(hit, base - 2.0);
        assert_eq!(miss, base);
    }

    #[test]
    fn hash_requires_equality_everywhere() {
        let mut m = masks_for(2);
        m[0] = ConditionMask::EQUALITY;
        assert_eq!(hash_cost(&cols(), Some(&m), 0), COST_UNUSABLE);
        m[1] = ConditionMask::EQUALITY;
        assert_eq!(hash_cost(&cols(), Some(&m), 0), 2.0);
        assert_eq!(hash_cost(&cols(), None, 0), COST_UNUSABLE);
    }
}
