use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::core::{RowKey, Table};
use crate::error::{IndexError, Result};
use crate::session::TxnId;

/// 行锁表：(table_id, row_key) → 持有事务。
///
/// - 同一事务重入加锁直接成功；
/// - 冲突立即返回 LockConflict（不等待，由事务层决定重试）；
/// - 事务结束时 `release_all` 一次性释放。
#[derive(Debug, Default)]
pub struct RowLockTable {
    owners: DashMap<(u32, RowKey), TxnId>,
    held: DashMap<TxnId, Vec<(u32, RowKey)>>,
}

impl RowLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_lock(&self, table: &Table, key: RowKey, txn: TxnId) -> Result<()> {
        match self.owners.entry((table.id(), key)) {
            Entry::Occupied(e) => {
                let holder = *e.get();
                if holder == txn {
                    Ok(())
                } else {
                    Err(IndexError::LockConflict {
                        table: table.name().to_string(),
                        row_key: key,
                        holder,
                    })
                }
            }
            Entry::Vacant(v) => {
                v.insert(txn);
                self.held.entry(txn).or_default().push((table.id(), key));
                Ok(())
            }
        }
    }

    pub fn is_locked_by(&self, table_id: u32, key: RowKey, txn: TxnId) -> bool {
        self.owners
            .get(&(table_id, key))
            .is_some_and(|holder| *holder == txn)
    }

    pub fn holder(&self, table_id: u32, key: RowKey) -> Option<TxnId> {
        self.owners.get(&(table_id, key)).map(|h| *h)
    }

    /// 提前释放单个行锁；不是该事务持有时返回 false
    pub fn release(&self, table_id: u32, key: RowKey, txn: TxnId) -> bool {
        if self
            .owners
            .remove_if(&(table_id, key), |_, holder| *holder == txn)
            .is_none()
        {
            return false;
        }
        if let Some(mut keys) = self.held.get_mut(&txn) {
            keys.retain(|k| *k != (table_id, key));
        }
        true
    }

    /// 释放事务持有的全部行锁，返回释放数量
    pub fn release_all(&self, txn: TxnId) -> usize {
        let Some((_, keys)) = self.held.remove(&txn) else {
            return 0;
        };
        let mut released = 0;
        for k in keys {
            if self.owners.remove_if(&k, |_, holder| *holder == txn).is_some() {
                released += 1;
            }
        }
        released
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
