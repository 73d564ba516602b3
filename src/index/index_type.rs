use serde::{Deserialize, Serialize};

/// 索引能力/标志描述（建索引时确定，之后不变）
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexType {
    pub unique: bool,
    pub primary_key: bool,
    pub hash: bool,
    /// 表扫描索引：无序，只能全表遍历
    pub scan: bool,
    pub belongs_to_constraint: bool,
    pub persistent: bool,
}

impl IndexType {
    pub fn primary_key(persistent: bool, hash: bool) -> Self {
        Self {
            unique: true,
            primary_key: true,
            hash,
            persistent,
            ..Self::default()
        }
    }

    pub fn unique(persistent: bool, hash: bool) -> Self {
        Self {
            unique: true,
            hash,
            persistent,
            ..Self::default()
        }
    }

    pub fn non_unique(persistent: bool, hash: bool) -> Self {
        Self {
            hash,
            persistent,
            ..Self::default()
        }
    }

    pub fn scan(persistent: bool) -> Self {
        Self {
            scan: true,
            persistent,
            ..Self::default()
        }
    }

    pub fn with_constraint(mut self) -> Self {
        self.belongs_to_constraint = true;
        self
    }

    /// catalog 中的 INDEX_TYPE_NAME
    pub fn sql(&self) -> &'static str {
        match (self.primary_key, self.unique, self.hash) {
            (true, _, false) => "PRIMARY KEY",
            (true, _, true) => "PRIMARY KEY HASH",
            (false, true, false) => "UNIQUE INDEX",
            (false, true, true) => "UNIQUE HASH INDEX",
            (false, false, true) => "HASH INDEX",
            (false, false, false) => "INDEX",
        }
    }
}
