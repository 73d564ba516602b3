use std::fmt;

use serde::Serialize;

/// 单个索引的状态快照（诊断/CLI 输出）
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexReport {
    pub index_name: String,
    /// schema.table
    pub table: String,
    /// ordered / hash / row-id
    pub kind: String,
    /// catalog 的 INDEX_TYPE_NAME
    pub type_sql: String,
    /// "列名 A|D"
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary_key: bool,
    pub belongs_to_constraint: bool,
    pub row_count_estimate: u64,
    /// 构建断点
    pub last_indexed_row_key: Option<u64>,
    pub building: bool,
    pub need_rebuild: bool,
    pub closed: bool,
    pub disk_bytes: u64,
    /// 估算内存（字节）
    pub memory_bytes: u64,
    pub comment: Option<String>,
}

impl IndexReport {
    pub fn state(&self) -> &'static str {
        if self.closed {
            "closed"
        } else if self.building {
            "building"
        } else if self.need_rebuild {
            "needs rebuild"
        } else {
            "ready"
        }
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for IndexReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║ {:<48} ║", format!("{} ({})", self.index_name, self.kind))?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║   table:        {:>32} ║", self.table)?;
        writeln!(f, "║   type:         {:>32} ║", self.type_sql)?;
        writeln!(f, "║   columns:      {:>32} ║", self.columns.join(", "))?;
        writeln!(f, "║   state:        {:>32} ║", self.state())?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║   rows (est.):  {:>32} ║", self.row_count_estimate)?;
        let checkpoint = self
            .last_indexed_row_key
            .map_or_else(|| "-".to_string(), |k| k.to_string());
        writeln!(f, "║   checkpoint:   {:>32} ║", checkpoint)?;
        writeln!(f, "║   memory:       {:>32} ║", human_bytes(self.memory_bytes))?;
        writeln!(f, "║   disk:         {:>32} ║", human_bytes(self.disk_bytes))?;
        if let Some(c) = &self.comment {
            writeln!(f, "║   comment:      {:>32} ║", c)?;
        }
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}
