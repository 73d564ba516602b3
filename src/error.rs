use thiserror::Error;

use crate::core::RowKey;
use crate::session::TxnId;

pub type Result<T> = std::result::Result<T, IndexError>;

/// 错误大类：决定由谁处理（调用方 bug / 事务层重试 / 事务中止 / 缺陷）
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    UnsupportedCapability,
    ConstraintViolation,
    LockConflict,
    StorageFailure,
    InternalConsistency,
    Closed,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index {index} does not support {operation}")]
    Unsupported {
        index: String,
        operation: &'static str,
    },

    #[error("unique index {index} violated by duplicate key {key}")]
    ConstraintViolation { index: String, key: String },

    #[error("row {row_key} of table {table} is locked by transaction {holder}")]
    LockConflict {
        table: String,
        row_key: RowKey,
        holder: TxnId,
    },

    #[error("row {row_key} not found in index {index}")]
    RowNotFound { index: String, row_key: RowKey },

    #[error("index {0} is closed")]
    Closed(String),

    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),

    #[error("snapshot codec failure: {0}")]
    Codec(#[from] bincode::Error),

    #[error("internal consistency error: {0}")]
    Internal(String),
}

impl IndexError {
    pub fn unsupported(index: &str, operation: &'static str) -> Self {
        Self::Unsupported {
            index: index.to_string(),
            operation,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported { .. } => ErrorKind::UnsupportedCapability,
            Self::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            Self::LockConflict { .. } => ErrorKind::LockConflict,
            Self::Storage(_) | Self::Codec(_) => ErrorKind::StorageFailure,
            // 删除一条索引里不存在的行：说明上层与索引状态已分叉
            Self::RowNotFound { .. } | Self::Internal(_) => ErrorKind::InternalConsistency,
            Self::Closed(_) => ErrorKind::Closed,
        }
    }

    /// 仅锁冲突可由事务层重试；索引自身从不重试。
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::LockConflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(
            IndexError::unsupported("idx", "distinct scan").kind(),
            ErrorKind::UnsupportedCapability
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        assert_eq!(IndexError::from(io).kind(), ErrorKind::StorageFailure);
        assert_eq!(
            IndexError::RowNotFound {
                index: "idx".into(),
                row_key: RowKey(7)
            }
            .kind(),
            ErrorKind::InternalConsistency
        );
    }

    #[test]
    fn only_lock_conflicts_are_retryable() {
        let e = IndexError::LockConflict {
            table: "T".into(),
            row_key: RowKey(1),
            holder: TxnId(3),
        };
        assert!(e.is_retryable());
        assert!(!IndexError::Closed("idx".into()).is_retryable());
        assert_eq!(
            e.to_string(),
            "row 1 of table T is locked by transaction 3"
        );
    }
}
