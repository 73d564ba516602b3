use std::fmt;

/// 索引生命周期事件，通知挂在索引上的后台驱动
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexEvent {
    Truncated,
    Closed,
    Removed,
}

/// 后台维护驱动（重建、合并等）。
///
/// 索引只负责保存与通知，不调度；驱动自己决定何时运行。
pub trait IndexOperator: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn on_event(&self, _event: IndexEvent) {}

    fn is_running(&self) -> bool;
}
