//! 调度层错误类型定义

use rover_hw::HwError;
use thiserror::Error;

/// 调度层错误类型
#[derive(Error, Debug)]
pub enum DispatchError {
    /// 硬件调用错误
    #[error("Hardware error: {0}")]
    Hw(#[from] HwError),

    /// 调度器已显式关闭
    ///
    /// `shutdown()` 之后不再接受新命令；空闲自动停机不会触发此错误。
    #[error("Scheduler has been shut down")]
    ShutDown,
}
