//! 运动层错误类型定义

use rover_dispatch::DispatchError;
use thiserror::Error;

/// 运动层错误类型
#[derive(Error, Debug)]
pub enum MotionError {
    /// 会话已被更新的运动会话抢占
    ///
    /// 运动例程收到此错误应视作取消信号：停止下发命令，正常返回。
    #[error("Motion session preempted by a newer session")]
    Preempted,

    /// 调度层错误
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}
