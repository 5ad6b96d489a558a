//! 运动层模块
//!
//! 本模块提供运动例程与调度核心之间的会话协议，包括：
//! - 运动会话令牌（协作取消，无线程强杀）
//! - 控制器对象（行走电机对 / 位置舵机）
//! - 全局急停注册表（部分失败容忍）
//!
//! # 协作取消
//!
//! 所有阻塞式运动例程遵循同一协议：`begin()` 领取令牌，每个循环
//! 迭代轮询 `is_active()`，失效即刹停自己的端口并正常返回。新会话
//! 的 `begin()` 和全局急停都通过令牌失效传播，取消延迟等于例程
//! 自身的轮询粒度。

mod controller;
mod error;
mod stop;
mod token;

pub use controller::{Driver, Servo};
pub use error::MotionError;
pub use stop::{StopRegistry, Stoppable};
pub use token::{MotionToken, MotionTokenManager};
