//! 调度层模块
//!
//! 本模块提供 Rover 执行器的命令仲裁与派发功能，包括：
//! - 命令表仲裁（同端口高 epoch 压制低 epoch）
//! - 后台派发循环（持续刷新 + 看门狗自动刹停）
//! - 空闲停机与懒拉起
//! - 性能指标（原子计数器）
//!
//! # 使用场景
//!
//! 运动例程不直接触碰硬件端口，而是把期望输出交给调度器仲裁。
//! 大多数用户应该使用 `rover-motion` 提供的控制器对象，而不是
//! 直接调用本层。

mod config;
mod error;
mod metrics;
mod scheduler;
mod table;

pub use config::{ConfigError, SchedulerConfig};
pub use error::DispatchError;
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use scheduler::ActuatorScheduler;
