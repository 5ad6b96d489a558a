//! # Rover SDK
//!
//! Rover 板载控制器"执行器命令仲裁与安全停止"核心的统一入口。
//!
//! 分层结构（自底向上）：
//! - [`hw`]: 硬件能力抽象（[`ActuatorBus`](rover_hw::ActuatorBus) trait）
//! - [`dispatch`]: 命令仲裁调度器（命令表 + 后台派发循环 + 看门狗）
//! - [`motion`]: 运动会话令牌、控制器对象、全局急停注册表
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use rover_sdk::prelude::*;
//! # fn demo(drive_bus: impl rover_hw::ActuatorBus + Send + 'static,
//! #         servo_bus: impl rover_hw::ActuatorBus + Send + 'static) -> Result<(), Box<dyn std::error::Error>> {
//!
//! rover_sdk::init_logging();
//!
//! let rover = RoverBuilder::new(drive_bus, servo_bus).build();
//! let wheels = rover.new_driver("wheels", Port(1), Port(2));
//!
//! // 运动例程：领令牌、循环轮询、刷新命令
//! let token = wheels.begin();
//! while wheels.is_active(&token) {
//!     wheels.set_output(&token, 1400, 1400)?;
//!     std::thread::sleep(std::time::Duration::from_millis(5));
//! }
//! wheels.stop()?;
//! wheels.end(&token);
//! # Ok(())
//! # }
//! ```

pub use rover_dispatch as dispatch;
pub use rover_hw as hw;
pub use rover_motion as motion;

mod builder;

pub use builder::{Rover, RoverBuilder};

/// 初始化日志（`RUST_LOG` 环境变量过滤）
///
/// 重复调用是空操作，便于在测试里随意调用。
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// 常用类型一站式导入
pub mod prelude {
    pub use crate::builder::{Rover, RoverBuilder};
    pub use rover_dispatch::{ActuatorScheduler, DispatchError, SchedulerConfig};
    pub use rover_hw::{ActuatorBus, Epoch, HwError, Output, Port};
    pub use rover_motion::{
        Driver, MotionError, MotionToken, MotionTokenManager, Servo, StopRegistry, Stoppable,
    };
}
