//! Rover 装配器
//!
//! 把调度核心的三块拼到一起：一个连续驱动调度器（行走电机）、
//! 一个位置调度器（舵机）、一个急停注册表。控制器对象统一通过
//! 装配出的 [`Rover`] 创建，创建即注册进急停注册表，杜绝"忘了
//! 注册、急停停不住"这类遗漏。

use rover_dispatch::{ActuatorScheduler, SchedulerConfig};
use rover_hw::{ActuatorBus, Port};
use rover_motion::{Driver, Servo, StopRegistry, Stoppable};
use std::sync::Arc;
use tracing::info;

/// Rover 装配器
///
/// # 示例
///
/// ```rust,no_run
/// # use rover_sdk::RoverBuilder;
/// # use rover_dispatch::SchedulerConfig;
/// # use rover_hw::{ActuatorBus, Port};
/// # fn demo(drive_bus: impl ActuatorBus + Send + 'static, servo_bus: impl ActuatorBus + Send + 'static) {
/// let rover = RoverBuilder::new(drive_bus, servo_bus)
///     .drive_config(SchedulerConfig::default())
///     .build();
///
/// let driver = rover.new_driver("wheels", Port(1), Port(2));
/// let pan = rover.new_servo("pan", Port(5));
/// # }
/// ```
pub struct RoverBuilder<D, S> {
    drive_bus: D,
    servo_bus: S,
    drive_config: SchedulerConfig,
    servo_config: SchedulerConfig,
    use_global_registry: bool,
}

impl<D, S> RoverBuilder<D, S>
where
    D: ActuatorBus + Send + 'static,
    S: ActuatorBus + Send + 'static,
{
    /// 创建装配器（两条总线：连续驱动 + 位置舵机）
    ///
    /// 两个调度器默认使用相同配置；位置执行器的刷新要求通常更
    /// 宽松，需要时用 [`servo_config`](Self::servo_config) 单独调。
    pub fn new(drive_bus: D, servo_bus: S) -> Self {
        Self {
            drive_bus,
            servo_bus,
            drive_config: SchedulerConfig::default(),
            servo_config: SchedulerConfig::default(),
            use_global_registry: false,
        }
    }

    /// 行走电机调度器配置
    pub fn drive_config(mut self, config: SchedulerConfig) -> Self {
        self.drive_config = config;
        self
    }

    /// 舵机调度器配置
    pub fn servo_config(mut self, config: SchedulerConfig) -> Self {
        self.servo_config = config;
        self
    }

    /// 使用进程级全局急停注册表（默认是实例私有的注册表）
    pub fn use_global_registry(mut self) -> Self {
        self.use_global_registry = true;
        self
    }

    /// 完成装配
    pub fn build(self) -> Rover<D, S> {
        let registry = if self.use_global_registry {
            RegistryHandle::Global(StopRegistry::global())
        } else {
            RegistryHandle::Owned(Arc::new(StopRegistry::new()))
        };

        info!("rover core assembled");
        Rover {
            drive: Arc::new(ActuatorScheduler::with_config(self.drive_bus, self.drive_config)),
            servo: Arc::new(ActuatorScheduler::with_config(self.servo_bus, self.servo_config)),
            registry,
        }
    }
}

enum RegistryHandle {
    Global(&'static StopRegistry),
    Owned(Arc<StopRegistry>),
}

impl RegistryHandle {
    fn get(&self) -> &StopRegistry {
        match self {
            RegistryHandle::Global(r) => r,
            RegistryHandle::Owned(r) => r.as_ref(),
        }
    }
}

/// 装配完成的调度核心
///
/// 进程内单例：启动时装配一次，进程退出时 [`shutdown`](Rover::shutdown)。
pub struct Rover<D: ActuatorBus + Send + 'static, S: ActuatorBus + Send + 'static> {
    drive: Arc<ActuatorScheduler<D>>,
    servo: Arc<ActuatorScheduler<S>>,
    registry: RegistryHandle,
}

impl<D, S> Rover<D, S>
where
    D: ActuatorBus + Send + 'static,
    S: ActuatorBus + Send + 'static,
{
    /// 行走电机调度器
    pub fn drive_scheduler(&self) -> &Arc<ActuatorScheduler<D>> {
        &self.drive
    }

    /// 舵机调度器
    pub fn servo_scheduler(&self) -> &Arc<ActuatorScheduler<S>> {
        &self.servo
    }

    /// 急停注册表
    pub fn registry(&self) -> &StopRegistry {
        self.registry.get()
    }

    /// 创建行走电机控制器并注册进急停注册表
    pub fn new_driver(&self, name: impl Into<String>, left: Port, right: Port) -> Arc<Driver<D>> {
        let driver = Arc::new(Driver::new(name, self.drive.clone(), left, right));
        self.registry.get().register(driver.clone() as Arc<dyn Stoppable>);
        driver
    }

    /// 创建舵机控制器并注册进急停注册表
    pub fn new_servo(&self, name: impl Into<String>, port: Port) -> Arc<Servo<S>> {
        let servo = Arc::new(Servo::new(name, self.servo.clone(), port));
        self.registry.get().register(servo.clone() as Arc<dyn Stoppable>);
        servo
    }

    /// 全局急停
    ///
    /// 等价于 `registry().emergency_stop()`，作为最常用的安全入口
    /// 直接挂在顶层对象上。
    pub fn emergency_stop(&self) {
        self.registry.get().emergency_stop();
    }

    /// 关闭两个调度器（进程退出路径；幂等）
    pub fn shutdown(&self) {
        self.drive.shutdown();
        self.servo.shutdown();
    }
}
