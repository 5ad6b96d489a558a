//! 控制器对象
//!
//! 运动例程持有的"控制对象"：[`Driver`] 包一对行走电机端口，
//! [`Servo`] 包一路位置舵机端口。控制器不含任何控制算法——
//! 陀螺仪纠偏、巡线等例程在外部实现，它们只通过这里的令牌和
//! 输出接口与调度核心交互。

use crate::error::MotionError;
use crate::stop::Stoppable;
use crate::token::{MotionToken, MotionTokenManager};
use rover_dispatch::ActuatorScheduler;
use rover_hw::{ActuatorBus, Output, Port};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::error;

/// 行走电机控制器（左右轮一对）
///
/// # 会话协议
///
/// ```rust,no_run
/// # use rover_motion::Driver;
/// # use rover_hw::ActuatorBus;
/// # fn demo<B: ActuatorBus + Send + 'static>(driver: &Driver<B>) -> Result<(), Box<dyn std::error::Error>> {
/// let token = driver.begin();
/// while driver.is_active(&token) {
///     // 计算期望输出（陀螺仪纠偏等）……
///     driver.set_output(&token, 1400, 1400)?;
///     std::thread::sleep(std::time::Duration::from_millis(5));
/// }
/// driver.stop()?;
/// driver.end(&token);
/// # Ok(())
/// # }
/// ```
pub struct Driver<B: ActuatorBus + Send + 'static> {
    name: String,
    sched: Arc<ActuatorScheduler<B>>,
    ports: SmallVec<[Port; 2]>,
    tokens: MotionTokenManager,
}

impl<B: ActuatorBus + Send + 'static> Driver<B> {
    pub fn new(name: impl Into<String>, sched: Arc<ActuatorScheduler<B>>, left: Port, right: Port) -> Self {
        let mut ports = SmallVec::new();
        ports.push(left);
        ports.push(right);
        Self {
            name: name.into(),
            sched,
            ports,
            tokens: MotionTokenManager::new(),
        }
    }

    /// 开启新的运动会话（无条件抢占上一个会话）
    pub fn begin(&self) -> MotionToken {
        self.tokens.begin()
    }

    /// 令牌是否仍然活跃（运动循环每个迭代必须轮询）
    pub fn is_active(&self, token: &MotionToken) -> bool {
        self.tokens.is_active(token)
    }

    /// 结束运动会话（幂等；被抢占后调用是空操作）
    pub fn end(&self, token: &MotionToken) {
        self.tokens.end(token)
    }

    /// 控制的端口（左、右）
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// 下发左右轮输出
    ///
    /// # 错误
    ///
    /// - `MotionError::Preempted`: 令牌已失效，调用方应退出循环
    pub fn set_output(&self, token: &MotionToken, left: Output, right: Output) -> Result<(), MotionError> {
        if !self.tokens.is_active(token) {
            return Err(MotionError::Preempted);
        }
        self.sched.set_command(self.ports[0], left, token.epoch())?;
        self.sched.set_command(self.ports[1], right, token.epoch())?;
        Ok(())
    }

    /// 刹停两个轮子
    ///
    /// 两个端口都会尝试，返回最后一个失败（如有）。
    pub fn stop(&self) -> Result<(), MotionError> {
        let mut last_err = None;
        for &port in &self.ports {
            if let Err(e) = self.sched.stop(port) {
                error!("{}: failed to stop {}: {}", self.name, port, e);
                last_err = Some(e);
            }
        }
        match last_err {
            None => Ok(()),
            Some(e) => Err(e.into()),
        }
    }
}

impl<B: ActuatorBus + Send + 'static> Stoppable for Driver<B> {
    fn name(&self) -> &str {
        &self.name
    }

    /// 急停：先使在途会话的令牌失效，再强制清零两个端口
    fn hard_stop(&self) -> Result<(), MotionError> {
        self.tokens.cancel_active();
        self.stop()
    }
}

/// 位置舵机控制器（单端口）
pub struct Servo<B: ActuatorBus + Send + 'static> {
    name: String,
    sched: Arc<ActuatorScheduler<B>>,
    port: Port,
    tokens: MotionTokenManager,
}

impl<B: ActuatorBus + Send + 'static> Servo<B> {
    pub fn new(name: impl Into<String>, sched: Arc<ActuatorScheduler<B>>, port: Port) -> Self {
        Self {
            name: name.into(),
            sched,
            port,
            tokens: MotionTokenManager::new(),
        }
    }

    pub fn begin(&self) -> MotionToken {
        self.tokens.begin()
    }

    pub fn is_active(&self, token: &MotionToken) -> bool {
        self.tokens.is_active(token)
    }

    pub fn end(&self, token: &MotionToken) {
        self.tokens.end(token)
    }

    pub fn port(&self) -> Port {
        self.port
    }

    /// 下发目标位置
    pub fn set_position(&self, token: &MotionToken, value: Output) -> Result<(), MotionError> {
        if !self.tokens.is_active(token) {
            return Err(MotionError::Preempted);
        }
        self.sched.set_command(self.port, value, token.epoch())?;
        Ok(())
    }

    /// 打开端口供电
    pub fn power_on(&self) -> Result<(), MotionError> {
        self.sched.enable_power(self.port)?;
        Ok(())
    }

    /// 切断端口供电
    pub fn power_off(&self) -> Result<(), MotionError> {
        self.sched.disable_power(self.port)?;
        Ok(())
    }

    /// 刹停舵机
    pub fn stop(&self) -> Result<(), MotionError> {
        self.sched.stop(self.port)?;
        Ok(())
    }
}

impl<B: ActuatorBus + Send + 'static> Stoppable for Servo<B> {
    fn name(&self) -> &str {
        &self.name
    }

    /// 急停：令牌失效、端口清零、切断供电
    ///
    /// 三步都会尝试，返回最后一个失败（如有）。
    fn hard_stop(&self) -> Result<(), MotionError> {
        self.tokens.cancel_active();

        let mut last_err = None;
        if let Err(e) = self.sched.stop(self.port) {
            error!("{}: failed to stop {}: {}", self.name, self.port, e);
            last_err = Some(MotionError::from(e));
        }
        if let Err(e) = self.sched.disable_power(self.port) {
            error!("{}: failed to power off {}: {}", self.name, self.port, e);
            last_err = Some(MotionError::from(e));
        }
        match last_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
