//! # Rover 执行器硬件抽象层
//!
//! 提供统一的执行器总线抽象：上层调度器通过 [`ActuatorBus`] 驱动
//! 电机和舵机端口，而不关心底层是 PWM 控制器、I2C 扩展板还是
//! 测试用的 Mock 总线。

use std::fmt;
use thiserror::Error;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::{BusCall, MockBus, MockBusProbe, PortStats};

/// 执行器端口地址
///
/// 一个 `Port` 标识控制器上的一路电机或舵机通道。
/// 端口编号由硬件布线决定，对本层而言是不透明的。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port(pub u8);

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port{}", self.0)
    }
}

/// 命令槽标识（func_id）
///
/// 每个运动会话在其控制器对象上铸造一个严格递增的 `Epoch`，
/// 作为命令表的次级键。对同一端口，数值更大的 `Epoch` 总是
/// 抢占数值更小的，与刷新频率无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epoch(pub u64);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch#{}", self.0)
    }
}

/// 执行器输出值
///
/// 连续驱动执行器的输出幅值（例如 -1500..=1500 的脉宽偏移），
/// 位置执行器的目标位置。`0` 约定为"停止/回零"。
pub type Output = i32;

/// 硬件抽象层统一错误类型
#[derive(Error, Debug)]
pub enum HwError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] DeviceError),
    #[error("Port not configured: {0}")]
    UnknownPort(Port),
    #[error("Port power is off: {0}")]
    PowerOff(Port),
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    InvalidValue,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            DeviceErrorKind::NoDevice | DeviceErrorKind::AccessDenied | DeviceErrorKind::NotFound
        )
    }
}

impl From<String> for DeviceError {
    fn from(message: String) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for DeviceError {
    fn from(message: &str) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

/// 执行器总线能力接口
///
/// 所有调用都是同步、可失败的。硬件要求持续刷新：`drive` 的输出
/// 只在最近一次调用后的短时间内有效，调度器必须按节拍重复下发。
///
/// # 契约
///
/// - `drive`: 向端口输出连续值（需每个节拍重复下发才能保持有效）
/// - `freeze`: 立即将端口输出清零并刹停
/// - `enable_power` / `disable_power`: 端口供电开关（舵机类端口使用）
///
/// 实现不允许静默失败：任何一次调用失败都必须返回 [`HwError`]。
pub trait ActuatorBus: Send {
    fn drive(&mut self, port: Port, value: Output) -> Result<(), HwError>;
    fn freeze(&mut self, port: Port) -> Result<(), HwError>;
    fn enable_power(&mut self, port: Port) -> Result<(), HwError>;
    fn disable_power(&mut self, port: Port) -> Result<(), HwError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_display() {
        assert_eq!(format!("{}", Port(3)), "port3");
    }

    #[test]
    fn test_epoch_ordering() {
        // Epoch 的数值序决定抢占关系
        assert!(Epoch(2) > Epoch(1));
        assert!(Epoch(100) > Epoch(99));
        assert_eq!(Epoch(7), Epoch(7));
    }

    #[test]
    fn test_device_error_fatal() {
        let fatal = DeviceError::new(DeviceErrorKind::NoDevice, "controller unplugged");
        assert!(fatal.is_fatal());

        let transient = DeviceError::new(DeviceErrorKind::Busy, "bus busy");
        assert!(!transient.is_fatal());
    }

    #[test]
    fn test_hw_error_display() {
        let err = HwError::UnknownPort(Port(9));
        assert_eq!(format!("{}", err), "Port not configured: port9");

        let err = HwError::Device(DeviceError::new(DeviceErrorKind::Backend, "pwm write failed"));
        let msg = format!("{}", err);
        assert!(msg.contains("Backend") && msg.contains("pwm write failed"));
    }

    #[test]
    fn test_device_error_from_str() {
        let err: DeviceError = "boom".into();
        assert_eq!(err.kind, DeviceErrorKind::Unknown);
        assert_eq!(err.message, "boom");
    }
}
