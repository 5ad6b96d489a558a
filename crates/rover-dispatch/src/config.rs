//! 调度器配置
//!
//! 看门狗与空闲停机的时间常量依赖具体硬件的刷新率，经验值
//! 并不通用，因此全部暴露为可调参数，支持 TOML 文件加载/保存。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// 调度器配置
///
/// # Example
///
/// ```
/// use rover_dispatch::SchedulerConfig;
///
/// // 默认配置（2ms 节拍，120ms 看门狗）
/// let config = SchedulerConfig::default();
///
/// // 自定义配置
/// let config = SchedulerConfig {
///     tick_interval_us: 1_000,
///     auto_stop_timeout_ms: 50,
///     ..SchedulerConfig::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 派发节拍（微秒）
    ///
    /// 后台循环每个节拍重发一次活跃命令。硬件要求持续刷新，
    /// 节拍过长会导致输出失效，过短则空耗 CPU。
    pub tick_interval_us: u64,

    /// 看门狗自动刹停超时（毫秒）
    ///
    /// 活跃命令超过此时间未被刷新，视为其控制方已停止工作，
    /// 下发一次 freeze（且仅一次）。
    pub auto_stop_timeout_ms: u64,

    /// 空闲停机超时（毫秒）
    ///
    /// 超过此时间没有任何 `set_command`/`stop` 活动，后台循环
    /// 自行退出；下一次 `set_command` 会在一个节拍内重新拉起。
    pub auto_shutdown_timeout_ms: u64,

    /// 命令行过期回收时间（毫秒）
    ///
    /// 已刹停或已被抢占的命令行超过此时间后从命令表中移除。
    /// 必须不小于 `auto_stop_timeout_ms`，否则行会在刹停前消失。
    pub expire_after_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_us: 2_000,
            auto_stop_timeout_ms: 120,
            auto_shutdown_timeout_ms: 5_000,
            expire_after_ms: 1_000,
        }
    }
}

impl SchedulerConfig {
    /// 派发节拍
    pub fn tick(&self) -> Duration {
        Duration::from_micros(self.tick_interval_us)
    }

    /// 看门狗超时
    pub fn auto_stop(&self) -> Duration {
        Duration::from_millis(self.auto_stop_timeout_ms)
    }

    /// 空闲停机超时
    pub fn auto_shutdown(&self) -> Duration {
        Duration::from_millis(self.auto_shutdown_timeout_ms)
    }

    /// 命令行过期时间
    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expire_after_ms)
    }

    /// 从 TOML 文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// 配置加载/保存错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    Encode(#[from] toml::ser::Error),
}
