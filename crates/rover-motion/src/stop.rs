//! 全局急停注册表
//!
//! 进程内唯一的一个强制停止入口：不管哪些运动例程正在跑，
//! `emergency_stop()` 都会逐个停掉所有注册过的控制器，并把可观察
//! 的停止标志置位，供通信层和暂停逻辑查询。
//!
//! # 并发契约
//!
//! `emergency_stop()` 对在途运动循环是 fire-and-forget 的：它不
//! 等待它们察觉，只保证 (a) 硬件立即被清零，(b) 每个在途循环在
//! 自己的下一次令牌轮询时观察到失效。

use crate::error::MotionError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// 可被急停的控制器能力
///
/// 控制器类型显式实现此 trait，注册表只接受这个接口，合法性在
/// 编译期检查（不做任何运行时类型探测）。
pub trait Stoppable: Send + Sync {
    /// 控制器名称（急停日志定位故障设备用）
    fn name(&self) -> &str;

    /// 强制停止
    ///
    /// 实现必须：使自己的活跃运动令牌失效，并通过调度器把自己的
    /// 端口强制清零；舵机类控制器还应切断端口供电。
    fn hard_stop(&self) -> Result<(), MotionError>;
}

/// 全局急停注册表
///
/// 注册只增不减：正常运行期间不存在反注册。
///
/// # 示例
///
/// ```rust,no_run
/// use rover_motion::StopRegistry;
///
/// // 任意位置触发急停
/// StopRegistry::global().emergency_stop();
/// assert!(StopRegistry::global().is_stopped());
/// ```
pub struct StopRegistry {
    entries: Mutex<Vec<Arc<dyn Stoppable>>>,
    stopped: AtomicBool,
}

impl StopRegistry {
    /// 创建空注册表（测试和多实例场景用；常规代码用 [`global`]）
    ///
    /// [`global`]: StopRegistry::global
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// 进程级全局注册表
    pub fn global() -> &'static StopRegistry {
        static GLOBAL: StopRegistry = StopRegistry::new();
        &GLOBAL
    }

    /// 注册一个控制器
    pub fn register(&self, controller: Arc<dyn Stoppable>) {
        self.entries.lock().push(controller);
    }

    /// 已注册控制器数量
    pub fn registered_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// 急停：强制停止所有注册过的控制器
    ///
    /// 持锁只做快照，逐个调用在锁外进行。每个控制器的失败单独
    /// 捕获并记录，绝不阻止停止其余控制器——这里的部分失败容忍
    /// 是硬性要求，不是优化。停止标志在尝试完所有控制器之后才
    /// 置位。幂等。
    pub fn emergency_stop(&self) {
        let snapshot: Vec<Arc<dyn Stoppable>> = self.entries.lock().clone();
        info!("emergency stop: stopping {} controllers", snapshot.len());

        for controller in &snapshot {
            if let Err(e) = controller.hard_stop() {
                error!(
                    "emergency stop: controller '{}' failed to stop: {}",
                    controller.name(),
                    e
                );
            }
        }

        // Release: controllers are already stopped when the flag reads true
        self.stopped.store(true, Ordering::Release);
    }

    /// 查询停止标志（通信层、暂停逻辑等外部协作方使用）
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// 设置/复位停止标志
    pub fn set_stopped(&self, stopped: bool) {
        self.stopped.store(stopped, Ordering::Release);
    }
}

impl Default for StopRegistry {
    fn default() -> Self {
        Self::new()
    }
}
