//! 调度器性能指标模块
//!
//! 提供零开销的原子计数器，用于监控派发链路的健康状态。
//! 所有计数器都使用原子操作，可以在任何线程安全地读取，
//! 不会引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 调度器实时指标
///
/// # 使用示例
///
/// ```rust
/// use rover_dispatch::DispatchMetrics;
/// use std::sync::Arc;
/// use std::sync::atomic::Ordering;
///
/// let metrics = Arc::new(DispatchMetrics::default());
///
/// // 在派发线程中更新指标
/// metrics.drives_issued.fetch_add(1, Ordering::Relaxed);
///
/// // 在主线程中读取快照
/// let snapshot = metrics.snapshot();
/// println!("Drives issued: {}", snapshot.drives_issued);
/// ```
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// 接受的新命令数（插入命令表）
    pub commands_accepted: AtomicU64,

    /// 命令刷新次数（已有命令行被更新）
    pub commands_refreshed: AtomicU64,

    /// 被新 epoch 抢占的命令数
    ///
    /// 如果这个值快速增长，说明多个运动例程正在激烈争夺同一端口。
    pub commands_preempted: AtomicU64,

    /// 被忽略的过期命令数（已退役或被更高 epoch 压制的调用方）
    pub commands_ignored: AtomicU64,

    /// 下发的 drive 调用数
    pub drives_issued: AtomicU64,

    /// 下发的 freeze 调用数（显式 stop + 看门狗刹停）
    pub freezes_issued: AtomicU64,

    /// 命令表回收的过期行数
    pub rows_expired: AtomicU64,

    /// 硬件调用失败次数
    pub hw_errors: AtomicU64,

    /// 后台循环拉起次数（首次启动 + 空闲停机后的重新拉起）
    pub loop_respawns: AtomicU64,
}

impl DispatchMetrics {
    /// 创建新的指标实例（所有计数器初始化为 0）
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取人类可读的指标快照
    ///
    /// 快照是原子读取的，不同计数器之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_accepted: self.commands_accepted.load(Ordering::Relaxed),
            commands_refreshed: self.commands_refreshed.load(Ordering::Relaxed),
            commands_preempted: self.commands_preempted.load(Ordering::Relaxed),
            commands_ignored: self.commands_ignored.load(Ordering::Relaxed),
            drives_issued: self.drives_issued.load(Ordering::Relaxed),
            freezes_issued: self.freezes_issued.load(Ordering::Relaxed),
            rows_expired: self.rows_expired.load(Ordering::Relaxed),
            hw_errors: self.hw_errors.load(Ordering::Relaxed),
            loop_respawns: self.loop_respawns.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器（用于性能测试）
    pub fn reset(&self) {
        self.commands_accepted.store(0, Ordering::Relaxed);
        self.commands_refreshed.store(0, Ordering::Relaxed);
        self.commands_preempted.store(0, Ordering::Relaxed);
        self.commands_ignored.store(0, Ordering::Relaxed);
        self.drives_issued.store(0, Ordering::Relaxed);
        self.freezes_issued.store(0, Ordering::Relaxed);
        self.rows_expired.store(0, Ordering::Relaxed);
        self.hw_errors.store(0, Ordering::Relaxed);
        self.loop_respawns.store(0, Ordering::Relaxed);
    }
}

/// 指标快照（不可变，用于读取）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// 接受的新命令数
    pub commands_accepted: u64,
    /// 命令刷新次数
    pub commands_refreshed: u64,
    /// 被抢占的命令数
    pub commands_preempted: u64,
    /// 被忽略的过期命令数
    pub commands_ignored: u64,
    /// 下发的 drive 调用数
    pub drives_issued: u64,
    /// 下发的 freeze 调用数
    pub freezes_issued: u64,
    /// 回收的过期行数
    pub rows_expired: u64,
    /// 硬件调用失败次数
    pub hw_errors: u64,
    /// 后台循环拉起次数
    pub loop_respawns: u64,
}

impl MetricsSnapshot {
    /// 计算硬件调用失败率（百分比）
    ///
    /// 返回 0.0 到 100.0 之间的值。没有任何硬件调用时返回 0.0。
    pub fn hw_error_rate(&self) -> f64 {
        let total = self.drives_issued + self.freezes_issued + self.hw_errors;
        if total == 0 {
            return 0.0;
        }
        (self.hw_errors as f64 / total as f64) * 100.0
    }
}
