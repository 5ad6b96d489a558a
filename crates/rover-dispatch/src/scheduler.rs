//! 执行器命令仲裁调度器
//!
//! 对外提供 [`ActuatorScheduler`]：命令表 + 后台派发循环。多个
//! 运动例程并发竞争同一物理端口时，由命令表按 epoch 仲裁，后台
//! 循环按节拍把每个端口唯一的活跃命令重发给硬件，并对失联命令
//! 执行看门狗刹停。
//!
//! # 线程模型
//!
//! 每个调度器实例一条后台派发线程（惰性拉起），调用方线程任意。
//! 共享状态只有命令表和总线句柄，各自一把短持锁；派发循环先在
//! 表锁内做一次扫描拿到动作计划，再在表锁外执行硬件 IO，硬件
//! 延迟不会阻塞 `set_command`/`stop` 调用方。
//!
//! # 空闲停机与懒拉起
//!
//! 机器人静止时没有理由为每组执行器空转一条线程：超过
//! `auto_shutdown_timeout_ms` 没有任何命令活动，派发循环自行
//! 退出；下一次 `set_command` 在一个节拍内重新拉起。这是刻意
//! 设计的行为，不是故障。

use crate::config::SchedulerConfig;
use crate::error::DispatchError;
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::table::{CommandTable, SetOutcome};
use parking_lot::Mutex;
use rover_hw::{ActuatorBus, Epoch, Output, Port};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Instant;
use tracing::{debug, error, trace};

/// 调度器共享状态（调用方线程与派发线程共用）
struct Shared<B> {
    /// 硬件总线（独立短锁，任何持有者都只做一次调用级别的工作）
    bus: Mutex<B>,
    /// 命令表 + 退役集 + 循环存活标志（同一把短持锁）
    table: Mutex<CommandTable>,
    /// 性能指标（原子计数器）
    metrics: DispatchMetrics,
    /// 显式关闭标志（空闲停机不设置此标志）
    shutdown: AtomicBool,
    config: SchedulerConfig,
}

/// 执行器命令仲裁调度器
///
/// 概念上系统里有两个实例：一个管连续驱动执行器（行走电机），
/// 一个管位置执行器（舵机），设计完全相同，因此用同一个泛型
/// 类型实例化两次。
///
/// # 仲裁规则
///
/// 同一端口上，数值更大的 epoch 总是压制数值更小的——即使旧
/// 会话刷新得更快。谁"最近开始"，谁说了算。
///
/// # 示例
///
/// ```rust,no_run
/// # use rover_dispatch::ActuatorScheduler;
/// # use rover_hw::{ActuatorBus, Epoch, Port};
/// # fn demo(bus: impl ActuatorBus + Send + 'static) -> Result<(), Box<dyn std::error::Error>> {
/// let sched = ActuatorScheduler::new(bus);
///
/// // 运动例程每个循环迭代刷新一次命令
/// sched.set_command(Port(3), 1400, Epoch(1))?;
///
/// // 例程结束时显式刹停自己的端口
/// sched.stop(Port(3))?;
/// # Ok(())
/// # }
/// ```
pub struct ActuatorScheduler<B: ActuatorBus + 'static> {
    shared: Arc<Shared<B>>,
    /// 派发线程句柄（懒拉起，shutdown 时 join）
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<B: ActuatorBus + Send + 'static> ActuatorScheduler<B> {
    /// 用默认配置创建调度器
    ///
    /// 派发循环不会立即启动，首个 `set_command` 才拉起。
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, SchedulerConfig::default())
    }

    /// 用指定配置创建调度器
    pub fn with_config(bus: B, config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                bus: Mutex::new(bus),
                table: Mutex::new(CommandTable::new()),
                metrics: DispatchMetrics::new(),
                shutdown: AtomicBool::new(false),
                config,
            }),
            worker: Mutex::new(None),
        }
    }

    /// 注册/刷新一条命令
    ///
    /// - `(port, epoch)` 已有命令行：更新目标值和刷新时间
    /// - 端口上存在更旧的活跃 epoch：旧 epoch 立即退役，新行成为
    ///   该端口唯一活跃命令
    /// - 调用方自己的 epoch 已被退役或被更高 epoch 压制：静默
    ///   忽略（配合协作取消，被抢占的例程下次轮询令牌即应退出）
    ///
    /// 副作用：若派发循环已因空闲退出，此调用把它重新拉起。
    ///
    /// # 错误
    ///
    /// - `DispatchError::ShutDown`: 调度器已显式关闭
    pub fn set_command(&self, port: Port, value: Output, epoch: Epoch) -> Result<(), DispatchError> {
        // Acquire: pairs with the Release store in shutdown()
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(DispatchError::ShutDown);
        }

        let need_spawn = {
            let mut table = self.shared.table.lock();
            let now = Instant::now();
            let outcome = table.apply(port, value, epoch, now);
            table.last_activity = now;

            let metrics = &self.shared.metrics;
            match outcome {
                SetOutcome::Inserted { preempted } => {
                    metrics.commands_accepted.fetch_add(1, Ordering::Relaxed);
                    if !preempted.is_empty() {
                        metrics
                            .commands_preempted
                            .fetch_add(preempted.len() as u64, Ordering::Relaxed);
                        debug!("{}: {} preempted {:?}", port, epoch, preempted);
                    }
                },
                SetOutcome::Refreshed => {
                    metrics.commands_refreshed.fetch_add(1, Ordering::Relaxed);
                },
                SetOutcome::IgnoredRetired | SetOutcome::IgnoredSuperseded => {
                    metrics.commands_ignored.fetch_add(1, Ordering::Relaxed);
                    trace!("{}: ignoring stale command from {}", port, epoch);
                },
            }

            // 懒拉起判定与表数据同锁（见 CommandTable::loop_running）
            let need_spawn = !table.loop_running;
            if need_spawn {
                table.loop_running = true;
            }
            need_spawn
        };

        if need_spawn {
            self.spawn_worker();
        }
        Ok(())
    }

    /// 立即刹停一个端口
    ///
    /// 先在总线上直接下发一次 freeze（不经过派发循环，不等节拍），
    /// 再把该端口的所有命令行清零并标记已刹停。硬件调用只持总线
    /// 锁，不跨命令表锁做 IO。
    pub fn stop(&self, port: Port) -> Result<(), DispatchError> {
        let result = {
            let mut bus = self.shared.bus.lock();
            bus.freeze(port)
        };

        {
            let mut table = self.shared.table.lock();
            table.mark_stopped(port);
            table.last_activity = Instant::now();
        }

        match result {
            Ok(()) => {
                self.shared
                    .metrics
                    .freezes_issued
                    .fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(e) => {
                self.shared.metrics.hw_errors.fetch_add(1, Ordering::Relaxed);
                Err(DispatchError::Hw(e))
            },
        }
    }

    /// 刹停命令表中涉及的所有端口
    ///
    /// 单个端口的硬件失败只记录日志，不中断整个扫荡——急停路径
    /// 上一个坏设备不能挡住其余设备。
    pub fn stop_all(&self) {
        let ports = {
            let table = self.shared.table.lock();
            table.ports()
        };

        for port in ports {
            if let Err(e) = self.stop(port) {
                error!("stop_all: failed to stop {}: {}", port, e);
            }
        }
    }

    /// 打开端口供电（舵机类端口）
    pub fn enable_power(&self, port: Port) -> Result<(), DispatchError> {
        let mut bus = self.shared.bus.lock();
        bus.enable_power(port).map_err(|e| {
            self.shared.metrics.hw_errors.fetch_add(1, Ordering::Relaxed);
            DispatchError::Hw(e)
        })
    }

    /// 切断端口供电（舵机类端口）
    pub fn disable_power(&self, port: Port) -> Result<(), DispatchError> {
        let mut bus = self.shared.bus.lock();
        bus.disable_power(port).map_err(|e| {
            self.shared.metrics.hw_errors.fetch_add(1, Ordering::Relaxed);
            DispatchError::Hw(e)
        })
    }

    /// 关闭调度器
    ///
    /// 通知派发循环退出并等待其结束。幂等；关闭后 `set_command`
    /// 返回 [`DispatchError::ShutDown`]，但 `stop`/`stop_all` 仍然
    /// 可用（关机路径上仍可能需要刹停硬件）。
    pub fn shutdown(&self) {
        // Release: all writes before this are visible to the loop that sees true
        self.shared.shutdown.store(true, Ordering::Release);

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.join() {
                error!("dispatch worker panicked: {:?}", e);
            }
        }
    }

    /// 派发循环当前是否存活
    ///
    /// 空闲停机后返回 false，直到下一次 `set_command` 重新拉起。
    pub fn is_dispatching(&self) -> bool {
        self.shared.table.lock().loop_running
    }

    /// 获取性能指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// 当前配置
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// 拉起派发线程
    ///
    /// 调用前提：当前线程已在表锁内把 `loop_running` 翻转为 true，
    /// 因此这里不会产生第二条循环线程。
    fn spawn_worker(&self) {
        let mut worker = self.worker.lock();

        // 清理上一次空闲退出遗留的句柄；未结束的旧线程已经翻转过
        // loop_running 并正在返回途中，丢弃句柄让它自然结束即可
        if let Some(handle) = worker.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }

        self.shared
            .metrics
            .loop_respawns
            .fetch_add(1, Ordering::Relaxed);

        let shared = self.shared.clone();
        *worker = Some(spawn(move || dispatch_loop(shared)));
    }
}

impl<B: ActuatorBus + 'static> Drop for ActuatorScheduler<B> {
    fn drop(&mut self) {
        // Release: see shutdown()
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

/// 派发循环主体
///
/// 每个节拍：
/// 1. 表锁内做一次扫描，拿到本节拍的硬件动作计划（退役行回收、
///    看门狗刹停判定、活跃命令收集），随后立即放锁
/// 2. 表锁外执行硬件 IO；单端口失败记录日志后继续，循环永不
///    因个别端口故障中止，下一个节拍就是天然的重试
/// 3. 空闲超时后自行退出（`loop_running` 在表锁内翻转，与
///    `set_command` 的懒拉起判定串行化）
fn dispatch_loop<B: ActuatorBus>(shared: Arc<Shared<B>>) {
    let tick = shared.config.tick();
    let auto_stop = shared.config.auto_stop();
    let auto_shutdown = shared.config.auto_shutdown();
    let expiry = shared.config.expiry();

    trace!("dispatch loop started (tick {:?})", tick);

    loop {
        // Acquire: if we see true, we must see all writes before shutdown was requested
        if shared.shutdown.load(Ordering::Acquire) {
            shared.table.lock().loop_running = false;
            trace!("dispatch loop: shutdown requested, exiting");
            break;
        }

        // 1. 短锁内扫描命令表
        let plan = {
            let mut table = shared.table.lock();
            let now = Instant::now();

            if table.is_idle(now, auto_shutdown) {
                table.loop_running = false;
                debug!("dispatch loop idle for {:?}, exiting", auto_shutdown);
                break;
            }

            table.sweep(now, auto_stop, expiry)
        };

        if plan.removed > 0 {
            shared
                .metrics
                .rows_expired
                .fetch_add(plan.removed as u64, Ordering::Relaxed);
        }

        // 2. 锁外执行硬件 IO
        if !plan.drives.is_empty() || !plan.freezes.is_empty() {
            let mut bus = shared.bus.lock();

            for &(port, value) in &plan.drives {
                match bus.drive(port, value) {
                    Ok(()) => {
                        shared.metrics.drives_issued.fetch_add(1, Ordering::Relaxed);
                    },
                    Err(e) => {
                        // 单端口失败不中止循环，下一节拍隐式重试
                        error!("dispatch: drive {} failed: {}", port, e);
                        shared.metrics.hw_errors.fetch_add(1, Ordering::Relaxed);
                    },
                }
            }

            for &port in &plan.freezes {
                match bus.freeze(port) {
                    Ok(()) => {
                        shared.metrics.freezes_issued.fetch_add(1, Ordering::Relaxed);
                    },
                    Err(e) => {
                        error!("dispatch: freeze {} failed: {}", port, e);
                        shared.metrics.hw_errors.fetch_add(1, Ordering::Relaxed);
                    },
                }
            }
        }

        // 3. 节拍休眠
        // 使用 spin_sleep 而非 thread::sleep 以获得微秒级精度
        spin_sleep::sleep(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_hw::mock::MockBus;
    use std::thread;
    use std::time::Duration;

    /// 测试用快节奏配置
    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            tick_interval_us: 1_000,
            auto_stop_timeout_ms: 30,
            auto_shutdown_timeout_ms: 120,
            expire_after_ms: 60,
        }
    }

    #[test]
    fn test_set_command_dispatches_repeatedly() {
        let (bus, probe) = MockBus::new();
        let sched = ActuatorScheduler::with_config(bus, fast_config());

        sched.set_command(Port(3), 1400, Epoch(1)).unwrap();

        // 刷新几个周期，模拟运动例程
        for _ in 0..10 {
            thread::sleep(Duration::from_millis(5));
            sched.set_command(Port(3), 1400, Epoch(1)).unwrap();
        }

        // 硬件要求持续刷新：同一命令被重发多次
        assert!(probe.drive_count(Port(3)) >= 5);
        assert_eq!(probe.last_value(Port(3)), 1400);
        sched.shutdown();
    }

    #[test]
    fn test_higher_epoch_wins_on_hardware() {
        let (bus, probe) = MockBus::new();
        let sched = ActuatorScheduler::with_config(bus, fast_config());

        sched.set_command(Port(3), 1400, Epoch(1)).unwrap();
        thread::sleep(Duration::from_millis(10));

        sched.set_command(Port(3), -1400, Epoch(2)).unwrap();
        thread::sleep(Duration::from_millis(10));
        probe.drain_calls();

        // 旧会话继续高频刷新，硬件上仍只能看到新会话的值
        for _ in 0..10 {
            sched.set_command(Port(3), 1400, Epoch(1)).unwrap();
            thread::sleep(Duration::from_millis(2));
        }

        let calls = probe.drain_calls();
        assert!(!calls.is_empty());
        for call in calls {
            if let rover_hw::BusCall::Drive { value, .. } = call {
                assert_eq!(value, -1400, "stale epoch leaked to hardware");
            }
        }
        sched.shutdown();
    }

    #[test]
    fn test_watchdog_single_freeze() {
        let (bus, probe) = MockBus::new();
        let sched = ActuatorScheduler::with_config(bus, fast_config());

        sched.set_command(Port(5), 900, Epoch(1)).unwrap();
        // 停止刷新，等看门狗触发并多跑几个节拍
        thread::sleep(Duration::from_millis(50));

        assert_eq!(probe.freeze_count(Port(5)), 1, "watchdog must freeze exactly once");
        sched.shutdown();
    }

    #[test]
    fn test_stop_issues_immediate_freeze() {
        let (bus, probe) = MockBus::new();
        let sched = ActuatorScheduler::with_config(bus, fast_config());

        sched.set_command(Port(2), 700, Epoch(1)).unwrap();
        thread::sleep(Duration::from_millis(5));

        sched.stop(Port(2)).unwrap();
        let freezes_after_stop = probe.freeze_count(Port(2));
        assert!(freezes_after_stop >= 1);

        // 刹停生效上界是"一个额外节拍"：先让在途节拍落地再观察
        thread::sleep(Duration::from_millis(5));
        probe.drain_calls();
        thread::sleep(Duration::from_millis(10));
        let calls = probe.drain_calls();
        assert!(
            calls
                .iter()
                .all(|c| !matches!(c, rover_hw::BusCall::Drive { .. })),
            "stopped port must not be driven again"
        );
        sched.shutdown();
    }

    #[test]
    fn test_stop_all_survives_port_failure() {
        let (bus, probe) = MockBus::new();
        let sched = ActuatorScheduler::with_config(bus, fast_config());

        sched.set_command(Port(1), 500, Epoch(1)).unwrap();
        sched.set_command(Port(2), 500, Epoch(2)).unwrap();
        sched.set_command(Port(3), 500, Epoch(3)).unwrap();
        thread::sleep(Duration::from_millis(5));

        // port2 故障，扫荡必须继续刹停其余端口
        probe.set_fail(Port(2), true);
        sched.stop_all();

        assert!(probe.freeze_count(Port(1)) >= 1);
        assert_eq!(probe.freeze_count(Port(2)), 0);
        assert!(probe.freeze_count(Port(3)) >= 1);
        assert!(sched.metrics().hw_errors >= 1);
        sched.shutdown();
    }

    #[test]
    fn test_idle_shutdown_and_respawn() {
        let (bus, probe) = MockBus::new();
        let sched = ActuatorScheduler::with_config(bus, fast_config());

        sched.set_command(Port(1), 600, Epoch(1)).unwrap();
        assert!(sched.is_dispatching());

        // 空闲超时（120ms）后循环自行退出
        thread::sleep(Duration::from_millis(250));
        assert!(!sched.is_dispatching());
        let respawns_before = sched.metrics().loop_respawns;

        // 新命令在一个节拍内恢复派发
        probe.drain_calls();
        sched.set_command(Port(1), 600, Epoch(2)).unwrap();
        assert!(sched.is_dispatching());
        thread::sleep(Duration::from_millis(10));
        assert!(probe.drive_count(Port(1)) >= 1);
        assert_eq!(sched.metrics().loop_respawns, respawns_before + 1);
        sched.shutdown();
    }

    #[test]
    fn test_shutdown_idempotent() {
        let (bus, _probe) = MockBus::new();
        let sched = ActuatorScheduler::with_config(bus, fast_config());

        sched.set_command(Port(1), 300, Epoch(1)).unwrap();
        sched.shutdown();
        sched.shutdown(); // 第二次是空操作

        assert!(!sched.is_dispatching());
        assert!(matches!(
            sched.set_command(Port(1), 300, Epoch(2)),
            Err(DispatchError::ShutDown)
        ));
    }

    #[test]
    fn test_stop_usable_after_shutdown() {
        let (bus, probe) = MockBus::new();
        let sched = ActuatorScheduler::with_config(bus, fast_config());

        sched.set_command(Port(4), 800, Epoch(1)).unwrap();
        sched.shutdown();

        // 关机路径上仍可能需要刹停硬件
        sched.stop(Port(4)).unwrap();
        assert!(probe.freeze_count(Port(4)) >= 1);
    }

    #[test]
    fn test_dispatch_loop_survives_hw_errors() {
        let (bus, probe) = MockBus::new();
        let sched = ActuatorScheduler::with_config(bus, fast_config());

        probe.set_fail(Port(7), true);
        sched.set_command(Port(7), 400, Epoch(1)).unwrap();
        sched.set_command(Port(8), 400, Epoch(2)).unwrap();

        for _ in 0..5 {
            thread::sleep(Duration::from_millis(5));
            sched.set_command(Port(7), 400, Epoch(1)).unwrap();
            sched.set_command(Port(8), 400, Epoch(2)).unwrap();
        }

        // 故障端口不影响健康端口的派发
        assert!(probe.drive_count(Port(8)) >= 5);
        assert!(sched.metrics().hw_errors >= 1);
        sched.shutdown();
    }
}
