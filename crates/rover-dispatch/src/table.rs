//! 命令表与退役集
//!
//! 命令表以 `(Port, Epoch)` 为键。不变式：任一端口同一时刻至多
//! 有一个活跃（未退役）epoch；更高的 epoch 注册时，旧 epoch 立即
//! 进入退役集，其命令行留待派发循环懒回收。
//!
//! 本模块只包含纯数据逻辑，不做任何硬件 IO，由调度器在短持锁
//! 区间内调用。

use rover_hw::{Epoch, Output, Port};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// 单条命令行
#[derive(Debug, Clone)]
pub(crate) struct CommandRow {
    pub value: Output,
    pub refreshed_at: Instant,
    /// 当前失效事件的 freeze 是否已下发
    ///
    /// 看门狗对一次失效事件只允许一次 freeze；非零值刷新会复位
    /// 此标志，开始新的生命周期。
    pub stop_issued: bool,
}

/// `apply` 的判定结果，调度器据此更新指标
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SetOutcome {
    /// 插入为该端口唯一活跃行，`preempted` 为被挤入退役集的旧 epoch
    Inserted { preempted: Vec<Epoch> },
    /// 刷新已有命令行
    Refreshed,
    /// 调用方的 epoch 已退役，调用被忽略
    IgnoredRetired,
    /// 端口上已有数值更大的活跃 epoch，调用被忽略
    IgnoredSuperseded,
}

/// 一个节拍的硬件动作计划
#[derive(Debug, Default)]
pub(crate) struct SweepPlan {
    /// 需要重发的活跃命令
    pub drives: Vec<(Port, Output)>,
    /// 本节拍需要下发的刹停（每个失效事件恰好一次）
    pub freezes: Vec<Port>,
    /// 本节拍回收的行数
    pub removed: usize,
}

pub(crate) struct CommandTable {
    rows: HashMap<(Port, Epoch), CommandRow>,
    retired: HashSet<Epoch>,
    /// 最近一次 `set_command`/`stop` 活动时间，空闲停机判定用
    pub last_activity: Instant,
    /// 派发循环存活标志
    ///
    /// 与表数据同锁，使空闲退出判定和懒拉起判定串行化：
    /// 循环在持锁状态下翻转为 false，`set_command` 在持锁状态下
    /// 观察并翻转为 true，不存在命令滞留窗口。
    pub loop_running: bool,
}

impl CommandTable {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
            retired: HashSet::new(),
            last_activity: Instant::now(),
            loop_running: false,
        }
    }

    /// 注册/刷新一条命令
    ///
    /// 仲裁规则：同一端口上数值更大的 epoch 总是胜出，与调用到达
    /// 顺序无关。已退役 epoch 的刷新是静默空操作，防止被抢占的
    /// 调用方靠高频刷新复活。
    pub fn apply(&mut self, port: Port, value: Output, epoch: Epoch, now: Instant) -> SetOutcome {
        if self.retired.contains(&epoch) {
            return SetOutcome::IgnoredRetired;
        }

        if let Some(row) = self.rows.get_mut(&(port, epoch)) {
            row.value = value;
            row.refreshed_at = now;
            if value != 0 {
                row.stop_issued = false;
            }
            return SetOutcome::Refreshed;
        }

        // 收集该端口现存的活跃 epoch
        let live: Vec<Epoch> = self
            .rows
            .keys()
            .filter(|(p, e)| *p == port && !self.retired.contains(e))
            .map(|(_, e)| *e)
            .collect();

        if live.iter().any(|e| *e > epoch) {
            return SetOutcome::IgnoredSuperseded;
        }

        for e in &live {
            self.retired.insert(*e);
        }
        self.rows.insert(
            (port, epoch),
            CommandRow {
                value,
                refreshed_at: now,
                stop_issued: false,
            },
        );
        SetOutcome::Inserted { preempted: live }
    }

    /// 将端口上所有命令行清零并标记已刹停
    ///
    /// 由显式 `stop` 调用：硬件 freeze 已在表外下发，这里只需
    /// 保证派发循环不再重发旧值、也不再重复刹停。
    pub fn mark_stopped(&mut self, port: Port) -> usize {
        let mut touched = 0;
        for ((p, _), row) in self.rows.iter_mut() {
            if *p == port {
                row.value = 0;
                row.stop_issued = true;
                touched += 1;
            }
        }
        touched
    }

    /// 当前命令表涉及的所有端口（去重）
    pub fn ports(&self) -> Vec<Port> {
        let set: HashSet<Port> = self.rows.keys().map(|(p, _)| *p).collect();
        let mut ports: Vec<Port> = set.into_iter().collect();
        ports.sort();
        ports
    }

    /// 一个节拍的表扫描
    ///
    /// - 退役行：跳过硬件调用，立即回收
    /// - 失效行（超过看门狗超时未刷新）或目标值为 0 的行：
    ///   每次失效事件下发恰好一次 freeze；超过过期时间后回收
    /// - 其余活跃行：重发 drive（硬件要求持续刷新）
    pub fn sweep(&mut self, now: Instant, auto_stop: Duration, expiry: Duration) -> SweepPlan {
        let mut plan = SweepPlan::default();
        let mut removals: Vec<(Port, Epoch)> = Vec::new();

        for ((port, epoch), row) in self.rows.iter_mut() {
            if self.retired.contains(epoch) {
                removals.push((*port, *epoch));
                continue;
            }

            let age = now.duration_since(row.refreshed_at);
            if age > auto_stop || row.value == 0 {
                if !row.stop_issued {
                    row.stop_issued = true;
                    plan.freezes.push(*port);
                }
                if age > expiry {
                    removals.push((*port, *epoch));
                }
            } else {
                plan.drives.push((*port, row.value));
            }
        }

        for key in &removals {
            self.rows.remove(key);
        }
        // 退役集只保留仍有命令行引用的 epoch，防止无界增长。
        // 注意同一 epoch 可能横跨多个端口（一个 Driver 会话同时
        // 驱动左右轮），必须等它的所有行都回收后才能清出退役集。
        if !removals.is_empty() {
            let still: HashSet<Epoch> = self.rows.keys().map(|(_, e)| *e).collect();
            self.retired.retain(|e| still.contains(e));
        }
        plan.removed = removals.len();
        plan
    }

    /// 空闲停机判定
    pub fn is_idle(&self, now: Instant, auto_shutdown: Duration) -> bool {
        now.duration_since(self.last_activity) > auto_shutdown
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[cfg(test)]
    pub fn is_retired(&self, epoch: Epoch) -> bool {
        self.retired.contains(&epoch)
    }
}
