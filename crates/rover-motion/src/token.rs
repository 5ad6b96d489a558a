//! 运动会话令牌（协作取消）
//!
//! 每个阻塞式运动例程开始时调用 `begin()` 领取令牌，循环的每个
//! 迭代轮询 `is_active()`：一旦同一控制器上有人开启了更新的会话，
//! 旧令牌立即失效，旧例程应停止下发命令、刹停自己的端口后正常
//! 返回。取消严格协作式，没有任何线程强杀机制；取消延迟等于
//! 轮询例程自身的循环粒度。
//!
//! # 线程安全
//!
//! 活跃令牌槽是一个原子字段（0 表示无活跃令牌，epoch 从 1 起
//! 铸造），`begin`/`is_active`/`end` 全部无锁。

use rover_hw::Epoch;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// 全局 epoch 铸造源
///
/// 进程内唯一的严格递增计数器，被所有控制器的令牌管理器共用。
/// 单控制器内令牌因此严格递增；跨控制器争夺同一端口时，数值序
/// 也保持确定（后开始的会话 epoch 一定更大）。
static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// 控制器 id 分配源
static NEXT_CONTROLLER_ID: AtomicU32 = AtomicU32::new(1);

/// 运动会话令牌
///
/// 持有者是一段正在执行的运动例程。令牌同时充当调度器命令表的
/// epoch：`set_command` 用它仲裁同端口冲突。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionToken {
    controller: u32,
    epoch: Epoch,
}

impl MotionToken {
    /// 令牌对应的命令槽 epoch
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// 签发令牌的控制器 id
    pub fn controller_id(&self) -> u32 {
        self.controller
    }
}

/// 每控制器一个的令牌管理器
///
/// 不变式：任一时刻至多一个活跃令牌。`begin()` 无条件抢占
/// 在途运动——新的"转向"命令就是这样静默取消同一轮对上未完成
/// 的"直行"的。
#[derive(Debug)]
pub struct MotionTokenManager {
    id: u32,
    /// 活跃令牌的 epoch 值；0 表示没有活跃令牌
    active: AtomicU64,
}

impl MotionTokenManager {
    pub fn new() -> Self {
        Self {
            id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
            active: AtomicU64::new(0),
        }
    }

    /// 开启新的运动会话
    ///
    /// 铸造严格递增的令牌并设为活跃，无条件抢占上一个会话。
    /// O(1)，无锁。
    pub fn begin(&self) -> MotionToken {
        let value = NEXT_EPOCH.fetch_add(1, Ordering::Relaxed);
        // Release: 看到新活跃值的轮询方同时能看到会话开始前的写入
        self.active.store(value, Ordering::Release);
        MotionToken {
            controller: self.id,
            epoch: Epoch(value),
        }
    }

    /// 令牌是否仍是本控制器的活跃令牌
    ///
    /// 其他控制器签发的令牌、或从未签发过的令牌，一律返回 false
    /// （按"已被抢占/未知"处理，不是错误）。
    pub fn is_active(&self, token: &MotionToken) -> bool {
        token.controller == self.id && self.active.load(Ordering::Acquire) == token.epoch.0
    }

    /// 结束运动会话
    ///
    /// 仅当令牌仍是活跃令牌时清除；被抢占后调用是空操作。幂等。
    pub fn end(&self, token: &MotionToken) {
        if token.controller != self.id {
            return;
        }
        let _ = self
            .active
            .compare_exchange(token.epoch.0, 0, Ordering::AcqRel, Ordering::Relaxed);
    }

    /// 使当前活跃令牌立即失效（急停路径）
    ///
    /// 所有在途运动例程在下一次 `is_active` 轮询时观察到失效。
    pub fn cancel_active(&self) {
        self.active.store(0, Ordering::Release);
    }

    /// 控制器 id
    pub fn controller_id(&self) -> u32 {
        self.id
    }
}

impl Default for MotionTokenManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_tokens_strictly_increasing() {
        let mgr = MotionTokenManager::new();
        let t1 = mgr.begin();
        let t2 = mgr.begin();
        let t3 = mgr.begin();

        assert!(t1.epoch() < t2.epoch());
        assert!(t2.epoch() < t3.epoch());
    }

    #[test]
    fn test_begin_preempts_previous() {
        let mgr = MotionTokenManager::new();

        let t1 = mgr.begin();
        assert!(mgr.is_active(&t1));

        // 第二次 begin 后，旧令牌在下一次轮询立即观察到失效
        let t2 = mgr.begin();
        assert!(!mgr.is_active(&t1));
        assert!(mgr.is_active(&t2));
    }

    #[test]
    fn test_end_is_idempotent() {
        let mgr = MotionTokenManager::new();

        let t1 = mgr.begin();
        mgr.end(&t1);
        assert!(!mgr.is_active(&t1));
        mgr.end(&t1); // 第二次是空操作

        // 被抢占后 end 不得误伤新会话
        let t2 = mgr.begin();
        let t3 = mgr.begin();
        mgr.end(&t2);
        assert!(mgr.is_active(&t3));
    }

    #[test]
    fn test_foreign_token_is_inactive() {
        let a = MotionTokenManager::new();
        let b = MotionTokenManager::new();

        let ta = a.begin();
        // 别的控制器签发的令牌按"未知"处理，返回 false 而非报错
        assert!(!b.is_active(&ta));
    }

    #[test]
    fn test_cancel_active() {
        let mgr = MotionTokenManager::new();
        let t = mgr.begin();

        mgr.cancel_active();
        assert!(!mgr.is_active(&t));
    }

    #[test]
    fn test_concurrent_begin_unique_epochs() {
        let mgr = Arc::new(MotionTokenManager::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let m = mgr.clone();
            handles.push(thread::spawn(move || {
                (0..100).map(|_| m.begin().epoch().0).collect::<Vec<u64>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for v in handle.join().unwrap() {
                // 任何两次 begin 都不会返回相同令牌
                assert!(seen.insert(v), "duplicate epoch {v}");
            }
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// 单控制器内任意长度的 begin 序列都严格递增
            #[test]
            fn prop_begin_sequence_strictly_increasing(n in 1usize..200) {
                let mgr = MotionTokenManager::new();
                let mut prev = mgr.begin().epoch();
                for _ in 0..n {
                    let next = mgr.begin().epoch();
                    prop_assert!(next > prev);
                    prev = next;
                }
            }

            /// 任意时刻至多一个令牌是活跃的
            #[test]
            fn prop_single_active_token(n in 2usize..50) {
                let mgr = MotionTokenManager::new();
                let tokens: Vec<_> = (0..n).map(|_| mgr.begin()).collect();
                let active: Vec<_> = tokens.iter().filter(|t| mgr.is_active(t)).collect();
                prop_assert_eq!(active.len(), 1);
                prop_assert_eq!(active[0], tokens.last().unwrap());
            }
        }
    }
}
