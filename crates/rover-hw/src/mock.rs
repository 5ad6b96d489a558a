//! Mock 执行器总线
//!
//! 用于单元测试和无硬件开发：记录每一次硬件调用，支持按端口
//! 注入故障。构造时返回 `(MockBus, MockBusProbe)` 一对——总线
//! 移交给调度器独占，探针留在测试侧观察调用流。

use crate::{ActuatorBus, DeviceError, DeviceErrorKind, HwError, Output, Port};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// 一次硬件调用的记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusCall {
    Drive { port: Port, value: Output },
    Freeze { port: Port },
    EnablePower { port: Port },
    DisablePower { port: Port },
}

impl BusCall {
    /// 调用针对的端口
    pub fn port(&self) -> Port {
        match *self {
            BusCall::Drive { port, .. }
            | BusCall::Freeze { port }
            | BusCall::EnablePower { port }
            | BusCall::DisablePower { port } => port,
        }
    }
}

/// 每端口聚合统计（探针侧快速断言用）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub drives: u64,
    pub freezes: u64,
    pub last_value: Output,
    pub power_on: bool,
}

#[derive(Default)]
struct SharedState {
    stats: HashMap<Port, PortStats>,
    fail_ports: HashSet<Port>,
}

/// Mock 执行器总线（移交给调度器）
pub struct MockBus {
    calls_tx: Sender<BusCall>,
    shared: Arc<Mutex<SharedState>>,
}

/// Mock 总线探针（留在测试侧）
pub struct MockBusProbe {
    calls_rx: Receiver<BusCall>,
    shared: Arc<Mutex<SharedState>>,
}

impl MockBus {
    /// 创建总线/探针对
    pub fn new() -> (MockBus, MockBusProbe) {
        let (calls_tx, calls_rx) = unbounded();
        let shared = Arc::new(Mutex::new(SharedState::default()));
        (
            MockBus {
                calls_tx,
                shared: shared.clone(),
            },
            MockBusProbe { calls_rx, shared },
        )
    }

    fn record(&self, call: BusCall) -> Result<(), HwError> {
        let mut shared = self.shared.lock();
        if shared.fail_ports.contains(&call.port()) {
            return Err(HwError::Device(DeviceError::new(
                DeviceErrorKind::NoDevice,
                "injected fault",
            )));
        }

        let stats = shared.stats.entry(call.port()).or_default();
        match call {
            BusCall::Drive { value, .. } => {
                stats.drives += 1;
                stats.last_value = value;
            },
            BusCall::Freeze { .. } => {
                stats.freezes += 1;
                stats.last_value = 0;
            },
            BusCall::EnablePower { .. } => stats.power_on = true,
            BusCall::DisablePower { .. } => stats.power_on = false,
        }
        drop(shared);

        // 通道无界，send 只会在探针被丢弃后失败，忽略即可
        let _ = self.calls_tx.send(call);
        Ok(())
    }
}

impl ActuatorBus for MockBus {
    fn drive(&mut self, port: Port, value: Output) -> Result<(), HwError> {
        self.record(BusCall::Drive { port, value })
    }

    fn freeze(&mut self, port: Port) -> Result<(), HwError> {
        self.record(BusCall::Freeze { port })
    }

    fn enable_power(&mut self, port: Port) -> Result<(), HwError> {
        self.record(BusCall::EnablePower { port })
    }

    fn disable_power(&mut self, port: Port) -> Result<(), HwError> {
        self.record(BusCall::DisablePower { port })
    }
}

impl MockBusProbe {
    /// 取出目前积累的所有调用记录
    pub fn drain_calls(&self) -> Vec<BusCall> {
        self.calls_rx.try_iter().collect()
    }

    /// 指定端口的聚合统计
    pub fn stats(&self, port: Port) -> PortStats {
        self.shared.lock().stats.get(&port).copied().unwrap_or_default()
    }

    /// 指定端口最近一次 drive 的输出值（freeze 会清零）
    pub fn last_value(&self, port: Port) -> Output {
        self.stats(port).last_value
    }

    /// 指定端口累计收到的 freeze 次数
    pub fn freeze_count(&self, port: Port) -> u64 {
        self.stats(port).freezes
    }

    /// 指定端口累计收到的 drive 次数
    pub fn drive_count(&self, port: Port) -> u64 {
        self.stats(port).drives
    }

    /// 注入/撤销端口故障
    ///
    /// 故障端口上的任何调用都返回 `DeviceErrorKind::NoDevice`。
    pub fn set_fail(&self, port: Port, fail: bool) {
        let mut shared = self.shared.lock();
        if fail {
            shared.fail_ports.insert(port);
        } else {
            shared.fail_ports.remove(&port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_bus_records_calls() {
        let (mut bus, probe) = MockBus::new();

        bus.drive(Port(1), 800).unwrap();
        bus.drive(Port(1), 900).unwrap();
        bus.freeze(Port(1)).unwrap();

        let calls = probe.drain_calls();
        assert_eq!(
            calls,
            vec![
                BusCall::Drive {
                    port: Port(1),
                    value: 800
                },
                BusCall::Drive {
                    port: Port(1),
                    value: 900
                },
                BusCall::Freeze { port: Port(1) },
            ]
        );

        assert_eq!(probe.drive_count(Port(1)), 2);
        assert_eq!(probe.freeze_count(Port(1)), 1);
        assert_eq!(probe.last_value(Port(1)), 0); // freeze 清零
    }

    #[test]
    fn test_mock_bus_injected_fault() {
        let (mut bus, probe) = MockBus::new();

        probe.set_fail(Port(2), true);
        let err = bus.drive(Port(2), 500).unwrap_err();
        assert!(matches!(err, HwError::Device(ref e) if e.kind == DeviceErrorKind::NoDevice));

        // 故障调用不计入统计，也不进入调用流
        assert_eq!(probe.drive_count(Port(2)), 0);
        assert!(probe.drain_calls().is_empty());

        // 撤销故障后恢复正常
        probe.set_fail(Port(2), false);
        bus.drive(Port(2), 500).unwrap();
        assert_eq!(probe.last_value(Port(2)), 500);
    }

    #[test]
    fn test_mock_bus_power_switch() {
        let (mut bus, probe) = MockBus::new();

        bus.enable_power(Port(4)).unwrap();
        assert!(probe.stats(Port(4)).power_on);

        bus.disable_power(Port(4)).unwrap();
        assert!(!probe.stats(Port(4)).power_on);
    }
}
