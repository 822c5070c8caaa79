use std::collections::HashMap;
use std::sync::Arc;

use cancore_stack::{Layer, LayerReport, LayerStatus, Severity};
use parking_lot::Mutex;

use crate::sim_bus::SimBusReceiver;

/// Shared, ordered record of lifecycle calls, as "name.op" strings
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    /// Take the calls recorded so far, joined by spaces
    pub fn take(&self) -> String {
        let calls = core::mem::take(&mut *self.0.lock());
        calls.join(" ")
    }
}

/// A layer which records its calls, and escalates the status on request
pub struct RecordingLayer {
    name: String,
    log: CallLog,
    failures: Mutex<HashMap<&'static str, Severity>>,
}

impl RecordingLayer {
    pub fn new(name: &str, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: log.clone(),
            failures: Mutex::new(HashMap::new()),
        })
    }

    /// Escalate to `severity` whenever `op` is called
    pub fn fail_on(&self, op: &'static str, severity: Severity) {
        self.failures.lock().insert(op, severity);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    fn call(&self, op: &'static str, status: &LayerStatus) {
        self.log.push(format!("{}.{}", self.name, op));
        let severity = self.failures.lock().get(op).copied();
        let reason = format!("{} {} failed", self.name, op);
        match severity {
            Some(Severity::Warn) => status.warn(&reason),
            Some(Severity::Error) => status.error(&reason),
            Some(Severity::Stale) => status.stale(&reason),
            Some(Severity::Ok) | None => (),
        }
    }
}

impl Layer for RecordingLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn pending(&self, status: &LayerStatus) {
        self.call("pending", status);
    }

    fn read(&self, status: &LayerStatus) {
        self.call("read", status);
    }

    fn write(&self, status: &LayerStatus) {
        self.call("write", status);
    }

    fn diag(&self, report: &mut LayerReport) {
        self.log.push(format!("{}.diag", self.name));
        report.add(self.name.clone(), "ok");
    }

    fn init(&self, status: &LayerStatus) {
        self.call("init", status);
    }

    fn shutdown(&self, status: &LayerStatus) {
        self.call("shutdown", status);
    }

    fn halt(&self, status: &LayerStatus) {
        self.call("halt", status);
    }

    fn recover(&self, status: &LayerStatus) {
        self.call("recover", status);
    }
}

/// Prints every frame seen on the bus when dropped
pub struct BusLogger {
    rx: SimBusReceiver,
}

impl BusLogger {
    pub fn new(rx: SimBusReceiver) -> Self {
        Self { rx }
    }

    pub fn print(&mut self) {
        println!("Bus message history");
        println!("-------------------");
        for msg in self.rx.drain() {
            println!("{} {:02X?}{}", msg.id(), msg.data(), if msg.is_rtr() { " RTR" } else { "" });
        }
    }
}

impl Drop for BusLogger {
    fn drop(&mut self) {
        self.print();
    }
}
