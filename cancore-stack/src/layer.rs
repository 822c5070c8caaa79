//! Layered lifecycle state machine
//!
//! A [`Layer`] is any component with the standard lifecycle: `init`, `read`, `write`, `halt`,
//! `recover`, `shutdown`, plus `pending` and `diag` for inspection. Operations do not return a
//! result; they escalate the [`LayerStatus`] they are given, and callers inspect its severity
//! afterwards. A layer must never panic out of these calls, any internal failure has to be
//! converted to an ERROR status.
//!
//! Layers are composed in two ways:
//!
//! - [`LayerStack`]: ordered. Later layers depend on earlier ones, so bring-up walks forward,
//!   stops at the first failure and rolls back what was started, in reverse.
//! - [`LayerGroup`]: unordered. Every member is always called, and a failed bring-up rolls back
//!   all members.
//!
//! Sub-layers are held as `Arc`s, since the same layer may take part in more than one composition.

use std::sync::Arc;

use defmt_or_log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::status::{LayerReport, LayerStatus, Severity};

/// The lifecycle contract shared by every protocol component
pub trait Layer: Send + Sync {
    /// Name of the layer, used in logs and diagnostics
    fn name(&self) -> &str;
    /// Report on an operation which is still in progress
    fn pending(&self, status: &LayerStatus);
    /// Bring received state up to date
    fn read(&self, status: &LayerStatus);
    /// Push outgoing state
    fn write(&self, status: &LayerStatus);
    /// Collect diagnostics
    fn diag(&self, report: &mut LayerReport);
    /// Bring the layer up
    fn init(&self, status: &LayerStatus);
    /// Tear the layer down
    fn shutdown(&self, status: &LayerStatus);
    /// Quiesce the layer after a fault, without tearing it down
    fn halt(&self, status: &LayerStatus);
    /// Resume a halted layer
    fn recover(&self, status: &LayerStatus);
}

type LayerFn<T> = fn(&T, &LayerStatus);

/// Call `func` on each layer in `layers`, in order
///
/// If the status was within `bound` when the walk started, the walk stops at the first layer
/// which pushes it past `bound`, and the position of that layer is returned. Otherwise every
/// layer is called and `None` is returned.
fn call_bounded<'a, T, I>(
    func: LayerFn<T>,
    status: &LayerStatus,
    layers: I,
    bound: Severity,
) -> Option<usize>
where
    T: Layer + ?Sized + 'a,
    I: IntoIterator<Item = &'a Arc<T>>,
{
    let okay_on_start = status.bounded(bound);
    for (i, layer) in layers.into_iter().enumerate() {
        func(&**layer, status);
        if okay_on_start && !status.bounded(bound) {
            return Some(i);
        }
    }
    None
}

/// Call `func` on each layer, regardless of the outcome
fn call_all<'a, T, I>(func: LayerFn<T>, status: &LayerStatus, layers: I)
where
    T: Layer + ?Sized + 'a,
    I: IntoIterator<Item = &'a Arc<T>>,
{
    for layer in layers {
        func(&**layer, status);
    }
}

/// An ordered composition of layers
///
/// The stack records a *boundary*: the position of the last layer reached by bring-up. A fully
/// initialized stack has its boundary at the end. After a failed `init` the boundary rests on the
/// layer which failed, and `read`, `write` and `diag` only visit the layers before it. `shutdown`
/// resets the boundary to the start.
///
/// The boundary has its own lock, separate from the one protecting the list of layers, so that it
/// can be inspected while a long read or write pass is running.
pub struct LayerStack {
    name: String,
    layers: RwLock<Vec<Arc<dyn Layer>>>,
    run_end: Mutex<usize>,
}

impl core::fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LayerStack")
            .field("name", &self.name)
            .field("layers", &self.len())
            .field("boundary", &self.boundary())
            .finish()
    }
}

impl LayerStack {
    /// Create an empty stack
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: RwLock::new(Vec::new()),
            run_end: Mutex::new(0),
        }
    }

    /// Append a layer on top of the stack
    pub fn add(&self, layer: Arc<dyn Layer>) {
        self.layers.write().push(layer);
    }

    /// Remove all layers
    pub fn clear(&self) {
        self.layers.write().clear();
        *self.run_end.lock() = 0;
    }

    /// Number of layers in the stack
    pub fn len(&self) -> usize {
        self.layers.read().len()
    }

    /// Returns true if the stack has no layers
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of the last layer reached by bring-up
    pub fn boundary(&self) -> usize {
        *self.run_end.lock()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Layer>> {
        self.layers.read().clone()
    }

    fn set_boundary(&self, pos: usize) {
        *self.run_end.lock() = pos;
    }

    fn bringup(&self, func: LayerFn<dyn Layer>, rollback: LayerFn<dyn Layer>, status: &LayerStatus) {
        let layers = self.snapshot();
        self.set_boundary(0);

        let mut pos = 0;
        while pos < layers.len() {
            self.set_boundary(pos);
            func(&*layers[pos], status);
            if !status.bounded(Severity::Warn) {
                break;
            }
            pos += 1;
        }

        if pos != layers.len() {
            warn!(
                "{}: bring-up stopped at layer '{}': {}",
                self.name,
                layers[pos].name(),
                status.reason()
            );
            let omit = LayerStatus::new();
            call_all(rollback, &omit, layers[..pos].iter().rev());
        }
        self.set_boundary(pos);
    }
}

impl Layer for LayerStack {
    fn name(&self) -> &str {
        &self.name
    }

    fn pending(&self, status: &LayerStatus) {
        let layers = self.snapshot();
        let end = self.boundary();
        if let Some(layer) = layers.get(end) {
            layer.pending(status);
        }
    }

    fn read(&self, status: &LayerStatus) {
        let layers = self.snapshot();
        let end = self.boundary().min(layers.len());
        let visited = &layers[..end];

        if let Some(failed) = call_bounded(Layer::read, status, visited, Severity::Warn) {
            debug!("{}: read failed at layer '{}'", self.name, visited[failed].name());
            let omit = LayerStatus::new();
            call_all(Layer::halt, &omit, visited[..=failed].iter().rev());
            omit.error("");
            call_all(Layer::read, &omit, &visited[failed + 1..]);
        }
    }

    fn write(&self, status: &LayerStatus) {
        let layers = self.snapshot();
        let end = self.boundary().min(layers.len());
        let visited = &layers[..end];

        let failed = call_bounded(Layer::write, status, visited.iter().rev(), Severity::Warn);
        if let Some(failed) = failed {
            // `failed` counts from the top of the visited range
            let failed = end - 1 - failed;
            debug!("{}: write failed at layer '{}'", self.name, visited[failed].name());
            let omit = LayerStatus::new();
            call_all(Layer::halt, &omit, &visited[failed..]);
            omit.error("");
            call_all(Layer::write, &omit, visited[..failed].iter().rev());
        }
    }

    fn diag(&self, report: &mut LayerReport) {
        let layers = self.snapshot();
        let end = self.boundary().min(layers.len());
        for layer in &layers[..end] {
            layer.diag(report);
        }
    }

    fn init(&self, status: &LayerStatus) {
        self.bringup(Layer::init, Layer::shutdown, status);
    }

    fn shutdown(&self, status: &LayerStatus) {
        self.set_boundary(0);
        call_all(Layer::shutdown, status, self.snapshot().iter().rev());
    }

    fn halt(&self, status: &LayerStatus) {
        call_all(Layer::halt, status, self.snapshot().iter().rev());
    }

    fn recover(&self, status: &LayerStatus) {
        self.bringup(Layer::recover, Layer::halt, status);
    }
}

/// An unordered composition of same-typed layers
///
/// Every operation is applied to every member. When `read` or `write` fails on one member, all
/// members are halted, and the members after the failed one still get their call with an ERROR
/// status so that their diagnostics stay current. When `init` or `recover` fails, all members are
/// shut down or halted respectively.
///
/// Groups created with [`LayerGroup::without_diag`] report nothing from `diag`, which keeps a
/// host's diagnostic output free of layers which are only present for their lifecycle role.
pub struct LayerGroup<T: Layer + ?Sized = dyn Layer> {
    name: String,
    layers: RwLock<Vec<Arc<T>>>,
    report_diag: bool,
}

impl<T: Layer + ?Sized> core::fmt::Debug for LayerGroup<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LayerGroup")
            .field("name", &self.name)
            .field("layers", &self.len())
            .field("report_diag", &self.report_diag)
            .finish()
    }
}

impl<T: Layer + ?Sized> LayerGroup<T> {
    /// Create an empty group
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: RwLock::new(Vec::new()),
            report_diag: true,
        }
    }

    /// Create an empty group which never reports diagnostics
    pub fn without_diag(name: impl Into<String>) -> Self {
        Self {
            report_diag: false,
            ..Self::new(name)
        }
    }

    /// Add a member
    pub fn add(&self, layer: Arc<T>) {
        self.layers.write().push(layer);
    }

    /// Remove all members
    pub fn clear(&self) {
        self.layers.write().clear();
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.layers.read().len()
    }

    /// Returns true if the group has no members
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<T>> {
        self.layers.read().clone()
    }

    fn cycle(&self, func: LayerFn<T>, status: &LayerStatus) {
        let layers = self.snapshot();
        if let Some(failed) = call_bounded(func, status, &layers, Severity::Warn) {
            debug!("{}: member '{}' failed", self.name, layers[failed].name());
            let omit = LayerStatus::new();
            call_all(Layer::halt, &omit, &layers);
            omit.error("");
            call_all(func, &omit, &layers[failed + 1..]);
        }
    }

    fn bringup(&self, func: LayerFn<T>, rollback: LayerFn<T>, status: &LayerStatus) {
        let layers = self.snapshot();
        let okay_on_start = status.bounded(Severity::Warn);
        call_all(func, status, &layers);
        if okay_on_start && !status.bounded(Severity::Warn) {
            warn!("{}: bring-up failed: {}", self.name, status.reason());
            let omit = LayerStatus::new();
            call_all(rollback, &omit, &layers);
        }
    }
}

impl<T: Layer + ?Sized> Layer for LayerGroup<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn pending(&self, status: &LayerStatus) {
        call_all(Layer::pending, status, &self.snapshot());
    }

    fn read(&self, status: &LayerStatus) {
        self.cycle(Layer::read, status);
    }

    fn write(&self, status: &LayerStatus) {
        self.cycle(Layer::write, status);
    }

    fn diag(&self, report: &mut LayerReport) {
        if !self.report_diag {
            return;
        }
        for layer in self.snapshot() {
            layer.diag(report);
        }
    }

    fn init(&self, status: &LayerStatus) {
        self.bringup(Layer::init, Layer::shutdown, status);
    }

    fn shutdown(&self, status: &LayerStatus) {
        call_all(Layer::shutdown, status, &self.snapshot());
    }

    fn halt(&self, status: &LayerStatus) {
        call_all(Layer::halt, status, &self.snapshot());
    }

    fn recover(&self, status: &LayerStatus) {
        self.bringup(Layer::recover, Layer::halt, status);
    }
}

/// A diagnostics-only collection of layers
///
/// Collects `diag` from each member into one report, without taking part in the lifecycle. A host
/// typically builds one per device, adding the layers whose health should appear in its summary.
pub struct DiagGroup<T: Layer + ?Sized = dyn Layer> {
    layers: RwLock<Vec<Arc<T>>>,
}

impl<T: Layer + ?Sized> Default for DiagGroup<T> {
    fn default() -> Self {
        Self {
            layers: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Layer + ?Sized> core::fmt::Debug for DiagGroup<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DiagGroup")
            .field("layers", &self.layers.read().len())
            .finish()
    }
}

impl<T: Layer + ?Sized> DiagGroup<T> {
    /// Create an empty DiagGroup
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer to report on
    pub fn add(&self, layer: Arc<T>) {
        self.layers.write().push(layer);
    }

    /// Collect diagnostics from every member
    pub fn diag(&self, report: &mut LayerReport) {
        let layers = self.layers.read().clone();
        for layer in layers {
            layer.diag(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_contains;
    use std::fmt::Write;

    /// A layer which logs each call into a shared string, and fails the operations it is told to
    struct Probe {
        name: String,
        log: Arc<Mutex<String>>,
        fail: &'static [&'static str],
    }

    impl Probe {
        fn new(name: &str, log: &Arc<Mutex<String>>, fail: &'static [&'static str]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                log: log.clone(),
                fail,
            })
        }

        fn call(&self, op: &str, status: &LayerStatus) {
            write!(self.log.lock(), "{}.{} ", self.name, op).unwrap();
            if self.fail.contains(&op) {
                status.error(&format!("{} {} failed", self.name, op));
            }
        }
    }

    impl Layer for Probe {
        fn name(&self) -> &str {
            &self.name
        }
        fn pending(&self, status: &LayerStatus) {
            self.call("pending", status)
        }
        fn read(&self, status: &LayerStatus) {
            self.call("read", status)
        }
        fn write(&self, status: &LayerStatus) {
            self.call("write", status)
        }
        fn diag(&self, report: &mut LayerReport) {
            write!(self.log.lock(), "{}.diag ", self.name).unwrap();
            report.add(self.name.clone(), "ok");
        }
        fn init(&self, status: &LayerStatus) {
            self.call("init", status)
        }
        fn shutdown(&self, status: &LayerStatus) {
            self.call("shutdown", status)
        }
        fn halt(&self, status: &LayerStatus) {
            self.call("halt", status)
        }
        fn recover(&self, status: &LayerStatus) {
            self.call("recover", status)
        }
    }

    fn take(log: &Arc<Mutex<String>>) -> String {
        core::mem::take(&mut *log.lock()).trim_end().to_string()
    }

    fn stack(log: &Arc<Mutex<String>>, b_fails: &'static [&'static str]) -> LayerStack {
        let stack = LayerStack::new("stack");
        stack.add(Probe::new("a", log, &[]));
        stack.add(Probe::new("b", log, b_fails));
        stack.add(Probe::new("c", log, &[]));
        stack
    }

    #[test]
    fn test_stack_init_success() {
        let log = Arc::new(Mutex::new(String::new()));
        let stack = stack(&log, &[]);
        let status = LayerStatus::new();
        stack.init(&status);
        assert!(status.is_ok());
        assert_eq!("a.init b.init c.init", take(&log));
        assert_eq!(3, stack.boundary());
    }

    #[test]
    fn test_stack_init_rollback() {
        let _ = env_logger::try_init();
        let log = Arc::new(Mutex::new(String::new()));
        let stack = stack(&log, &["init"]);
        let status = LayerStatus::new();
        stack.init(&status);
        assert_eq!(Severity::Error, status.severity());
        assert_eq!("b init failed", status.reason());
        assert_eq!("a.init b.init a.shutdown", take(&log));
        assert_eq!(1, stack.boundary());
    }

    #[test]
    fn test_stack_recover_rolls_back_with_halt() {
        let log = Arc::new(Mutex::new(String::new()));
        let stack = stack(&log, &["recover"]);
        let status = LayerStatus::new();
        stack.recover(&status);
        assert_eq!("a.recover b.recover a.halt", take(&log));
    }

    #[test]
    fn test_stack_read_stops_at_boundary() {
        let log = Arc::new(Mutex::new(String::new()));
        let stack = stack(&log, &["init"]);
        stack.init(&LayerStatus::new());
        take(&log);

        let status = LayerStatus::new();
        stack.read(&status);
        assert_eq!("a.read", take(&log));
        stack.pending(&status);
        assert_eq!("b.pending", take(&log));
    }

    #[test]
    fn test_stack_read_failure_halts_prefix() {
        let log = Arc::new(Mutex::new(String::new()));
        let stack = stack(&log, &["read"]);
        stack.init(&LayerStatus::new());
        take(&log);

        let status = LayerStatus::new();
        stack.read(&status);
        assert_eq!(Severity::Error, status.severity());
        assert_eq!("a.read b.read b.halt a.halt c.read", take(&log));
        // Boundary is untouched by read
        assert_eq!(3, stack.boundary());
    }

    #[test]
    fn test_stack_write_walks_backwards() {
        let log = Arc::new(Mutex::new(String::new()));
        let stack = stack(&log, &["write"]);
        stack.init(&LayerStatus::new());
        take(&log);

        let status = LayerStatus::new();
        stack.write(&status);
        assert_eq!(Severity::Error, status.severity());
        assert_eq!("c.write b.write b.halt c.halt a.write", take(&log));
    }

    #[test]
    fn test_stack_shutdown_resets_boundary() {
        let log = Arc::new(Mutex::new(String::new()));
        let stack = stack(&log, &[]);
        stack.init(&LayerStatus::new());
        take(&log);

        stack.shutdown(&LayerStatus::new());
        assert_eq!("c.shutdown b.shutdown a.shutdown", take(&log));
        assert_eq!(0, stack.boundary());

        stack.read(&LayerStatus::new());
        assert_eq!("", take(&log));
        let mut report = LayerReport::new();
        stack.diag(&mut report);
        assert!(report.values().is_empty());
    }

    #[test]
    fn test_stack_halt_is_unconditional() {
        let log = Arc::new(Mutex::new(String::new()));
        let stack = stack(&log, &["halt"]);
        let status = LayerStatus::new();
        stack.halt(&status);
        assert_eq!("c.halt b.halt a.halt", take(&log));
        assert_eq!(Severity::Error, status.severity());
    }

    #[test]
    fn test_group_init_failure_shuts_down_all() {
        let log = Arc::new(Mutex::new(String::new()));
        let group: LayerGroup<Probe> = LayerGroup::new("group");
        group.add(Probe::new("a", &log, &["init"]));
        group.add(Probe::new("b", &log, &[]));
        let status = LayerStatus::new();
        group.init(&status);
        assert_eq!(Severity::Error, status.severity());
        assert_contains!(status.reason(), "a init failed");
        assert_eq!("a.init b.init a.shutdown b.shutdown", take(&log));
    }

    #[test]
    fn test_group_read_failure() {
        let log = Arc::new(Mutex::new(String::new()));
        let group: LayerGroup<Probe> = LayerGroup::new("group");
        group.add(Probe::new("a", &log, &[]));
        group.add(Probe::new("b", &log, &["read"]));
        group.add(Probe::new("c", &log, &[]));
        let status = LayerStatus::new();
        group.read(&status);
        assert_eq!("a.read b.read a.halt b.halt c.halt c.read", take(&log));
    }

    #[test]
    fn test_group_without_diag() {
        let log = Arc::new(Mutex::new(String::new()));
        let group: LayerGroup = LayerGroup::without_diag("transport");
        group.add(Probe::new("a", &log, &[]));
        let mut report = LayerReport::new();
        group.diag(&mut report);
        assert!(report.values().is_empty());
        group.init(&LayerStatus::new());
        assert_eq!("a.init", take(&log));
    }

    #[test]
    fn test_diag_group() {
        let log = Arc::new(Mutex::new(String::new()));
        let diag = DiagGroup::<dyn Layer>::new();
        diag.add(Probe::new("a", &log, &[]));
        diag.add(Probe::new("b", &log, &[]));
        let mut report = LayerReport::new();
        diag.diag(&mut report);
        assert_eq!(2, report.values().len());
        assert_eq!("a.diag b.diag", take(&log));
    }
}
