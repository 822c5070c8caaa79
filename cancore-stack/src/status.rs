//! Escalating status and diagnostic report types
//!
//! Every [`Layer`](crate::layer::Layer) operation reports its outcome by escalating a shared
//! [`LayerStatus`]. The severity of a status can only ever be raised, and reasons are accumulated
//! rather than replaced, so that the caller sees the worst outcome and every explanation after a
//! pass over many layers.

use core::fmt::Display;

use parking_lot::Mutex;

/// Severity of a [`LayerStatus`], in increasing order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Severity {
    /// Everything is fine
    #[default]
    Ok = 0,
    /// Degraded, but operation continues
    Warn = 1,
    /// Operation failed
    Error = 2,
    /// No current information is available
    ///
    /// This is the highest severity, so `bounded(Severity::Stale)` is true for every status.
    Stale = 3,
}

impl Severity {
    /// Bound which accepts every severity
    pub const UNBOUNDED: Severity = Severity::Stale;
}

impl Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Severity::Ok => write!(f, "OK"),
            Severity::Warn => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Stale => write!(f, "STALE"),
        }
    }
}

#[derive(Debug, Default)]
struct StatusInner {
    severity: Severity,
    reason: String,
}

/// A monotonically escalating status, with accumulated reasons
///
/// All methods take `&self`, so a status can be escalated by the thread driving the lifecycle as
/// well as by threads reporting asynchronous faults.
#[derive(Debug, Default)]
pub struct LayerStatus {
    inner: Mutex<StatusInner>,
}

impl LayerStatus {
    /// Create a new status at [`Severity::Ok`]
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, severity: Severity, reason: &str) {
        let mut inner = self.inner.lock();
        if severity > inner.severity {
            inner.severity = severity;
        }
        if !reason.is_empty() {
            if !inner.reason.is_empty() {
                inner.reason.push_str("; ");
            }
            inner.reason.push_str(reason);
        }
    }

    /// Current severity
    pub fn severity(&self) -> Severity {
        self.inner.lock().severity
    }

    /// All reasons reported so far, joined by "; "
    pub fn reason(&self) -> String {
        self.inner.lock().reason.clone()
    }

    /// Returns true if the severity does not exceed `bound`
    pub fn bounded(&self, bound: Severity) -> bool {
        self.severity() <= bound
    }

    /// Returns true if nothing has been reported above [`Severity::Ok`]
    pub fn is_ok(&self) -> bool {
        self.bounded(Severity::Ok)
    }

    /// Escalate to [`Severity::Warn`]
    pub fn warn(&self, reason: &str) {
        self.set(Severity::Warn, reason)
    }

    /// Escalate to [`Severity::Error`]
    pub fn error(&self, reason: &str) {
        self.set(Severity::Error, reason)
    }

    /// Escalate to [`Severity::Stale`]
    pub fn stale(&self, reason: &str) {
        self.set(Severity::Stale, reason)
    }
}

/// A [`LayerStatus`] plus an ordered list of key/value diagnostic entries
///
/// Reports are filled in by [`Layer::diag`](crate::layer::Layer::diag), and are owned by whoever
/// is collecting the diagnostics.
#[derive(Debug, Default)]
pub struct LayerReport {
    status: LayerStatus,
    values: Vec<(String, String)>,
}

impl LayerReport {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diagnostic value
    pub fn add(&mut self, key: impl Into<String>, value: impl Display) {
        self.values.push((key.into(), value.to_string()));
    }

    /// The diagnostic values in the order they were added
    pub fn values(&self) -> &[(String, String)] {
        &self.values
    }

    /// Access the status part of the report
    pub fn status(&self) -> &LayerStatus {
        &self.status
    }
}

impl core::ops::Deref for LayerReport {
    type Target = LayerStatus;

    fn deref(&self) -> &Self::Target {
        &self.status
    }
}
