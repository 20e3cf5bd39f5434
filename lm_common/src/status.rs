//! Status sink published to the external parameter store.
//!
//! A transfer reports three values as side effects: a short message, a
//! coarse [`BuildState`] and a [`BuildResult`]. Finished reads additionally
//! publish the projected read-back array of the axis.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Coarse transfer state as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BuildState {
    #[default]
    Idle,
    Busy,
    Done,
}

/// Result code of the last transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildResult {
    Success,
    Failure,
}

/// Parameter lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("no parameters for axis {0}")]
    UnknownAxis(usize),
}

/// Raw scaling parameters of one axis.
///
/// A field is `None` when the parameter exists but was never set.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AxisScaling {
    pub resolution: Option<f64>,
    pub offset: Option<f64>,
    pub direction: Option<i32>,
}

/// Output side of the external parameter store.
///
/// Implementations must be cheap: they are called from the cycle worker.
pub trait StatusSink: Send + Sync {
    fn publish_message(&self, message: &str);

    fn publish_state(&self, state: BuildState);

    fn publish_result(&self, result: BuildResult);

    /// Look up the read-back scaling parameters of `axis`.
    fn axis_scaling(&self, axis: usize) -> Result<AxisScaling, StatusError>;

    /// Publish a projected profile array for `axis`.
    fn publish_readbacks(&self, axis: usize, points: &[f64]);
}

/// One value written to the sink, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StatusEvent {
    Message(String),
    State(BuildState),
    Result(BuildResult),
    Readbacks { axis: usize, count: usize },
}

/// Current values of a [`MemoryStatusSink`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub message: String,
    pub state: BuildState,
    pub result: Option<BuildResult>,
    /// Projected read-back arrays by axis.
    pub readbacks: HashMap<usize, Vec<f64>>,
    /// Every published value, oldest first.
    pub history: Vec<StatusEvent>,
}

#[derive(Default)]
struct MemoryInner {
    snapshot: StatusSnapshot,
    scaling: HashMap<usize, AxisScaling>,
}

/// In-memory parameter store.
#[derive(Default)]
pub struct MemoryStatusSink {
    inner: Mutex<MemoryInner>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register scaling parameters for `axis`.
    pub fn set_axis_scaling(&self, axis: usize, scaling: AxisScaling) {
        self.inner.lock().scaling.insert(axis, scaling);
    }

    /// Copy of the current values.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock().snapshot.clone()
    }
}

impl StatusSink for MemoryStatusSink {
    fn publish_message(&self, message: &str) {
        let mut inner = self.inner.lock();
        inner.snapshot.message = message.to_string();
        inner
            .snapshot
            .history
            .push(StatusEvent::Message(message.to_string()));
    }

    fn publish_state(&self, state: BuildState) {
        let mut inner = self.inner.lock();
        inner.snapshot.state = state;
        inner.snapshot.history.push(StatusEvent::State(state));
    }

    fn publish_result(&self, result: BuildResult) {
        let mut inner = self.inner.lock();
        inner.snapshot.result = Some(result);
        inner.snapshot.history.push(StatusEvent::Result(result));
    }

    fn axis_scaling(&self, axis: usize) -> Result<AxisScaling, StatusError> {
        self.inner
            .lock()
            .scaling
            .get(&axis)
            .copied()
            .ok_or(StatusError::UnknownAxis(axis))
    }

    fn publish_readbacks(&self, axis: usize, points: &[f64]) {
        let mut inner = self.inner.lock();
        inner.snapshot.readbacks.insert(axis, points.to_vec());
        inner.snapshot.history.push(StatusEvent::Readbacks {
            axis,
            count: points.len(),
        });
    }
}
