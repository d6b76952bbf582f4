//! Result containers for sweep measurements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four sample traces captured during one sweep, in capture order.
///
/// All four are the same length: one sample per sweep point, or fewer if
/// the sweep was aborted before it ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepTraces {
    /// Voltage at the swept channel.
    pub sweep_voltage: Vec<f64>,
    /// Current at the swept channel.
    pub sweep_current: Vec<f64>,
    /// Voltage at the fixed channel.
    pub fixed_voltage: Vec<f64>,
    /// Current at the fixed channel.
    pub fixed_current: Vec<f64>,
}

impl SweepTraces {
    /// Number of captured points.
    pub fn len(&self) -> usize {
        self.sweep_voltage.len()
    }

    /// True if nothing was captured (e.g. a cancelled sweep).
    pub fn is_empty(&self) -> bool {
        self.sweep_voltage.is_empty()
            && self.sweep_current.is_empty()
            && self.fixed_voltage.is_empty()
            && self.fixed_current.is_empty()
    }
}

/// Sweep direction within a forward/reverse pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// First pass, start to stop.
    Forward,
    /// Second pass, stop back to start.
    Reverse,
}

/// What kind of curve a [`SweepSet`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepKind {
    /// Swept gate, stepped drain bias.
    Transfer,
    /// Swept drain, stepped gate bias.
    Output,
}

/// One completed sweep, tagged with its fixed bias and direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepEntry {
    /// The fixed channel's bias during this sweep.
    pub fixed_bias: f64,
    /// Forward or reverse pass.
    pub direction: Direction,
    /// When the sweep finished.
    pub recorded_at: DateTime<Utc>,
    /// The captured traces.
    pub traces: SweepTraces,
}

/// An ordered collection of sweeps from one measurement run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSet {
    /// Transfer or output curve.
    pub kind: SweepKind,
    /// Completed sweeps, in acquisition order.
    pub entries: Vec<SweepEntry>,
}

impl SweepSet {
    /// An empty set of the given kind.
    pub fn new(kind: SweepKind) -> Self {
        SweepSet {
            kind,
            entries: Vec::new(),
        }
    }

    /// Append one completed sweep.
    pub fn append(&mut self, fixed_bias: f64, direction: Direction, traces: SweepTraces) {
        self.entries.push(SweepEntry {
            fixed_bias,
            direction,
            recorded_at: Utc::now(),
            traces,
        });
    }

    /// Number of recorded sweeps.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no sweep completed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_traces() {
        let traces = SweepTraces::default();
        assert_eq!(traces.len(), 0);
        assert!(traces.is_empty());
    }

    #[test]
    fn set_appends_in_order() {
        let mut set = SweepSet::new(SweepKind::Transfer);
        assert!(set.is_empty());

        set.append(0.0, Direction::Forward, SweepTraces::default());
        set.append(0.0, Direction::Reverse, SweepTraces::default());
        assert_eq!(set.len(), 2);
        assert_eq!(set.entries[0].direction, Direction::Forward);
        assert_eq!(set.entries[1].direction, Direction::Reverse);
    }

    #[test]
    fn serializes_to_json() {
        let mut set = SweepSet::new(SweepKind::Output);
        set.append(
            -1.5,
            Direction::Forward,
            SweepTraces {
                sweep_voltage: vec![0.0, 1.0],
                sweep_current: vec![1e-6, 2e-6],
                fixed_voltage: vec![-1.5, -1.5],
                fixed_current: vec![3e-6, 4e-6],
            },
        );
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains("\"Output\""));
        assert!(json.contains("-1.5"));
    }
}
