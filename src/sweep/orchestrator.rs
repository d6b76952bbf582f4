//! Transfer- and output-curve measurements.
//!
//! A curve measurement steps one channel through a list of fixed bias
//! voltages and, at each bias, runs a forward and a reverse sweep of the
//! other channel. Completed sweeps accumulate into a [`SweepSet`] tagged
//! with bias and direction; a cancelled run returns whatever was
//! collected so far after resetting the instrument.

use crate::error::SmuResult;
use crate::instrument::{BusyGuard, SmuChannel, SourceMeter};
use crate::sweep::data::{Direction, SweepKind, SweepSet};
use crate::sweep::sequencer::{FixedMode, SweepConfig};
use log::info;
use serde::{Deserialize, Serialize};

/// Parameters for a transfer curve: gate swept, drain bias stepped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferCurve {
    /// The swept (gate) channel.
    pub gate: SmuChannel,
    /// The stepped (drain) channel.
    pub drain: SmuChannel,
    /// Gate sweep start voltage.
    pub gate_start: f64,
    /// Gate sweep stop voltage.
    pub gate_stop: f64,
    /// Gate step magnitude.
    pub gate_step: f64,
    /// Drain bias voltages, one forward/reverse pair each.
    pub drain_biases: Vec<f64>,
    /// Integration time per point, seconds.
    pub integration_time: f64,
    /// Settling delay before each measurement, seconds.
    pub delay: f64,
    /// Pulsed sweeps.
    pub pulsed: bool,
}

/// Parameters for an output curve: drain swept, gate bias stepped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputCurve {
    /// The stepped (gate) channel.
    pub gate: SmuChannel,
    /// The swept (drain) channel.
    pub drain: SmuChannel,
    /// Drain sweep start voltage.
    pub drain_start: f64,
    /// Drain sweep stop voltage.
    pub drain_stop: f64,
    /// Drain step magnitude.
    pub drain_step: f64,
    /// Gate bias voltages, one forward/reverse pair each.
    pub gate_biases: Vec<f64>,
    /// Integration time per point, seconds.
    pub integration_time: f64,
    /// Settling delay before each measurement, seconds.
    pub delay: f64,
    /// Pulsed sweeps.
    pub pulsed: bool,
}

impl SourceMeter {
    /// Record a transfer curve over the given drain biases.
    pub async fn transfer_measurement(&self, curve: &TransferCurve) -> SmuResult<SweepSet> {
        info!(
            "recording transfer curve, gate {} V to {} V, drain biases {:?}",
            curve.gate_start, curve.gate_stop, curve.drain_biases
        );
        self.curve_measurement(
            SweepKind::Transfer,
            curve.gate,
            curve.drain,
            curve.gate_start,
            curve.gate_stop,
            curve.gate_step,
            &curve.drain_biases,
            curve.integration_time,
            curve.delay,
            curve.pulsed,
        )
        .await
    }

    /// Record an output curve over the given gate biases.
    pub async fn output_measurement(&self, curve: &OutputCurve) -> SmuResult<SweepSet> {
        info!(
            "recording output curve, drain {} V to {} V, gate biases {:?}",
            curve.drain_start, curve.drain_stop, curve.gate_biases
        );
        self.curve_measurement(
            SweepKind::Output,
            curve.drain,
            curve.gate,
            curve.drain_start,
            curve.drain_stop,
            curve.drain_step,
            &curve.gate_biases,
            curve.integration_time,
            curve.delay,
            curve.pulsed,
        )
        .await
    }

    /// Shared bias-stepping loop behind both curve kinds.
    ///
    /// The cancel token is re-armed on entry and observed at the top of
    /// each bias iteration; a sweep that was cancelled mid-flight is
    /// discarded rather than appended, and the instrument is reset before
    /// the partial set is returned.
    #[allow(clippy::too_many_arguments)]
    async fn curve_measurement(
        &self,
        kind: SweepKind,
        sweep_channel: SmuChannel,
        fixed_channel: SmuChannel,
        start: f64,
        stop: f64,
        step: f64,
        biases: &[f64],
        integration_time: f64,
        delay: f64,
        pulsed: bool,
    ) -> SmuResult<SweepSet> {
        let _busy = BusyGuard::hold(self.core());
        let cancel = self.cancel_token();
        cancel.rearm();

        let mut set = SweepSet::new(kind);

        for &bias in biases {
            if cancel.is_cancelled() {
                info!("measurement cancelled; returning {} sweeps", set.len());
                self.reset().await?;
                self.beep_done().await?;
                return Ok(set);
            }

            let forward = SweepConfig {
                sweep_channel,
                fixed_channel,
                start,
                stop,
                step: -step.abs(),
                fixed: FixedMode::Bias(bias),
                integration_time,
                delay,
                pulsed,
            };
            let traces = self.voltage_sweep(&forward).await?;
            if !cancel.is_cancelled() {
                set.append(bias, Direction::Forward, traces);
            }

            let reverse = SweepConfig {
                start: stop,
                stop: start,
                step: step.abs(),
                ..forward
            };
            let traces = self.voltage_sweep(&reverse).await?;
            if !cancel.is_cancelled() {
                set.append(bias, Direction::Reverse, traces);
            }
        }

        self.reset().await?;
        self.beep_done().await?;
        info!("measurement complete: {} sweeps", set.len());
        Ok(set)
    }

    async fn beep_done(&self) -> SmuResult<()> {
        self.root()
            .child("beeper")?
            .function("beep")?
            .call(&[0.3.into(), 2400.0.into()])
            .await?;
        Ok(())
    }
}
