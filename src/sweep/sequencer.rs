//! The triggered sweep sequencer.
//!
//! A synchronized two-channel linear voltage sweep runs entirely inside
//! the instrument's hardware trigger model; this module's job is to wire
//! that state machine up over the remote protocol, start it, and detect
//! completion by polling. The configured topology:
//!
//! - both channels ramp their sources linearly over the same number of
//!   points (the fixed channel's ramp degenerates to a constant unless
//!   trailing mode is selected);
//! - both channels' measurements fire on the *sweep* channel's
//!   source-complete event, so the two samples of every point are taken
//!   together;
//! - event blender 1 (OR) fires when the sweep channel first enters its
//!   trigger layer or finishes a pulse, and drives the next source step;
//! - event blender 2 (AND) fires only when BOTH channels report
//!   measure-complete, and gates the end-of-pulse transition, so the next
//!   step can never start while either channel is still measuring.
//!
//! Completion has no callback: a status condition register encodes which
//! channels are still sweeping. The poll is two-phase — first until the
//! register goes nonzero (the sweep has actually started), then until it
//! returns to zero. A single zero-check right after arming would read the
//! pre-start idle state as "already finished".
//!
//! Cancellation is checked once, before any configuration write. Once
//! the trigger model is running it cannot be interrupted from here; a
//! cancel signalled mid-sweep takes effect at the next checkpoint.

use crate::error::{SmuError, SmuResult};
use crate::instrument::{BusyGuard, SmuChannel, SourceMeter};
use crate::protocol::namespace::RemoteNode;
use crate::sweep::data::SweepTraces;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// What the fixed channel does while the other channel sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FixedMode {
    /// Hold a constant bias voltage.
    Bias(f64),
    /// Sweep alongside the sweep channel (both ramp start -> stop).
    Trailing,
}

/// Parameters for one synchronized linear voltage sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// The channel whose voltage ramps.
    pub sweep_channel: SmuChannel,
    /// The other channel.
    pub fixed_channel: SmuChannel,
    /// Ramp start voltage.
    pub start: f64,
    /// Ramp stop voltage.
    pub stop: f64,
    /// Step size. The caller owns the sign; the point count uses the
    /// magnitude only.
    pub step: f64,
    /// Fixed-channel behavior.
    pub fixed: FixedMode,
    /// Measurement integration time per point, in seconds.
    pub integration_time: f64,
    /// Settling delay before each measurement, in seconds.
    pub delay: f64,
    /// Pulsed sweep: the source returns to idle between points instead
    /// of holding.
    pub pulsed: bool,
}

impl SweepConfig {
    /// Number of points in the ramp: `1 + |stop - start| / |step|`.
    pub fn point_count(&self) -> u32 {
        (1.0 + ((self.stop - self.start) / self.step).abs()).round() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepPhase {
    Idle,
    Configured,
    Armed,
    Sweeping,
    Complete,
}

/// Drives one sweep through its phases against the instrument.
struct SweepSequencer<'a> {
    meter: &'a SourceMeter,
    cfg: &'a SweepConfig,
    phase: SweepPhase,
}

impl<'a> SweepSequencer<'a> {
    fn new(meter: &'a SourceMeter, cfg: &'a SweepConfig) -> Self {
        SweepSequencer {
            meter,
            cfg,
            phase: SweepPhase::Idle,
        }
    }

    fn enter(&mut self, phase: SweepPhase) {
        debug!("sweep phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Program both channels' sources, measurements, buffers, and the
    /// full trigger topology.
    async fn configure(&mut self) -> SmuResult<()> {
        let cfg = self.cfg;
        let meter = self.meter;
        let points = cfg.point_count();

        let sweep = meter.smu(cfg.sweep_channel)?;
        let fixed = meter.smu(cfg.fixed_channel)?;

        // Linear source ramps. The fixed channel either trails the sweep
        // or ramps bias -> bias, which holds it constant.
        let sweep_enable = sweep.read("ENABLE").await?;
        let sweep_source = sweep.descend("trigger.source")?;
        sweep_source
            .function("linearv")?
            .call(&[cfg.start.into(), cfg.stop.into(), points.into()])
            .await?;
        sweep_source.write("action", sweep_enable).await?;

        let fixed_enable = fixed.read("ENABLE").await?;
        let fixed_source = fixed.descend("trigger.source")?;
        match cfg.fixed {
            FixedMode::Trailing => {
                fixed_source
                    .function("linearv")?
                    .call(&[cfg.start.into(), cfg.stop.into(), points.into()])
                    .await?;
            }
            FixedMode::Bias(bias) => {
                fixed_source
                    .function("linearv")?
                    .call(&[bias.into(), bias.into(), points.into()])
                    .await?;
            }
        }
        fixed_source.write("action", fixed_enable).await?;

        // Integration time is configured in power-line cycles.
        let linefreq = meter.core().query_f64("localnode.linefreq").await?;
        let nplc = cfg.integration_time * linefreq;
        sweep.descend("measure")?.write("nplc", nplc).await?;
        fixed.descend("measure")?.write("nplc", nplc).await?;

        // Settling delay before each measurement.
        sweep.descend("measure")?.write("delay", cfg.delay).await?;
        fixed.descend("measure")?.write("delay", cfg.delay).await?;

        // Auto-range the measured currents.
        let sweep_autorange = sweep.read("AUTORANGE_ON").await?;
        let fixed_autorange = fixed.read("AUTORANGE_ON").await?;
        sweep
            .descend("measure")?
            .write("autorangei", sweep_autorange)
            .await?;
        fixed
            .descend("measure")?
            .write("autorangei", fixed_autorange)
            .await?;

        // Both sources supply DC volts.
        let sweep_dcvolts = sweep.read("OUTPUT_DCVOLTS").await?;
        let fixed_dcvolts = fixed.read("OUTPUT_DCVOLTS").await?;
        sweep.descend("source")?.write("func", sweep_dcvolts).await?;
        fixed.descend("source")?.write("func", fixed_dcvolts).await?;

        // Start from empty buffers.
        let sweep_buf1 = sweep.child("nvbuffer1")?;
        let sweep_buf2 = sweep.child("nvbuffer2")?;
        let fixed_buf1 = fixed.child("nvbuffer1")?;
        let fixed_buf2 = fixed.child("nvbuffer2")?;
        for buf in [&sweep_buf1, &sweep_buf2, &fixed_buf1, &fixed_buf2] {
            buf.function("clear")?.call(&[]).await?;
        }
        for buf in [&sweep_buf1, &sweep_buf2, &fixed_buf1, &fixed_buf2] {
            buf.function("clearcache")?.call(&[]).await?;
        }

        // Show live currents on the front panel while sweeping.
        let display = meter.root().child("display")?;
        let dcamps = display.read("MEASURE_DCAMPS").await?;
        display
            .descend("smua.measure")?
            .write("func", dcamps.clone())
            .await?;
        display.descend("smub.measure")?.write("func", dcamps).await?;

        // One trigger-layer cycle per point; the arm layer runs once.
        sweep
            .descend("trigger")?
            .write("count", points)
            .await?;
        fixed
            .descend("trigger")?
            .write("count", points)
            .await?;

        // Measure on trigger, into current + voltage buffers. Both
        // channels fire on the SWEEP channel's source-complete event so
        // their samples are simultaneous.
        let sweep_measure = sweep.descend("trigger.measure")?;
        let fixed_measure = fixed.descend("trigger.measure")?;
        sweep_measure.write("action", sweep.read("ENABLE").await?).await?;
        fixed_measure.write("action", fixed.read("ENABLE").await?).await?;

        let sweep_name = cfg.sweep_channel.name();
        let fixed_name = cfg.fixed_channel.name();
        sweep_measure
            .function("iv")?
            .call(&[
                format!("{}.nvbuffer1", sweep_name).into(),
                format!("{}.nvbuffer2", sweep_name).into(),
            ])
            .await?;
        fixed_measure
            .function("iv")?
            .call(&[
                format!("{}.nvbuffer1", fixed_name).into(),
                format!("{}.nvbuffer2", fixed_name).into(),
            ])
            .await?;

        let source_complete = sweep
            .descend("trigger")?
            .read("SOURCE_COMPLETE_EVENT_ID")
            .await?;
        sweep_measure
            .write("stimulus", source_complete.clone())
            .await?;
        fixed_measure.write("stimulus", source_complete).await?;

        // Hold the level through each step, or drop to idle for pulsed
        // sweeps. The same action applies at the end of the whole sweep.
        let end_action = if cfg.pulsed { 0.0 } else { 1.0 };
        sweep
            .descend("trigger.endpulse")?
            .write("action", end_action)
            .await?;
        fixed
            .descend("trigger.endpulse")?
            .write("action", end_action)
            .await?;
        sweep
            .descend("trigger.endsweep")?
            .write("action", end_action)
            .await?;
        fixed
            .descend("trigger.endsweep")?
            .write("action", end_action)
            .await?;

        // The arm layer advances on the broadcast software trigger.
        let trigger = meter.root().child("trigger")?;
        let trg_event = trigger.read("EVENT_ID").await?;
        sweep
            .descend("trigger.arm")?
            .write("stimulus", trg_event)
            .await?;

        // Blender 1 (OR): first entry into the trigger layer, or the end
        // of a pulse, releases the next source step.
        let blender = trigger.child("blender")?;
        let blender1 = blender.at(1);
        blender1.write("orenable", true).await?;
        let armed = sweep.descend("trigger")?.read("ARMED_EVENT_ID").await?;
        let pulse_complete = sweep
            .descend("trigger")?
            .read("PULSE_COMPLETE_EVENT_ID")
            .await?;
        let stimulus1 = blender1.list("stimulus")?;
        stimulus1.set(1, armed).await?;
        stimulus1.set(2, pulse_complete).await?;

        sweep_source
            .write("stimulus", blender1.read("EVENT_ID").await?)
            .await?;

        // Blender 2 (AND): the end-of-pulse transition waits for BOTH
        // channels' measure-complete, so a step can never begin while the
        // slower channel is still measuring.
        let blender2 = blender.at(2);
        blender2.write("orenable", false).await?;
        let sweep_mc = sweep
            .descend("trigger")?
            .read("MEASURE_COMPLETE_EVENT_ID")
            .await?;
        let fixed_mc = fixed
            .descend("trigger")?
            .read("MEASURE_COMPLETE_EVENT_ID")
            .await?;
        let stimulus2 = blender2.list("stimulus")?;
        stimulus2.set(1, sweep_mc).await?;
        stimulus2.set(2, fixed_mc).await?;

        sweep
            .descend("trigger.endpulse")?
            .write("stimulus", blender2.read("EVENT_ID").await?)
            .await?;

        // Outputs on.
        let sweep_on = sweep.read("OUTPUT_ON").await?;
        let fixed_on = fixed.read("OUTPUT_ON").await?;
        sweep.descend("source")?.write("output", sweep_on).await?;
        fixed.descend("source")?.write("output", fixed_on).await?;

        self.enter(SweepPhase::Configured);
        Ok(())
    }

    /// Put both channels into wait-for-trigger and broadcast the start
    /// event.
    async fn arm_and_start(&mut self) -> SmuResult<()> {
        let sweep = self.meter.smu(self.cfg.sweep_channel)?;
        let fixed = self.meter.smu(self.cfg.fixed_channel)?;

        sweep
            .descend("trigger")?
            .function("initiate")?
            .call(&[])
            .await?;
        fixed
            .descend("trigger")?
            .function("initiate")?
            .call(&[])
            .await?;
        self.enter(SweepPhase::Armed);

        self.meter.send_trigger().await?;
        self.enter(SweepPhase::Sweeping);
        Ok(())
    }

    /// Poll the sweep status register until the run finishes.
    ///
    /// The register's bit pattern encodes which channels are sweeping
    /// (2 = channel A, 4 = channel B, 6 = both, 0 = neither). Both poll
    /// phases are required: waiting for nonzero first guards against
    /// mistaking the not-yet-started idle state for completion.
    async fn wait_complete(&mut self) -> SmuResult<()> {
        const CONDITION: &str = "status.operation.sweeping.condition";
        let core = self.meter.core();
        let interval = core.poll.interval();
        let deadline = core.poll.max_wait().map(|w| Instant::now() + w);

        let check_deadline = |deadline: Option<Instant>| -> SmuResult<()> {
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(SmuError::SweepTimeout {
                        max_wait: core.poll.max_wait().unwrap_or_default(),
                    });
                }
            }
            Ok(())
        };

        // Phase one: wait for the sweep to actually start.
        loop {
            let status = core.query_f64(CONDITION).await?;
            if status != 0.0 {
                break;
            }
            check_deadline(deadline)?;
            tokio::time::sleep(interval).await;
        }

        // Phase two: wait for both channels to finish.
        loop {
            let status = core.query_f64(CONDITION).await?;
            if status == 0.0 {
                break;
            }
            check_deadline(deadline)?;
            tokio::time::sleep(interval).await;
        }

        self.enter(SweepPhase::Complete);
        Ok(())
    }

    /// Drain the four capture buffers and leave them clear for reuse.
    async fn collect(&mut self) -> SmuResult<SweepTraces> {
        let meter = self.meter;
        let sweep = meter.smu(self.cfg.sweep_channel)?;
        let fixed = meter.smu(self.cfg.fixed_channel)?;

        let buffer = |smu: &RemoteNode, name: &str| smu.child(name);

        let sweep_voltage = meter.read_buffer(&buffer(&sweep, "nvbuffer2")?).await?;
        let sweep_current = meter.read_buffer(&buffer(&sweep, "nvbuffer1")?).await?;
        let fixed_voltage = meter.read_buffer(&buffer(&fixed, "nvbuffer2")?).await?;
        let fixed_current = meter.read_buffer(&buffer(&fixed, "nvbuffer1")?).await?;

        meter.clear_buffers().await?;

        Ok(SweepTraces {
            sweep_voltage,
            sweep_current,
            fixed_voltage,
            fixed_current,
        })
    }
}

impl SourceMeter {
    /// Run one synchronized linear voltage sweep and return the captured
    /// traces as `[sweep V, sweep I, fixed V, fixed I]`.
    ///
    /// If the session's cancel token is already signalled, returns four
    /// empty traces without touching the instrument. A cancel arriving
    /// after configuration has begun is NOT honored mid-sweep; the
    /// running trigger model cannot be interrupted from the controller.
    pub async fn voltage_sweep(&self, cfg: &SweepConfig) -> SmuResult<SweepTraces> {
        let _busy = BusyGuard::hold(self.core());

        if self.cancel_token().is_cancelled() {
            info!("sweep cancelled before configuration; returning empty traces");
            return Ok(SweepTraces::default());
        }

        info!(
            "sweeping {} from {} V to {} V in {} points ({} fixed: {:?})",
            cfg.sweep_channel.name(),
            cfg.start,
            cfg.stop,
            cfg.point_count(),
            cfg.fixed_channel.name(),
            cfg.fixed,
        );

        let mut seq = SweepSequencer::new(self, cfg);
        seq.configure().await?;
        seq.arm_and_start().await?;
        seq.wait_complete().await?;
        seq.collect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;

    fn base_config() -> SweepConfig {
        SweepConfig {
            sweep_channel: SmuChannel::A,
            fixed_channel: SmuChannel::B,
            start: 0.0,
            stop: -60.0,
            step: 1.0,
            fixed: FixedMode::Bias(0.0),
            integration_time: 0.1,
            delay: -1.0,
            pulsed: false,
        }
    }

    #[test]
    fn point_count_uses_magnitudes() {
        let cfg = base_config();
        assert_eq!(cfg.point_count(), 61);

        let cfg = SweepConfig {
            start: -60.0,
            stop: 0.0,
            step: -1.0,
            ..cfg
        };
        assert_eq!(cfg.point_count(), 61);
    }

    #[test]
    fn single_point_sweep() {
        let cfg = SweepConfig {
            start: 2.0,
            stop: 2.0,
            step: 0.5,
            ..base_config()
        };
        assert_eq!(cfg.point_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_sweep_touches_nothing() {
        let mock = MockTransport::new();
        mock.connect_now();
        let meter = SourceMeter::new(Box::new(mock.clone()));

        meter.cancel_token().cancel();
        let traces = meter.voltage_sweep(&base_config()).await.unwrap();

        assert!(traces.is_empty());
        assert!(mock.writes().is_empty());
        assert!(mock.queries().is_empty());
    }

    #[tokio::test]
    async fn busy_while_sweeping_cancelled_path() {
        let mock = MockTransport::new();
        mock.connect_now();
        let meter = SourceMeter::new(Box::new(mock.clone()));
        meter.cancel_token().cancel();

        assert!(!meter.is_busy());
        meter.voltage_sweep(&base_config()).await.unwrap();
        assert!(!meter.is_busy());
    }
}
