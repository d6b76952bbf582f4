//! End-to-end tests against the mock transport.
//!
//! These drive the public API the way an orchestration layer would: a
//! scripted transport answers every query, and the tests verify both the
//! returned data and the traffic that reached the "instrument".

use smu_daq::adapters::MockTransport;
use smu_daq::sweep::{Direction, FixedMode, SweepConfig, SweepKind, TransferCurve};
use smu_daq::{ClassificationTables, SmuChannel, SmuError, SourceMeter};

/// Seed the mock with everything a sweep needs: a line frequency, buffer
/// contents for `points` samples, and a started/finished status pair per
/// expected sweep.
fn seed_instrument(mock: &MockTransport, sweeps: usize, points: usize) {
    mock.set_value("localnode.linefreq", "50");
    for channel in ["smua", "smub"] {
        mock.set_value(&format!("{}.nvbuffer1.n", channel), &points.to_string());
        mock.set_value(&format!("{}.nvbuffer2.n", channel), &points.to_string());
        for i in 1..=points {
            // Voltages count up from zero; currents are microamp-scale.
            mock.set_value(
                &format!("{}.nvbuffer2[{}]", channel, i),
                &format!("{}", i - 1),
            );
            mock.set_value(
                &format!("{}.nvbuffer1[{}]", channel, i),
                &format!("{}e-6", i),
            );
        }
    }
    let mut replies = Vec::new();
    for _ in 0..sweeps {
        replies.push("2");
        replies.push("0");
    }
    mock.script_replies("status.operation.sweeping.condition", &replies);
}

fn six_point_sweep() -> SweepConfig {
    SweepConfig {
        sweep_channel: SmuChannel::A,
        fixed_channel: SmuChannel::B,
        start: 0.0,
        stop: 5.0,
        step: 1.0,
        fixed: FixedMode::Bias(0.0),
        integration_time: 0.1,
        delay: -1.0,
        pulsed: false,
    }
}

#[tokio::test]
async fn six_point_sweep_end_to_end() {
    let mock = MockTransport::new();
    mock.connect_now();
    seed_instrument(&mock, 1, 6);

    let meter = SourceMeter::new(Box::new(mock.clone()));
    let traces = meter.voltage_sweep(&six_point_sweep()).await.unwrap();

    // Four traces of six samples each, in [sweep V, sweep I, fixed V,
    // fixed I] order.
    assert_eq!(traces.len(), 6);
    assert_eq!(traces.sweep_voltage, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(
        traces.sweep_current,
        vec![1e-6, 2e-6, 3e-6, 4e-6, 5e-6, 6e-6]
    );
    assert_eq!(traces.fixed_voltage.len(), 6);
    assert_eq!(traces.fixed_current.len(), 6);

    let writes = mock.writes();

    // Both ramps were programmed: the sweep channel 0 -> 5 V, the fixed
    // channel pinned at its bias.
    assert!(writes
        .iter()
        .any(|w| w == "result = smua.trigger.source.linearv(0, 5, 6)"));
    assert!(writes
        .iter()
        .any(|w| w == "result = smub.trigger.source.linearv(0, 0, 6)"));

    // Trigger topology: OR-blender 1 steps the source, AND-blender 2
    // gates the end of each pulse.
    assert!(writes.contains(&"trigger.blender[1].orenable = true".to_string()));
    assert!(writes.contains(&"trigger.blender[2].orenable = false".to_string()));

    // Armed and started.
    assert!(writes
        .iter()
        .any(|w| w == "result = smua.trigger.initiate()"));
    assert!(writes
        .iter()
        .any(|w| w == "result = smub.trigger.initiate()"));
    assert!(writes.contains(&"*trg".to_string()));

    // Every buffer was cleared three times: at configuration, after its
    // drain, and in the final sweep-wide cleanup.
    for channel in ["smua", "smub"] {
        for buffer in ["nvbuffer1", "nvbuffer2"] {
            let clears =
                mock.count_writes(|w| w.contains(&format!("{}.{}.clear()", channel, buffer)));
            assert_eq!(clears, 3, "{}.{} clear count", channel, buffer);
        }
    }
}

#[tokio::test]
async fn pulsed_sweep_uses_idle_end_action() {
    let mock = MockTransport::new();
    mock.connect_now();
    seed_instrument(&mock, 1, 2);

    let meter = SourceMeter::new(Box::new(mock.clone()));
    let cfg = SweepConfig {
        pulsed: true,
        stop: 1.0,
        ..six_point_sweep()
    };
    meter.voltage_sweep(&cfg).await.unwrap();

    // Pulsed: source drops to idle (0) between points and after the sweep.
    assert!(mock
        .writes()
        .contains(&"smua.trigger.endpulse.action = 0".to_string()));
    assert!(mock
        .writes()
        .contains(&"smua.trigger.endsweep.action = 0".to_string()));
}

#[tokio::test]
async fn trailing_mode_sweeps_both_channels() {
    let mock = MockTransport::new();
    mock.connect_now();
    seed_instrument(&mock, 1, 6);

    let meter = SourceMeter::new(Box::new(mock.clone()));
    let cfg = SweepConfig {
        fixed: FixedMode::Trailing,
        ..six_point_sweep()
    };
    meter.voltage_sweep(&cfg).await.unwrap();

    // Both channels ramp over the same span.
    assert!(mock
        .writes()
        .iter()
        .any(|w| w == "result = smub.trigger.source.linearv(0, 5, 6)"));
}

#[tokio::test]
async fn pre_cancelled_sweep_is_silent() {
    let mock = MockTransport::new();
    mock.connect_now();

    let meter = SourceMeter::new(Box::new(mock.clone()));
    meter.cancel_token().cancel();

    let traces = meter.voltage_sweep(&six_point_sweep()).await.unwrap();
    assert!(traces.sweep_voltage.is_empty());
    assert!(traces.sweep_current.is_empty());
    assert!(traces.fixed_voltage.is_empty());
    assert!(traces.fixed_current.is_empty());
    assert!(mock.writes().is_empty());
    assert!(mock.queries().is_empty());
}

#[tokio::test]
async fn transfer_measurement_tags_every_sweep() {
    let mock = MockTransport::new();
    mock.connect_now();
    seed_instrument(&mock, 4, 2);

    let meter = SourceMeter::new(Box::new(mock.clone()));
    let set = meter
        .transfer_measurement(&TransferCurve {
            gate: SmuChannel::A,
            drain: SmuChannel::B,
            gate_start: 0.0,
            gate_stop: -10.0,
            gate_step: 10.0,
            drain_biases: vec![-0.1, -1.0],
            integration_time: 0.02,
            delay: -1.0,
            pulsed: false,
        })
        .await
        .unwrap();

    assert_eq!(set.kind, SweepKind::Transfer);
    assert_eq!(set.len(), 4);
    let tags: Vec<(f64, Direction)> = set
        .entries
        .iter()
        .map(|e| (e.fixed_bias, e.direction))
        .collect();
    assert_eq!(
        tags,
        vec![
            (-0.1, Direction::Forward),
            (-0.1, Direction::Reverse),
            (-1.0, Direction::Forward),
            (-1.0, Direction::Reverse),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_between_biases_preserves_partial_results() {
    let mock = MockTransport::new();
    mock.connect_now();
    seed_instrument(&mock, 2, 2);
    // The third sweep idles once before starting, which opens a poll-delay
    // window for the cancel below to land in.
    mock.script_replies("status.operation.sweeping.condition", &["0", "2", "0"]);

    let meter = SourceMeter::new(Box::new(mock.clone()));
    let cancel = meter.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        cancel.cancel();
    });

    let set = meter
        .transfer_measurement(&TransferCurve {
            gate: SmuChannel::A,
            drain: SmuChannel::B,
            gate_start: 0.0,
            gate_stop: -10.0,
            gate_step: 10.0,
            drain_biases: vec![-0.1, -1.0],
            integration_time: 0.02,
            delay: -1.0,
            pulsed: false,
        })
        .await
        .unwrap();

    // The first bias completed both passes before the cancel; the third
    // sweep ran to completion (mid-sweep cancellation is not honored) but
    // was discarded, and the fourth never configured the instrument.
    assert_eq!(set.len(), 2);
    assert!(set.entries.iter().all(|e| e.fixed_bias == -0.1));
    assert_eq!(
        mock.count_writes(|w| w.starts_with("result = smua.trigger.source.linearv(")),
        3
    );

    // The instrument was reset on the way out.
    assert!(mock.writes().iter().any(|w| w.contains("reset()")));
}

#[tokio::test]
async fn property_round_trip_law() {
    let mock = MockTransport::new();
    mock.connect_now();

    let tables = ClassificationTables::defaults();
    let meter = SourceMeter::new(Box::new(mock.clone()));
    let root = meter.root();

    for name in tables.property_names() {
        root.write(name, 1.25).await.unwrap();
        let back = root.read(name).await.unwrap();
        assert_eq!(back.as_f64(), Some(1.25), "round trip through '{}'", name);
    }
}

#[tokio::test]
async fn constants_never_reach_the_transport() {
    let mock = MockTransport::new();
    mock.connect_now();

    let tables = ClassificationTables::defaults();
    let meter = SourceMeter::new(Box::new(mock.clone()));
    let smua = meter.root().child("smua").unwrap();

    for name in tables.constant_names() {
        let err = smua.write(name, 1.0).await.unwrap_err();
        assert!(matches!(err, SmuError::ReadOnly { .. }), "'{}'", name);
    }
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn unresolved_names_issue_zero_traffic() {
    let mock = MockTransport::new();
    mock.connect_now();

    let meter = SourceMeter::new(Box::new(mock.clone()));
    let smua = meter.root().child("smua").unwrap();

    for name in ["tspnet", "levelq", "beepboop"] {
        assert!(matches!(
            smua.resolve(name),
            Err(SmuError::UnresolvedMember { .. })
        ));
    }
    assert!(mock.writes().is_empty());
    assert!(mock.queries().is_empty());
}
