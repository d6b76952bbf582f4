//! The instrument session: connection lifecycle, remote I/O primitives,
//! and mid-level control helpers.
//!
//! [`SourceMeter`] owns the transport, the classification tables, and the
//! namespace node arena. All remote traffic funnels through two
//! primitives: a raw line write and a query that wraps its expression in
//! the protocol's `print(...)` convention. The transport sits behind a
//! mutex that is held for exactly one send(+receive) round-trip, so
//! request/response pairing can never interleave; the lock is never held
//! across higher-level operations.
//!
//! Session state (busy indicator, cancellation token) is scoped to the
//! connection object, not to the process.

use crate::adapters::Transport;
use crate::config::PollSettings;
use crate::error::{SmuError, SmuResult};
use crate::protocol::namespace::{NodeArena, RemoteNode, ROOT_NODE};
use crate::protocol::response::Value;
use crate::protocol::tables::ClassificationTables;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;

/// One of the two source-measure channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SmuChannel {
    /// Channel A (`smua`).
    A,
    /// Channel B (`smub`).
    B,
}

impl SmuChannel {
    /// The channel's name in the remote namespace.
    pub fn name(&self) -> &'static str {
        match self {
            SmuChannel::A => "smua",
            SmuChannel::B => "smub",
        }
    }

    /// The other channel.
    pub fn other(&self) -> SmuChannel {
        match self {
            SmuChannel::A => SmuChannel::B,
            SmuChannel::B => SmuChannel::A,
        }
    }
}

/// Beeper chord direction, played on connect/disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chord {
    /// Rising chord.
    Up,
    /// Falling chord.
    Down,
}

/// Cooperative cancellation handle for a measurement session.
///
/// Any thread may set it at any time; the sweep machinery observes it
/// only at documented checkpoints (before configuring a sweep, between
/// bias points). It must be explicitly re-armed before a new measurement
/// sequence; the orchestrator does this on entry.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, unsignalled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear the signal so a new sequence can run.
    pub fn rearm(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Shared driver core: transport, tables, node arena, session flags.
pub(crate) struct Core {
    transport: Mutex<Box<dyn Transport>>,
    tables: ClassificationTables,
    arena: StdMutex<NodeArena>,
    cancel: CancelToken,
    busy_depth: AtomicUsize,
    pub(crate) poll: PollSettings,
}

impl Core {
    pub(crate) fn tables(&self) -> &ClassificationTables {
        &self.tables
    }

    pub(crate) fn with_arena<R>(&self, f: impl FnOnce(&mut NodeArena) -> R) -> R {
        let mut guard = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Send one raw command line; no reply is read.
    pub(crate) async fn send(&self, line: &str) -> SmuResult<()> {
        debug!("-> {}", line);
        let mut transport = self.transport.lock().await;
        transport.write_line(line).await
    }

    /// Query one expression through the protocol's print wrapper and
    /// decode the reply. The transport lock is held for exactly this one
    /// round-trip.
    pub(crate) async fn query_expr(&self, expr: &str) -> SmuResult<Value> {
        let line = format!("print({})", expr);
        debug!("-> {}", line);
        let raw = {
            let mut transport = self.transport.lock().await;
            transport.query_line(&line).await?
        };
        debug!("<- {}", raw);
        Ok(Value::decode(raw.trim()))
    }

    /// Query an expression that must answer with a number.
    pub(crate) async fn query_f64(&self, expr: &str) -> SmuResult<f64> {
        let value = self.query_expr(expr).await?;
        value.as_f64().ok_or_else(|| SmuError::UnexpectedResponse {
            expr: expr.to_string(),
            got: value.encode(),
        })
    }
}

/// RAII busy marker. Nesting is allowed (an orchestration holds one while
/// each sweep holds its own); the instrument reads busy while any marker
/// is alive.
pub(crate) struct BusyGuard {
    core: Arc<Core>,
}

impl BusyGuard {
    pub(crate) fn hold(core: &Arc<Core>) -> Self {
        core.busy_depth.fetch_add(1, Ordering::SeqCst);
        BusyGuard {
            core: Arc::clone(core),
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.core.busy_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A dual-channel source-measure unit session.
///
/// Base commands mirror the instrument's own remote syntax through the
/// namespace proxy:
///
/// ```no_run
/// # async fn demo() -> smu_daq::SmuResult<()> {
/// use smu_daq::{adapters::TcpTransport, SourceMeter};
///
/// let mut k = SourceMeter::new(Box::new(TcpTransport::new("192.168.2.121:5025")));
/// k.connect().await?;
/// let smua = k.root().child("smua")?;
/// smua.descend("source")?.write("levelv", -40.0).await?; // apply -40 V
/// let v = smua.descend("measure")?.function("v")?.call(&[]).await?;
/// println!("measured {v}");
/// # Ok(())
/// # }
/// ```
pub struct SourceMeter {
    core: Arc<Core>,
}

impl SourceMeter {
    /// Create a session over the given transport with the built-in
    /// classification tables and default polling behavior. Not yet
    /// connected.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_tables(transport, ClassificationTables::defaults())
    }

    /// Create a session with custom classification tables (e.g. extended
    /// for a newer firmware).
    pub fn with_tables(transport: Box<dyn Transport>, tables: ClassificationTables) -> Self {
        SourceMeter {
            core: Arc::new(Core {
                transport: Mutex::new(transport),
                tables,
                arena: StdMutex::new(NodeArena::new()),
                cancel: CancelToken::new(),
                busy_depth: AtomicUsize::new(0),
                poll: PollSettings::default(),
            }),
        }
    }

    /// Replace the sweep-completion polling settings.
    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        // The core has not been shared yet at construction time.
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.poll = poll;
        }
        self
    }

    /// Open the transport and greet the operator with a rising chord.
    pub async fn connect(&mut self) -> SmuResult<()> {
        {
            let mut transport = self.core.transport.lock().await;
            info!("connecting to {}", transport.info());
            transport.connect().await?;
        }
        self.play_chord(Chord::Up).await?;
        info!("instrument connected");
        Ok(())
    }

    /// Play the falling chord and close the transport.
    pub async fn disconnect(&mut self) -> SmuResult<()> {
        if self.is_connected().await {
            if let Err(e) = self.play_chord(Chord::Down).await {
                warn!("disconnect chord failed: {}", e);
            }
            let mut transport = self.core.transport.lock().await;
            transport.disconnect().await?;
            info!("instrument disconnected");
        }
        Ok(())
    }

    /// True while the transport is live.
    pub async fn is_connected(&self) -> bool {
        self.core.transport.lock().await.is_connected()
    }

    /// The root of the remote namespace.
    pub fn root(&self) -> RemoteNode {
        RemoteNode::new(Arc::clone(&self.core), ROOT_NODE)
    }

    /// The namespace node for one source-measure channel.
    pub fn smu(&self, channel: SmuChannel) -> SmuResult<RemoteNode> {
        self.root().child(channel.name())
    }

    /// Cancellation handle for this session. Clone it into whatever
    /// thread needs to interrupt a measurement.
    pub fn cancel_token(&self) -> CancelToken {
        self.core.cancel.clone()
    }

    /// Coarse busy indicator: true while a sweep or measurement is in
    /// flight. A status flag, not a lock.
    pub fn is_busy(&self) -> bool {
        self.core.busy_depth.load(Ordering::SeqCst) > 0
    }

    /// Broadcast the software trigger event that starts an armed sweep.
    pub async fn send_trigger(&self) -> SmuResult<()> {
        self.core.send("*trg").await
    }

    /// Reset the instrument to power-on defaults (outputs off).
    pub async fn reset(&self) -> SmuResult<()> {
        self.root().function("reset")?.call(&[]).await?;
        Ok(())
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.core
    }

    #[cfg(test)]
    pub(crate) fn arena_len(&self) -> usize {
        self.core.with_arena(|a| a.len())
    }

    /// Drain one on-instrument sample buffer.
    ///
    /// Reads the element count, then each element in order (elements
    /// count from 1), then clears the buffer and its cache for reuse.
    pub async fn read_buffer(&self, buffer: &RemoteNode) -> SmuResult<Vec<f64>> {
        let len_expr = buffer.path().child("n");
        let n = self.core.query_f64(len_expr.as_str()).await? as usize;

        let mut samples = Vec::with_capacity(n);
        for i in 1..=n {
            let elem = buffer.path().index(i as u32);
            samples.push(self.core.query_f64(elem.as_str()).await?);
        }

        buffer.function("clear")?.call(&[]).await?;
        buffer.function("clearcache")?.call(&[]).await?;
        Ok(samples)
    }

    /// Clear the sample buffers of both channels.
    pub async fn clear_buffers(&self) -> SmuResult<()> {
        for channel in [SmuChannel::A, SmuChannel::B] {
            let smu = self.smu(channel)?;
            let buffer1 = smu.child("nvbuffer1")?;
            let buffer2 = smu.child("nvbuffer2")?;

            buffer1.function("clear")?.call(&[]).await?;
            buffer2.function("clear")?.call(&[]).await?;
            buffer1.function("clearcache")?.call(&[]).await?;
            buffer2.function("clearcache")?.call(&[]).await?;
        }
        Ok(())
    }

    /// Set a channel's measurement integration time, in seconds.
    ///
    /// The instrument wants power-line cycles, so the configured time is
    /// converted with the line frequency reported by the instrument.
    pub async fn set_integration_time(&self, channel: SmuChannel, seconds: f64) -> SmuResult<()> {
        let linefreq = self.core.query_f64("localnode.linefreq").await?;
        let nplc = seconds * linefreq;
        self.smu(channel)?
            .child("measure")?
            .write("nplc", nplc)
            .await
    }

    /// Turn a channel's output on and source the given voltage.
    pub async fn apply_voltage(&self, channel: SmuChannel, volts: f64) -> SmuResult<()> {
        let smu = self.smu(channel)?;
        let output_on = smu.read("OUTPUT_ON").await?;
        let source = smu.child("source")?;
        source.write("output", output_on).await?;
        source.write("levelv", volts).await?;
        Ok(())
    }

    /// Source the given current from a channel and turn its output on.
    pub async fn apply_current(&self, channel: SmuChannel, amps: f64) -> SmuResult<()> {
        let smu = self.smu(channel)?;
        let output_on = smu.read("OUTPUT_ON").await?;
        let source = smu.child("source")?;
        source.write("leveli", amps).await?;
        source.write("output", output_on).await?;
        Ok(())
    }

    /// Step a channel's source voltage to `target`, settling `delay`
    /// seconds between steps of at most `step_size` volts. Beeps when the
    /// target is reached.
    pub async fn ramp_to_voltage(
        &self,
        channel: SmuChannel,
        target: f64,
        step_size: f64,
        delay: f64,
    ) -> SmuResult<()> {
        let smu = self.smu(channel)?;
        let source = smu.child("source")?;

        let output_on = smu.read("OUTPUT_ON").await?;
        source.write("output", output_on).await?;

        let level_expr = source.path().child("levelv");
        let mut level = self.core.query_f64(level_expr.as_str()).await?;
        if level == target {
            return Ok(());
        }

        // Show live voltage on both channel displays during the ramp.
        let display = self.root().child("display")?;
        let dcvolts = display.read("MEASURE_DCVOLTS").await?;
        display
            .descend("smua.measure")?
            .write("func", dcvolts.clone())
            .await?;
        display.descend("smub.measure")?.write("func", dcvolts).await?;

        let step = step_size.abs() * (target - level).signum();
        let measure_v = smu.child("measure")?.function("v")?;

        while level != target {
            level += step;
            if (step > 0.0 && level > target) || (step < 0.0 && level < target) {
                level = target;
            }
            source.write("levelv", level).await?;
            measure_v.call(&[]).await?;
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }

        let reached = measure_v.call(&[]).await?;
        info!("source level settled at {} V", reached);

        self.root()
            .child("beeper")?
            .function("beep")?
            .call(&[0.3.into(), 2400.0.into()])
            .await?;
        Ok(())
    }

    /// Play a three-note beeper chord.
    pub async fn play_chord(&self, direction: Chord) -> SmuResult<()> {
        const NOTES: [f64; 3] = [1046.5, 1318.5, 1568.0];
        let beep = self.root().child("beeper")?.function("beep")?;

        let mut notes = NOTES;
        if direction == Chord::Down {
            notes.reverse();
        }
        for freq in notes {
            beep.call(&[0.3.into(), freq.into()]).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;

    #[test]
    fn channel_names() {
        assert_eq!(SmuChannel::A.name(), "smua");
        assert_eq!(SmuChannel::B.name(), "smub");
        assert_eq!(SmuChannel::A.other(), SmuChannel::B);
    }

    #[test]
    fn cancel_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.rearm();
        assert!(!token.is_cancelled());

        // Clones observe the same flag.
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn connect_plays_rising_chord() {
        let mock = MockTransport::new();
        let mut meter = SourceMeter::new(Box::new(mock.clone()));

        meter.connect().await.unwrap();
        assert!(meter.is_connected().await);

        let beeps: Vec<String> = mock
            .writes()
            .into_iter()
            .filter(|w| w.contains("beeper.beep"))
            .collect();
        assert_eq!(beeps.len(), 3);
        assert!(beeps[0].contains("1046.5"));
        assert!(beeps[2].contains("1568"));
    }

    #[tokio::test]
    async fn query_without_connection_is_fatal() {
        let meter = SourceMeter::new(Box::new(MockTransport::new()));
        let err = meter.root().child("smua").unwrap().read("ENABLE").await;
        assert!(matches!(err, Err(SmuError::NotConnected)));
    }

    #[tokio::test]
    async fn busy_flag_nests() {
        let meter = SourceMeter::new(Box::new(MockTransport::new()));
        assert!(!meter.is_busy());
        {
            let _outer = BusyGuard::hold(meter.core());
            let _inner = BusyGuard::hold(meter.core());
            assert!(meter.is_busy());
            drop(_inner);
            assert!(meter.is_busy());
        }
        assert!(!meter.is_busy());
    }

    #[tokio::test]
    async fn read_buffer_drains_and_clears() {
        let mock = MockTransport::new();
        mock.connect_now();
        mock.set_value("smua.nvbuffer1.n", "3");
        mock.set_value("smua.nvbuffer1[1]", "0.1");
        mock.set_value("smua.nvbuffer1[2]", "0.2");
        mock.set_value("smua.nvbuffer1[3]", "0.3");

        let meter = SourceMeter::new(Box::new(mock.clone()));
        let buffer = meter
            .root()
            .child("smua")
            .unwrap()
            .child("nvbuffer1")
            .unwrap();

        let samples = meter.read_buffer(&buffer).await.unwrap();
        assert_eq!(samples, vec![0.1, 0.2, 0.3]);
        assert_eq!(mock.count_writes(|w| w.contains("nvbuffer1.clear()")), 1);
        assert_eq!(
            mock.count_writes(|w| w.contains("nvbuffer1.clearcache()")),
            1
        );
    }

    #[tokio::test]
    async fn read_buffer_rejects_non_numeric_length() {
        let mock = MockTransport::new();
        mock.connect_now();
        // "n" defaults to nil in the mock; that is not a usable length.
        let meter = SourceMeter::new(Box::new(mock.clone()));
        let buffer = meter
            .root()
            .child("smua")
            .unwrap()
            .child("nvbuffer1")
            .unwrap();
        assert!(matches!(
            meter.read_buffer(&buffer).await,
            Err(SmuError::UnexpectedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn integration_time_converts_to_line_cycles() {
        let mock = MockTransport::new();
        mock.connect_now();
        mock.set_value("localnode.linefreq", "50");

        let meter = SourceMeter::new(Box::new(mock.clone()));
        meter
            .set_integration_time(SmuChannel::A, 0.1)
            .await
            .unwrap();
        assert!(mock
            .writes()
            .contains(&"smua.measure.nplc = 5".to_string()));
    }

    #[tokio::test]
    async fn apply_voltage_enables_output_first() {
        let mock = MockTransport::new();
        mock.connect_now();
        mock.set_value("smub.OUTPUT_ON", "1");

        let meter = SourceMeter::new(Box::new(mock.clone()));
        meter.apply_voltage(SmuChannel::B, -60.0).await.unwrap();

        let writes = mock.writes();
        let output_pos = writes
            .iter()
            .position(|w| w == "smub.source.output = 1")
            .unwrap();
        let level_pos = writes
            .iter()
            .position(|w| w == "smub.source.levelv = -60")
            .unwrap();
        assert!(output_pos < level_pos);
    }
}
