//! Mock transport for testing without hardware.
//!
//! Replies come from three places, in priority order:
//! 1. scripted reply queues, keyed by the queried expression (useful for
//!    values that change between polls, like status registers);
//! 2. an echo store that records every `path = value` write, so a
//!    written property reads back its own value;
//! 3. the literal `nil`, matching an instrument that has no value for an
//!    expression.
//!
//! Every written line and every queried expression is logged for test
//! verification. Clones share state, so a test can keep one handle for
//! assertions while the instrument owns the other.

use super::Transport;
use crate::error::{SmuError, SmuResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MockState {
    connected: AtomicBool,
    store: Mutex<HashMap<String, String>>,
    scripted: Mutex<HashMap<String, VecDeque<String>>>,
    writes: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
}

/// Shared-state mock transport.
///
/// # Example
///
/// ```
/// use smu_daq::adapters::{MockTransport, Transport};
///
/// # tokio_test::block_on(async {
/// let mut mock = MockTransport::new();
/// mock.connect().await.unwrap();
/// mock.write_line("smua.source.levelv = 1.5").await.unwrap();
/// let reply = mock.query_line("print(smua.source.levelv)").await.unwrap();
/// assert_eq!(reply, "1.5");
/// # })
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockState>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Create a fresh, disconnected mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the mock connected without going through `connect()`, so
    /// tests skip the connection-time chatter.
    pub fn connect_now(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
    }

    /// Seed the echo store: `expr` will answer `reply` until overwritten.
    pub fn set_value(&self, expr: &str, reply: &str) {
        lock(&self.inner.store).insert(expr.to_string(), reply.to_string());
    }

    /// Queue scripted replies for one expression; they are consumed in
    /// order before the echo store is consulted.
    pub fn script_replies(&self, expr: &str, replies: &[&str]) {
        let mut scripted = lock(&self.inner.scripted);
        let queue = scripted.entry(expr.to_string()).or_default();
        queue.extend(replies.iter().map(|r| r.to_string()));
    }

    /// Every raw line written so far.
    pub fn writes(&self) -> Vec<String> {
        lock(&self.inner.writes).clone()
    }

    /// Every queried expression so far (print wrapper stripped).
    pub fn queries(&self) -> Vec<String> {
        lock(&self.inner.queries).clone()
    }

    /// Count of writes whose line satisfies `pred`.
    pub fn count_writes(&self, pred: impl Fn(&str) -> bool) -> usize {
        lock(&self.inner.writes).iter().filter(|w| pred(w)).count()
    }

    /// Forget all logged traffic (the store and scripts are kept).
    pub fn clear_logs(&self) {
        lock(&self.inner.writes).clear();
        lock(&self.inner.queries).clear();
    }

    fn strip_print(line: &str) -> &str {
        line.strip_prefix("print(")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(line)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> SmuResult<()> {
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> SmuResult<()> {
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn write_line(&mut self, line: &str) -> SmuResult<()> {
        if !self.is_connected() {
            return Err(SmuError::NotConnected);
        }
        lock(&self.inner.writes).push(line.to_string());

        // Echo assignments into the store so properties read back.
        if let Some((lhs, rhs)) = line.split_once(" = ") {
            lock(&self.inner.store).insert(lhs.to_string(), rhs.to_string());
        }
        Ok(())
    }

    async fn query_line(&mut self, line: &str) -> SmuResult<String> {
        if !self.is_connected() {
            return Err(SmuError::NotConnected);
        }
        let expr = Self::strip_print(line).to_string();
        lock(&self.inner.queries).push(expr.clone());

        if let Some(queue) = lock(&self.inner.scripted).get_mut(&expr) {
            if let Some(reply) = queue.pop_front() {
                return Ok(reply);
            }
        }
        if let Some(reply) = lock(&self.inner.store).get(&expr) {
            return Ok(reply.clone());
        }
        Ok("nil".to_string())
    }

    fn info(&self) -> String {
        "MockTransport".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refuses_traffic_when_disconnected() {
        let mut mock = MockTransport::new();
        assert!(matches!(
            mock.write_line("x = 1").await,
            Err(SmuError::NotConnected)
        ));
        assert!(matches!(
            mock.query_line("print(x)").await,
            Err(SmuError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn writes_echo_into_the_store() {
        let mut mock = MockTransport::new();
        mock.connect_now();

        mock.write_line("smua.source.levelv = -40").await.unwrap();
        let reply = mock.query_line("print(smua.source.levelv)").await.unwrap();
        assert_eq!(reply, "-40");
    }

    #[tokio::test]
    async fn scripted_replies_win_and_drain_in_order() {
        let mut mock = MockTransport::new();
        mock.connect_now();
        mock.set_value("status.operation.sweeping.condition", "0");
        mock.script_replies("status.operation.sweeping.condition", &["2", "6"]);

        let q = "print(status.operation.sweeping.condition)";
        assert_eq!(mock.query_line(q).await.unwrap(), "2");
        assert_eq!(mock.query_line(q).await.unwrap(), "6");
        // Queue drained; the store answers now.
        assert_eq!(mock.query_line(q).await.unwrap(), "0");
    }

    #[tokio::test]
    async fn unknown_expressions_answer_nil() {
        let mut mock = MockTransport::new();
        mock.connect_now();
        assert_eq!(mock.query_line("print(smua.ENABLE)").await.unwrap(), "nil");
    }

    #[tokio::test]
    async fn logs_are_shared_across_clones() {
        let mock = MockTransport::new();
        mock.connect_now();
        let mut moved = mock.clone();

        moved.write_line("*trg").await.unwrap();
        moved.query_line("print(result)").await.unwrap();

        assert_eq!(mock.writes(), vec!["*trg".to_string()]);
        assert_eq!(mock.queries(), vec!["result".to_string()]);
    }
}
