//! # SMU DAQ Core Library
//!
//! This crate drives dual-channel source-measure units that speak a
//! line-oriented, Lua-flavored remote command protocol over a
//! point-to-point connection. Instead of hand-written bindings for a
//! large, firmware-versioned command set, the remote namespace is
//! projected locally through a dynamic proxy, and synchronized
//! two-channel voltage sweeps are run through the instrument's own
//! hardware trigger model.
//!
//! ## Crate Structure
//!
//! - **`adapters`**: the [`Transport`](adapters::Transport) trait plus
//!   concrete TCP, serial, and mock transports. The protocol layers are
//!   transport-agnostic.
//! - **`protocol`**: reply decoding ([`Value`]), command paths,
//!   classification tables, and the memoizing namespace proxy
//!   ([`RemoteNode`] and friends).
//! - **`instrument`**: the [`SourceMeter`] session object — connection
//!   lifecycle, remote I/O primitives, buffer drains, and mid-level
//!   helpers such as `apply_voltage` and `ramp_to_voltage`.
//! - **`sweep`**: the triggered sweep sequencer, result containers, and
//!   the transfer/output curve orchestrator.
//! - **`config`**: TOML settings for connection, polling, and vocabulary
//!   extensions, loaded with the `config` crate.
//! - **`error`**: the [`SmuError`] enum for centralized error handling.
//!
//! ## Example
//!
//! ```no_run
//! # async fn demo() -> smu_daq::SmuResult<()> {
//! use smu_daq::adapters::TcpTransport;
//! use smu_daq::sweep::{FixedMode, SweepConfig};
//! use smu_daq::{SmuChannel, SourceMeter};
//!
//! let mut k = SourceMeter::new(Box::new(TcpTransport::new("192.168.2.121:5025")));
//! k.connect().await?;
//!
//! // Base commands mirror the instrument's own syntax:
//! let smua = k.root().child("smua")?;
//! smua.descend("source")?.write("levelv", -40.0).await?;
//!
//! // Record a full IV curve:
//! let traces = k
//!     .voltage_sweep(&SweepConfig {
//!         sweep_channel: SmuChannel::A,
//!         fixed_channel: SmuChannel::B,
//!         start: 0.0,
//!         stop: -60.0,
//!         step: 1.0,
//!         fixed: FixedMode::Bias(0.0),
//!         integration_time: 0.1,
//!         delay: -1.0,
//!         pulsed: false,
//!     })
//!     .await?;
//! println!("{} points", traces.len());
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod instrument;
pub mod protocol;
pub mod sweep;

pub use error::{SmuError, SmuResult};
pub use instrument::{CancelToken, Chord, SmuChannel, SourceMeter};
pub use protocol::namespace::{Member, RemoteFunction, RemoteList, RemoteNode};
pub use protocol::path::CommandPath;
pub use protocol::response::Value;
pub use protocol::tables::{ClassificationTables, NameKind};
pub use sweep::{
    Direction, FixedMode, OutputCurve, SweepConfig, SweepKind, SweepSet, SweepTraces,
    TransferCurve,
};
