//! Arbiter testing infrastructure
//!
//! Deterministic fixtures and a multi-node harness shared by the dispute
//! protocol's integration tests and the `arbiter-sim` binary.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! arbiter-testkit = { path = "../arbiter-testkit" }
//! ```
//!
//! ```rust,no_run
//! use arbiter_core::Side;
//! use arbiter_testkit::TestNetwork;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let net = TestNetwork::start().await?;
//! let dispute = net.buyer.handle.open_dispute(net.open_request(Side::Buyer)).await?;
//! # let _ = dispute;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod collaborators;
pub mod effects;
pub mod fixtures;
pub mod harness;

pub use collaborators::{RecordingTrades, RecordingWallet};
pub use effects::{FixedTimeHandler, SequentialRandom};
pub use harness::{eventually, TestNetwork, TestNode, START_MS};

use tracing_subscriber::EnvFilter;

/// Install a test subscriber honouring `RUST_LOG`; later calls are no-ops
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
