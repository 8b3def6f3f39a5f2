//! Session tracking for the room gateway.
//!
//! This crate owns the control-plane view of connected peripherals:
//!
//! - [`SessionRegistry`]: identity, role, room assignment, connection
//!   epoch, and liveness state for every device, plus per-device
//!   outbound queues that survive disconnects.
//! - [`HeartbeatMonitor`]: the periodic sweep that flags silent sessions
//!   as timed out.
//! - [`OutboundQueue`]: the bounded, TTL-expiring command queue used for
//!   offline delivery.
//!
//! # Example
//!
//! ```
//! use roomgate_core::{DeviceId, DeviceRole};
//! use roomgate_session::SessionRegistry;
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = SessionRegistry::new();
//! let (tx, _rx) = mpsc::channel(8);
//! let device = DeviceId::new("rfid-1").unwrap();
//!
//! let epoch = registry
//!     .register(device.clone(), DeviceRole::SensorInput, None, tx)
//!     .await;
//! assert!(registry.touch(&device, epoch).await);
//! # }
//! ```

pub mod monitor;
pub mod queue;
pub mod registry;

pub use monitor::HeartbeatMonitor;
pub use queue::OutboundQueue;
pub use registry::{ConnectionHandle, Epoch, SessionRegistry, SessionSnapshot};
