//! Command dispatch over the peripheral bus.
//!
//! Three layers, each owning one concern:
//!
//! - [`bus`]: the half-duplex transport abstraction with a framed
//!   adapter for real byte streams and a loopback for tests.
//! - [`driver`]: the single task that owns the transport, serializes
//!   every write and correlates acknowledgments.
//! - [`dispatcher`]: routing between the session registry and the
//!   driver, with offline queueing and the per-room actuator cache.

pub mod bus;
pub mod dispatcher;
pub mod driver;

pub use bus::{BusOp, BusTransport, FramedBus, LoopbackBus, LoopbackHandle};
pub use dispatcher::{AddressBook, CommandDispatcher, DispatchOutcome, RoomActuatorState};
pub use driver::{AckResult, BusDriver, BusHandle};
