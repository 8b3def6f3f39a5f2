pub mod codec;
pub mod command;
pub mod frame;
pub mod socket;

pub use codec::BusCodec;
pub use command::{AckPayload, ActionPayload, BuzzerPattern, Command, CommandKind};
pub use frame::{Frame, FrameKind};
pub use socket::{
    ButtonKind, ClientMessage, DeviceEvent, DeviceSocketCodec, GatewayNotification,
    GatewaySocketCodec, ServerMessage, SocketCodec,
};
