mod bus;
mod link;
pub mod protocol;
mod transport;

pub use bus::{EventBus, LinkEvent, SubscriptionId};
pub use link::{DeviceLink, DeviceStatus, DriveController, LinkError, Ready};
pub use protocol::{Command, Frame, ProtocolEvent};
pub use transport::{Endpoint, FrameAssembler, read_frame, write_frame};
