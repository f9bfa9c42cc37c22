// Testrig Infra-Remote - subprocess bridge speaking the wire protocol

pub mod bridge;
pub mod channel;
pub mod protocol;

pub use bridge::{RemoteBridge, RemoteFactory};
pub use channel::{Channel, ChannelError, ChannelReader, ChannelWriter};
pub use protocol::{Encoding, ProtocolError, RemoteProtocolEngine};
