//! Hardware abstraction layer for the beacon connection transport
//!
//! The platform Bluetooth stack sits behind [`GattTransport`]: requests are
//! issued through the trait and their results come back later as
//! [`TransportEvent`]s on a channel, possibly from another thread.

pub mod codec;
pub mod error;
pub mod mock;
pub mod transport;

pub use error::{CodecError, TransportError, TransportResult};
pub use mock::{MockBeacon, MockFault, MockRequest, MockTransport};
pub use transport::{
    GattCharacteristic, GattService, GattTransport, SessionHandle, TransportEvent,
    TransportEventReceiver, TransportEventSender,
};
