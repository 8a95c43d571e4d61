pub mod transport;

pub use transport::{CommandTransport, Transport};
