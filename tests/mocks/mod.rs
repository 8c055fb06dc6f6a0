pub mod transport;

pub use transport::{json_response, MockTransport};
