pub mod messages;
pub mod rest;
pub mod stream;

pub use messages::{parse_message, KrakenMessage};
pub use rest::KrakenRest;
pub use stream::KrakenClient;
