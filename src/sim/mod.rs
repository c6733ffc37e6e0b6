pub mod peripheral;
pub mod status_feed;

pub use peripheral::SimTransport;
