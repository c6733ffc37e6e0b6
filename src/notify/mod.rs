pub mod history;
pub mod router;
pub mod status;

pub use router::{NotificationRouter, Routed};
pub use status::StatusFrame;
