// src/models/mod.rs
pub mod alert;
pub mod driver;
pub mod messages;
pub mod offer;
pub mod trip;

pub use alert::*;
pub use driver::*;
pub use messages::*;
pub use offer::*;
pub use trip::*;
