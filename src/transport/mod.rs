pub mod traits;

#[cfg(test)]
pub mod testing;

pub use traits::{ConnectionId, Outbound};
