pub mod attendance;
pub mod members;
pub mod payments;
