//! Pure membership rules. Nothing in here touches storage or reads the wall
//! clock; callers pass `now` and persist the results.

pub mod attendance;
pub mod couple;
pub mod fingerprint;
pub mod registration;
pub mod renewal;
pub mod status;
