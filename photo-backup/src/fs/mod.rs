//! Local filesystem layout: destination planning, inventory scanning and
//! durable placement of finished files.

pub mod durable;
pub mod planner;
pub mod walker;
