//! Small helpers shared by the console front end

pub mod time;

pub use time::*;
