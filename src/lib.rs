//! Personal punch clock. Tracks how much of the day went to work and how much to rest, keeps
//! every open viewer up to date over websockets and records the totals of each day.
//!

pub mod clients;
pub mod daemon;
pub mod tracker;
pub mod utils;
