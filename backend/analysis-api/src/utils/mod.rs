pub mod retry;
pub mod stats;
pub mod time;
