pub mod gaps;
pub mod models;
pub mod recurrence;
pub mod time;
