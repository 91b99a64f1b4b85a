pub mod bootstrap;
pub mod export;
pub mod ledger;
pub mod notifications;
pub mod plans;
pub mod reminders;
pub mod snapshot;
pub mod timer;
pub mod tracker;
