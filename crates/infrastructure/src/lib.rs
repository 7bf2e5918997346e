pub mod database;
pub mod trigger;

pub use database::*;
pub use trigger::TokioTriggerService;
