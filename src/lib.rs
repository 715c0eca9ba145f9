pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod generators;
pub mod log;
pub mod parser;
pub mod pool;
pub mod producer;
pub mod recording;
pub mod scheduler;
pub mod store;
pub mod timing;
pub mod turn;
pub mod util;

pub use error::{Error, Result};
pub use scheduler::{Scheduler, SchedulerEvent, StopReason};
pub use turn::{Turn, TurnRecord, WritingState};
