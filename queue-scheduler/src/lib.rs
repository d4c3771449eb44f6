//! The recurring scheduler: in-memory schedule entries materialized into
//! Job rows on a fixed interval.

pub mod error;
pub mod scheduler;

pub use error::ScheduleError;
pub use scheduler::{daily, every_n_hours, every_n_minutes, weekly, NewSchedule, RecurringScheduler, ScheduleEntry};
