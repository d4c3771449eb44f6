use thiserror::Error;

/// Errors raised while validating or looking up schedule entries.
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("schedule queue must not be empty")]
    EmptyQueue,
    #[error("schedule job type must not be empty")]
    EmptyType,
    #[error("schedule interval must be strictly positive")]
    NonPositiveInterval,
    #[error("no schedule with id {0}")]
    NotFound(String),
}
