//! Built-in workers

mod commenter;
mod http_job;

pub use commenter::Commenter;
pub use http_job::{HttpJobParams, HttpOperation};

pub const COMMENTER: &str = "Commenter";
pub const HTTP_JOB: &str = "HttpJob";
pub const HTTP_JOB_WAITER: &str = "HttpJobWaiter";
