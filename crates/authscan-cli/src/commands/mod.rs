pub mod autoscaler;
pub mod bulk;
pub mod detect;
pub mod repo;
pub mod scan;
pub mod secrets;
