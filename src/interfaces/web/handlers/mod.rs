pub mod jobs;
pub mod logs;
pub mod stream;
