pub mod integrations;
pub mod jobs;
pub mod runs;
pub mod scheduler;
