pub mod forecaster;
pub mod indicators;
pub mod insights;
pub mod lstm;
pub mod metrics;
pub mod pipeline;
pub mod portfolio;
pub mod processor;
