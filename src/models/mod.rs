pub mod bar;
pub mod config;
pub mod forecast;
pub mod metadata;
pub mod portfolio;
pub mod result;
pub mod series;
