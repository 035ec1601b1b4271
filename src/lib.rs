pub mod api;
pub mod catalog;
pub mod cli;
pub mod conversion;
pub mod env_boot;
pub mod facts;
pub mod normalization;
pub mod orchestrator;
pub mod resolution;
pub mod telemetry;

pub mod util {
    pub mod db;
    pub mod env;
}
