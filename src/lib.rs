pub mod anthropic;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod tracker;
pub mod ui;
pub mod workflow;
