pub mod clipboard;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod hash;
pub mod history;
pub mod images;
pub mod logging;
pub mod ranking;
pub mod scoring;
pub mod settings;
pub mod storage;
pub mod tui;
