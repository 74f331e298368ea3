// 导出模块供测试和外部使用
pub mod api;
pub mod args;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod prompt;
pub mod service;
pub mod webui;

pub use error::{Result, ServiceError};
