pub mod alarm;
pub mod bi;
pub mod bus;
pub mod config;
pub mod engine;
pub mod locks;
pub mod message;
pub mod monitor;
pub mod pipeline;
pub mod storage;
pub mod util;

pub use engine::Engine;
