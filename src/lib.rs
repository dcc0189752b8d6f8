pub mod backend;
pub mod bridge;
pub mod engine;
pub mod model;
pub mod utils;

// Re-export common items
pub use engine::{DeviceSpec, Engine, EngineError, RunOptions};
pub use model::{TestCase, TestResult};
