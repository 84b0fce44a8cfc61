pub mod auth;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod instance;
pub mod relations;
pub mod repository;
pub mod schema;
pub mod store;

pub use engine::{Engine, EngineBuilder};
pub use error::{AppError, AppResult};
pub use repository::Repository;

// Test-only printing helper: expands to eprintln! during tests and debug builds and is
// absent otherwise.
// Usage: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In non-test builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
