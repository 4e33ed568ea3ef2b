//! Level 2: Integration Tests

mod discovery;
mod patcher;
mod resolver;
