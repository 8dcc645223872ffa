pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod isolate;
pub mod reporter;
pub mod runner;
pub mod session;

#[cfg(test)]
mod testing;

/// Stack for the thread that runs user code; deep recursion is bounded by
/// the engine's recursion limit well before this is exhausted
pub const ISOLATE_STACK_BYTES: usize = 64 * 1024 * 1024;
