pub mod claude;

pub use claude::ClaudeLauncher;
