pub mod client;
pub mod prompts;
pub mod rate_limit;
pub mod retry;
pub mod validation;

pub use client::*;
pub use prompts::*;
pub use rate_limit::*;
pub use retry::*;
pub use validation::*;
