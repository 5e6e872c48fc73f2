pub mod errors;

pub use errors::{PolishError, PolishResult};
