mod config;
mod context;
mod detector;
mod driver;
mod engine;
mod phase;
mod result;
mod signature;
mod source;
mod stats;
mod trace;
mod utils;

pub use config::*;
pub use context::*;
pub use detector::*;
pub use driver::*;
pub use engine::*;
pub use phase::*;
pub use result::*;
pub use signature::*;
pub use source::*;
pub use stats::*;
pub use trace::*;
pub use utils::*;
