pub mod commands;
pub mod driver;
pub mod emergency;
pub mod error;
pub mod machine;
pub mod shake;
pub mod throttle;

pub use commands::{Command, Language};
pub use error::InteractionError;
pub use machine::{Effect, Event, InteractionState, Session, Timings};
