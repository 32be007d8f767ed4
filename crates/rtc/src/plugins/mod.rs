//! Built-in room plugins.

mod idle;
mod monitor;
mod record;

pub use idle::IdleMonitorPlugin;
pub use monitor::AudioLevelPlugin;
pub use record::RecordToDiskPlugin;
