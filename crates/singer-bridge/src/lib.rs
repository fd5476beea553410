pub mod catalog;
pub mod errors;
pub mod interpolate;
pub mod package_manager;
pub mod plugin;
pub mod record_counter;
pub mod run_spec;
pub mod runner;
pub mod state;
pub mod tap;
pub mod target;
pub mod tempfile_json;

pub use catalog::Catalog;
pub use errors::{Error, Result};
pub use plugin::{Config, Plugin};
pub use runner::{LogSink, Runner};
pub use state::StateStore;
pub use tap::Tap;
pub use target::Target;
