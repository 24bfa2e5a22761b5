//! Command handlers, one module per subcommand.

pub mod config_cmd;
pub mod settings;
pub mod watch;
