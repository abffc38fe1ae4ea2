//! Configuration for the parley relay.
//!
//! Config files are discovered as `parley.{toml,yaml,yml,json}` in the working
//! directory, then in `~/.config/parley/`. `${VAR}` placeholders are expanded
//! from the environment before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, data_dir, discover_and_load, find_config_file, load_config,
        set_config_dir,
    },
    schema::{
        HubConfig, OtpConfig, ParleyConfig, SecretsBackend, SecretsConfig, ServerConfig,
        SessionConfig,
    },
};
