mod dirs;
mod settings;
mod validation;

pub use dirs::{default_config_path, resolve_config_path};
pub use settings::{
    ClientSettings, Config, ConnectSettings, GUI_MODULE_TYPE, LaunchSpec, ModuleEntry,
    ServerRequirement,
};
pub use validation::{is_valid_name, warn_unknown_fields};
