pub mod api;
pub mod domain;
pub mod settings;

pub use domain::{PendingAction, PowerAction, StatusSnapshot};
pub use settings::Settings;
