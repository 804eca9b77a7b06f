mod server;
mod settings;

pub use server::{Components, run};
pub use settings::Settings;
