pub mod installer;
pub mod manager;

pub use installer::Installer;
pub use manager::NodeManager;
