pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod narrative;
pub mod reports;
pub mod settings;
pub mod stats;
pub mod students;
