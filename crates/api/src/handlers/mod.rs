pub mod groups;
pub mod health;
pub mod missing_data;
pub mod plugins;
pub mod schedule;
pub mod sync;
