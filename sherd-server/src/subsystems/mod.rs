pub mod analyze;
pub mod uploads;
