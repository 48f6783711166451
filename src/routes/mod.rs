pub mod enquiries;
pub mod health;
pub mod providers;
