pub mod drop_handlers;
pub mod health_handlers;
