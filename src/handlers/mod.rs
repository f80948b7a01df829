pub mod health_handlers;
pub mod transfer_handlers;
