pub mod health_handlers;
pub mod penduduk_handlers;
