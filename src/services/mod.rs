pub mod intake;
pub mod object_store;
pub mod penduduk_service;
pub mod penduduk_store;

#[cfg(test)]
pub mod testing;
