pub mod http;
pub mod server;
pub mod subsystems;

#[cfg(test)]
pub(crate) mod testing;
