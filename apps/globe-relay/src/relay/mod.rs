pub mod connection;
pub mod fanout;
pub mod presence;
pub mod registry;
pub mod server;
