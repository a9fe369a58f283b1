pub mod connection;
pub mod dispatch;
pub mod protocol;
pub mod sessions;
