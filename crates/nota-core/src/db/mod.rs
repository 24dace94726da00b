//! Local replica storage for Nota

mod connection;
mod migrations;
mod replica;

pub use connection::Database;
pub use replica::{LibSqlReplicaStore, ReplicaStore};
