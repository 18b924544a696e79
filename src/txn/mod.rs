// src/txn/mod.rs

//! 事务：MULTI / EXEC / DISCARD，以及 WATCH 乐观锁（见 `engine::watch`）

pub mod executor;
pub mod session;

pub use executor::exec_all;
pub use session::TxnSession;
