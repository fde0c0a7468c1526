//! Transaction management.
//!
//! RelDB transactions provide:
//! - **Atomicity**: all writes of a transaction become visible together or not at all
//! - **Consistency**: every write is checked against the schema when executed
//! - **Isolation**: snapshot isolation with lost update detection at commit

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{PendingWrite, Transaction, TransactionState};
