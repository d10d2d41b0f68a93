//! Shared primitives for the lumentip ledger: fixed-precision amounts,
//! strkey address validation, the deposit memo protocol, and the command
//! model exchanged with chat adapters.

mod address;
mod amount;
mod command;
mod memo;
mod queue;

pub use address::{validate_public_key, Address, AddressError};
pub use amount::{Amount, AmountError, AMOUNT_SCALE};
pub use command::{Command, CommandMeta};
pub use memo::{AccountRef, MemoRoute};
pub use queue::{CommandQueue, MemoryQueue};
