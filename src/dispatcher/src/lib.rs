//! Fan-out of stored artifacts to remote transfer destinations.

pub mod fanout;
pub mod progress;
pub mod secrets;
pub mod transfer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use fanout::{
    DispatchReport, Dispatcher, SkipReason, SkipRecord, TransferAttempt, TransferOutcome,
};
pub use secrets::{EnvSecretResolver, MapSecretResolver, SecretResolver};
pub use transfer::{FtpTransferClient, TransferClient, TransferError, TransferSession};
