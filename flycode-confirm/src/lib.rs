//! Confirmation Center: the pending/approved/rejected/timeout state
//! machine gating tools that require a human round-trip (`spec.md` §4.I).

mod center;
mod types;

pub use center::ConfirmationCenter;
pub use types::ConfirmationEntry;
pub use types::ConfirmationStatus;
pub use types::CreatePendingInput;
pub use types::ResolveInput;
