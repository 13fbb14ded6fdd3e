//! branchgate spend controller
//!
//! Turns "spend through branch X" into a broadcast transaction, refusing as
//! early as possible:
//!
//! 1. [`select`] the oldest output of the policy address
//! 2. [`plan`] the flat-fee output value
//! 3. check the branch gate against the current tip
//! 4. [`assemble`], sign and finalize through that branch only
//! 5. broadcast and [`broadcast::classify`] the explorer's answer
//!
//! [`session::Session`] runs the whole pipeline against any
//! [`branchgate_chain::ChainSource`].

pub mod assemble;
pub mod broadcast;
pub mod error;
pub mod plan;
pub mod select;
pub mod session;

pub use assemble::{assemble, AssembleError, FinalizedSpend, SignedSpend, UnsignedSpend};
pub use broadcast::{BroadcastClassifier, BroadcastOutcome, DEFAULT_PREMATURE_MARKERS};
pub use error::SpendError;
pub use plan::{plan, PlanError, SpendPlan, DEFAULT_FEE_SATS};
pub use select::{select, SelectError};
pub use session::{FundsReport, Session, SessionConfig, SessionPhase, SpendReceipt, SpendStage};
