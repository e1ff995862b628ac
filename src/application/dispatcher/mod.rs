//! The Dispatcher: the orchestrator tying dedup, locking, risk,
//! translation, exchange submission, and audit together
//! (`spec.md` §4.3).

mod dispatcher;
mod result;
mod translate;

pub use dispatcher::Dispatcher;
pub use result::DispatchResult;
pub use translate::{translate, OcoPlan, ProposedOrderPlan, TranslateError, TranslationPlan};
