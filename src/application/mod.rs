//! Application layer: the merchant workflow operations and the machinery
//! they are built from.
//!
//! [`workflow::MerchantWorkflow`] is the entry point. Each operation runs its
//! writes inside a [`transaction::TransactionScope`], stages documents
//! through the [`fanout::DocumentProcessor`] and leaves its side effects to
//! the [`dispatcher::Dispatcher`].

pub mod dispatcher;
pub mod fanout;
pub mod template;
pub mod transaction;
pub mod workflow;
