//! SMB client connection core
//!
//! Ownership runs one way: a [`TreeConnection`] holds a [`Tree`], the tree
//! holds its [`Session`], the session holds its [`Transport`], and the
//! [`TransportPool`] indexes transports. Each layer keeps a usage count and
//! lets go of the layer below when its own count reaches zero.

mod locator;
mod pool;
mod refcount;
mod session;
mod transport;
mod tree;
mod tree_connection;

pub use locator::ResourceLocator;
pub use pool::TransportPool;
pub use session::Session;
pub use transport::{Exchange, MessageSecurity, Transport, TransportState};
pub use tree::Tree;
pub use tree_connection::{TreeConnection, TreeHandle};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock bookkeeping state, ignoring poisoning
///
/// Guards are never held across an await point.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
