//! Bridge between the synchronous store traits and async sqlx.

use std::future::Future;

use tokio::runtime::Handle;

/// Drive `fut` to completion on `runtime`.
///
/// From inside a multi-threaded runtime the current worker is handed over
/// with `block_in_place` first; `Handle::block_on` alone would panic there.
/// Callers on a current-thread runtime must use the async methods instead.
pub(crate) fn block_on<F: Future>(runtime: &Handle, fut: F) -> F::Output {
    if Handle::try_current().is_ok() {
        tokio::task::block_in_place(|| runtime.block_on(fut))
    } else {
        runtime.block_on(fut)
    }
}

/// Postgres `BIGINT` to an unsigned id, rejecting negatives.
pub(crate) fn to_u64(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
