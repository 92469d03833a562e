//! Cancellation helper shared by the client's tasks

use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `future` unless `token` fires first; `None` means cancelled
pub(crate) async fn until_cancelled<F: Future>(
    token: &CancellationToken,
    future: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = token.cancelled() => None,
        output = future => Some(output),
    }
}
