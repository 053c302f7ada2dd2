//! Small async helpers.

use std::time::Duration;

use futures::{
    future::{self, Either},
    stream::{self, LocalBoxStream},
    Future,
};
use futures_timer::Delay;

/// Awaits the provided future for at most `dur`.
///
/// Returns [`None`] if the timeout won.
pub async fn timeout<F: Future>(dur: Duration, fut: F) -> Option<F::Output> {
    futures::pin_mut!(fut);
    match future::select(fut, Delay::new(dur)).await {
        Either::Left((output, _)) => Some(output),
        Either::Right(_) => None,
    }
}

/// Returns an endless stream ticking every `period`.
///
/// The first tick fires one `period` after the stream is first polled.
pub fn intervals(period: Duration) -> LocalBoxStream<'static, ()> {
    Box::pin(stream::unfold((), move |()| async move {
        Delay::new(period).await;
        Some(((), ()))
    }))
}
