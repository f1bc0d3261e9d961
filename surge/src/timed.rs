use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;

/// Measures the wall time of a future from its first poll until completion.
#[pin_project::pin_project]
pub(crate) struct Timed<F> {
    #[pin]
    inner: F,
    start: Option<Instant>,
}

impl<F: Future> Future for Timed<F> {
    type Output = (F::Output, Duration);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let start = *this.start.get_or_insert_with(Instant::now);
        match this.inner.poll(cx) {
            Poll::Ready(output) => Poll::Ready((output, start.elapsed())),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(crate) trait TimedExt: Future + Sized {
    fn timed(self) -> Timed<Self> {
        Timed {
            inner: self,
            start: None,
        }
    }
}

impl<F: Future> TimedExt for F {}
