//! LIFO compensating-action stack for the Create pipeline (spec §4.8: "each
//! step records a compensating action pushed onto a LIFO rollback stack;
//! any failure unwinds the stack"). Same shape as
//! `safescale_network::NetworkService`'s `Compensation`/`unwind` pair,
//! pulled out here since host creation pushes many more steps than subnet
//! creation does.

use futures_util::future::BoxFuture;
use safescale_error::SafeScaleError;
use tracing::warn;

type Compensation<'a> = Box<dyn FnOnce() -> BoxFuture<'a, safescale_error::Result<()>> + Send + 'a>;

#[derive(Default)]
pub struct RollbackStack<'a> {
    steps: Vec<Compensation<'a>>,
}

impl<'a> RollbackStack<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push(&mut self, step: Compensation<'a>) {
        self.steps.push(step);
    }

    /// Runs every compensating action in reverse registration order,
    /// attaching any cleanup failure to `primary` as a consequence rather
    /// than letting it mask the original error.
    pub async fn unwind(self, primary: &mut SafeScaleError) {
        for step in self.steps.into_iter().rev() {
            if let Err(e) = step().await {
                warn!(error = %e, "host creation rollback step failed");
                primary.add_consequence(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn unwind_runs_steps_in_reverse_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut stack = RollbackStack::new();
        for i in 0..3 {
            let order = order.clone();
            stack.push(Box::new(move || {
                Box::pin(async move {
                    order.lock().unwrap().push(i);
                    Ok(())
                })
            }));
        }
        let mut primary = SafeScaleError::invalid_request("boom");
        stack.unwind(&mut primary).await;
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn unwind_attaches_cleanup_failures_as_consequences() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut stack = RollbackStack::new();
        let count_clone = count.clone();
        stack.push(Box::new(move || {
            Box::pin(async move {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Err(SafeScaleError::not_available("cleanup failed"))
            })
        }));
        let mut primary = SafeScaleError::invalid_request("boom");
        stack.unwind(&mut primary).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(primary.consequences().len(), 1);
    }
}
