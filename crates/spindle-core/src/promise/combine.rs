//! Composite promises: all-of, all-apply, any-of.
//!
//! A composite observes its inputs; it never cancels them. Failure
//! short-circuiting relies on the single-assignment cell: the first failure
//! to land wins the terminal transition, later outcomes are no-ops.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::Promise;

type Mapper<T, U> = Box<dyn FnOnce(Vec<T>) -> U + Send>;

struct Gather<T, U> {
    slots: Vec<Option<T>>,
    remaining: usize,
    mapper: Option<Mapper<T, U>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Completes normally once every input has completed, exceptionally with
    /// the first observed failure. Inputs keep running either way.
    ///
    /// An empty input set completes immediately.
    pub fn all_of(inputs: Vec<Promise<T>>) -> Promise<()> {
        if inputs.is_empty() {
            return Promise::completed(());
        }
        let composite = Promise::pending(None);
        let remaining = Arc::new(AtomicUsize::new(inputs.len()));
        for input in &inputs {
            let composite = composite.clone();
            let remaining = Arc::clone(&remaining);
            input.when_done(move |out| match out.as_ref() {
                Err(err) => {
                    composite.complete(Err(err.clone()));
                }
                Ok(_) => {
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        composite.complete(Ok(()));
                    }
                }
            });
        }
        composite
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Waits for all inputs like [`all_of`](Promise::all_of), then applies
    /// `mapper` to the values in input order (not completion order).
    pub fn all_apply<U, F>(inputs: Vec<Promise<T>>, mapper: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(Vec<T>) -> U + Send + 'static,
    {
        let composite = Promise::pending(None);
        if inputs.is_empty() {
            composite.complete(Ok(mapper(Vec::new())));
            return composite;
        }
        let gather = Arc::new(Mutex::new(Gather {
            slots: vec![None; inputs.len()],
            remaining: inputs.len(),
            mapper: Some(Box::new(mapper) as Mapper<T, U>),
        }));
        for (index, input) in inputs.iter().enumerate() {
            let composite = composite.clone();
            let gather = Arc::clone(&gather);
            input.when_done(move |out| match out.as_ref() {
                Err(err) => {
                    composite.complete(Err(err.clone()));
                }
                Ok(value) => {
                    let finished = {
                        let mut state = gather.lock().expect("gather lock poisoned");
                        state.slots[index] = Some(value.clone());
                        state.remaining -= 1;
                        if state.remaining == 0 {
                            let values: Vec<T> = state.slots.drain(..).flatten().collect();
                            state.mapper.take().map(|mapper| (values, mapper))
                        } else {
                            None
                        }
                    };
                    if let Some((values, mapper)) = finished {
                        composite.complete(Ok(mapper(values)));
                    }
                }
            });
        }
        composite
    }

    /// Adopts the first input completion verbatim, normal or exceptional.
    /// The remaining inputs keep running; their outcomes are discarded.
    ///
    /// An empty input set stays pending forever.
    pub fn any_of(inputs: Vec<Promise<T>>) -> Promise<T> {
        let composite = Promise::pending(None);
        for input in &inputs {
            let composite = composite.clone();
            input.when_done(move |out| {
                composite.complete(out.as_ref().clone());
            });
        }
        composite
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::error::SpindleError;

    use super::*;

    #[tokio::test]
    async fn all_of_waits_for_every_input() {
        let inputs = vec![
            Promise::run(async { Ok(1) }),
            Promise::run(async { Ok(2) }),
            Promise::run(async { Ok(3) }),
        ];
        let composite = Promise::all_of(inputs);
        assert_eq!(composite.get().await, Ok(()));
    }

    #[tokio::test]
    async fn all_of_empty_completes_immediately() {
        let composite = Promise::<u32>::all_of(Vec::new());
        assert!(composite.is_done());
        assert_eq!(composite.get().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn all_of_fails_with_the_failing_input_without_cancelling_siblings() {
        let slow_ok = Promise::run(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(1)
        });
        let failing: Promise<u32> = Promise::run(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(SpindleError::task("f2 failed"))
        });
        let later_ok = Promise::run(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(3)
        });

        let composite = Promise::all_of(vec![slow_ok.clone(), failing.clone(), later_ok.clone()]);
        assert_eq!(composite.get().await, Err(SpindleError::task("f2 failed")));

        // siblings are not cancelled by the composite's failure
        assert_eq!(slow_ok.get().await, Ok(1));
        assert_eq!(later_ok.get().await, Ok(3));
    }

    #[tokio::test]
    async fn all_apply_maps_the_collected_values() {
        let inputs = vec![Promise::run(async { Ok(3) }), Promise::run(async { Ok(4) })];
        let sum = Promise::all_apply(inputs, |values| values.into_iter().sum::<i32>());
        assert_eq!(sum.get().await, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn all_apply_preserves_input_order() {
        let slow_first = Promise::run(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok("first")
        });
        let fast_second = Promise::run(async { Ok("second") });
        let joined = Promise::all_apply(vec![slow_first, fast_second], |values| values.join(","));
        assert_eq!(joined.get().await, Ok("first,second".to_string()));
    }

    #[tokio::test]
    async fn all_apply_fails_like_all_of() {
        let inputs: Vec<Promise<u32>> = vec![
            Promise::run(async { Ok(1) }),
            Promise::failed(SpindleError::task("broken")),
        ];
        let composite = Promise::all_apply(inputs, |values| values.len());
        assert_eq!(composite.get().await, Err(SpindleError::task("broken")));
    }

    #[tokio::test(start_paused = true)]
    async fn any_of_adopts_the_fastest_input() {
        let slow = Promise::run(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("a")
        });
        let fast = Promise::run(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok("b")
        });
        let first = Promise::any_of(vec![slow.clone(), fast]);
        assert_eq!(first.get().await, Ok("b"));
        // the slower input keeps running to its own completion
        assert_eq!(slow.get().await, Ok("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn any_of_adopts_a_fast_failure_verbatim() {
        let slow_ok = Promise::run(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(1)
        });
        let fast_err: Promise<u32> = Promise::run(async { Err(SpindleError::task("first")) });
        let first = Promise::any_of(vec![slow_ok, fast_err]);
        assert_eq!(first.get().await, Err(SpindleError::task("first")));
    }
}
