use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};

use super::FetchError;

/// Sending half of a one-shot fetch. Dropping it without completing resolves the
/// paired [`Pending`] to [`FetchError::Disconnected`].
pub struct Completer<T> {
    tx: Sender<Result<T, FetchError>>,
}

impl<T> Completer<T> {
    pub fn complete(self, result: Result<T, FetchError>) {
        // the receiver may have been dropped by an abandoned load
        let _ = self.tx.send(result);
    }
}

/// Result of an asynchronous fetch, polled from the frame loop and never blocked on.
pub struct Pending<T> {
    rx: Option<Receiver<Result<T, FetchError>>>,
    resolved: Option<Result<T, FetchError>>,
}

pub fn pending<T>() -> (Completer<T>, Pending<T>) {
    let (tx, rx) = bounded(1);
    (Completer { tx }, Pending { rx: Some(rx), resolved: None })
}

impl<T> Pending<T> {
    pub fn ready(value: T) -> Self {
        Self { rx: None, resolved: Some(Ok(value)) }
    }

    pub fn failed(error: FetchError) -> Self {
        Self { rx: None, resolved: Some(Err(error)) }
    }

    fn receive(&mut self) {
        let Some(rx) = &self.rx else { return };
        match rx.try_recv() {
            Ok(result) => self.resolved = Some(result),
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => self.resolved = Some(Err(FetchError::Disconnected)),
        }
        self.rx = None;
    }

    pub fn is_done(&mut self) -> bool {
        self.receive();
        self.resolved.is_some()
    }

    /// Hands out the result once it has arrived; later calls return `None`.
    pub fn take(&mut self) -> Option<Result<T, FetchError>> {
        self.receive();
        self.resolved.take()
    }
}

/// Join counter over a fixed set of fetches. Completes when every slot has a value and
/// fails on the first error it sees.
pub struct Join<T> {
    pending: Vec<Option<Pending<T>>>,
    results: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Join<T> {
    pub fn new(pending: Vec<Pending<T>>) -> Self {
        let remaining = pending.len();
        let results = pending.iter().map(|_| None).collect();
        Self { pending: pending.into_iter().map(Some).collect(), results, remaining }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn poll(&mut self) -> Result<bool, FetchError> {
        for (slot, result) in self.pending.iter_mut().zip(self.results.iter_mut()) {
            let Some(pending) = slot else { continue };
            if let Some(outcome) = pending.take() {
                *slot = None;
                *result = Some(outcome?);
                self.remaining -= 1;
            }
        }
        Ok(self.remaining == 0)
    }

    /// Values in request order. Only meaningful once [`Join::poll`] returned `true`.
    pub fn into_results(self) -> Vec<T> {
        self.results.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_resolves_once() {
        let (completer, mut pending) = pending::<u32>();
        assert!(!pending.is_done());
        completer.complete(Ok(7));
        assert_eq!(pending.take().unwrap().unwrap(), 7);
        assert!(pending.take().is_none());
    }

    #[test]
    fn dropped_completer_is_an_error() {
        let (completer, mut pending) = pending::<u32>();
        drop(completer);
        assert!(matches!(pending.take(), Some(Err(FetchError::Disconnected))));
    }

    #[test]
    fn join_waits_for_every_slot_and_keeps_order() {
        let (first, a) = pending::<&str>();
        let (second, b) = pending::<&str>();
        let mut join = Join::new(vec![a, b]);
        assert!(!join.poll().unwrap());

        second.complete(Ok("fs"));
        assert!(!join.poll().unwrap());
        assert_eq!(join.remaining(), 1);

        first.complete(Ok("vs"));
        assert!(join.poll().unwrap());
        assert_eq!(join.into_results(), vec!["vs", "fs"]);
    }

    #[test]
    fn join_fails_fast() {
        let (_first, a) = pending::<u8>();
        let mut join = Join::new(vec![a, Pending::failed(FetchError::NotFound("x.bin".into()))]);
        assert!(matches!(join.poll(), Err(FetchError::NotFound(_))));
    }

    #[test]
    fn empty_join_is_complete() {
        let mut join = Join::<u8>::new(Vec::new());
        assert!(join.poll().unwrap());
    }
}
