//! Live event subscriptions.
//!
//! A watch opens the node subscription, optionally fetches a historical
//! backlog, and hands the live feed to one background task. The task forwards
//! logs through a bounded channel and reports its terminal error through a
//! oneshot; the [`LogIterator`] on the other side decodes and hands out one
//! event per [`LogIterator::next`].
//!
//! Delivery is at-most-once across a close: logs already in the channel are
//! still drained, logs the task hadn't pulled from the transport are lost.

use alloy::{dyn_abi::DynSolValue, json_abi::Event, primitives::B256};
use futures::{stream::BoxStream, StreamExt};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    backend::{ContractFilterer, LogStream},
    codec,
    contract::BoundContract,
    error::{ContractError, RemoteError},
    DecodedEvent, Log,
};

pub const DEFAULT_BUFFER: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOpts {
    /// Deliver logs from this block onwards before the live feed
    pub start: Option<u64>,
    /// Capacity of the channel between the subscription task and the iterator
    pub buffer: usize,
}

impl Default for WatchOpts {
    fn default() -> Self {
        Self {
            start: None,
            buffer: DEFAULT_BUFFER,
        }
    }
}

impl WatchOpts {
    pub fn from_block(start: u64) -> Self {
        Self {
            start: Some(start),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    Active,
    Closed,
    Failed,
}

/// Handle that closes a [`LogIterator`] from another task.
#[derive(Debug, Clone)]
pub struct IteratorCloser {
    cancel: CancellationToken,
}

impl IteratorCloser {
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<B: ContractFilterer> BoundContract<B> {
    /// Subscribe to `event`. Constraints work as in [`BoundContract::filter`].
    pub async fn watch(
        &self,
        opts: &WatchOpts,
        event: &str,
        constraints: &[Option<Vec<DynSolValue>>],
    ) -> Result<LogIterator, ContractError> {
        let event = self.descriptor().event(event)?.clone();
        let filter = self.descriptor().log_filter(&event, constraints, None, None)?;

        // subscribe first so nothing emitted while the backlog loads is missed
        let stream = self.backend().subscribe_logs(&filter).await?;

        let backlog = match opts.start {
            Some(start) => {
                let mut historical = filter.clone();
                historical.from_block = Some(start);
                self.backend().get_logs(&historical).await?
            }
            None => Vec::new(),
        };

        info!(
            address = %self.address(),
            event = %event.name,
            backlog = backlog.len(),
            "opened log subscription"
        );
        Ok(LogIterator::spawn(event, filter.topics, backlog, stream, opts.buffer))
    }
}

/// Cursor over a backlog followed by a live subscription.
///
/// Dropping the iterator closes it.
pub struct LogIterator {
    event: Event,
    topics: Vec<Option<Vec<B256>>>,
    backlog: VecDeque<Log>,
    logs: mpsc::Receiver<Log>,
    failure: oneshot::Receiver<RemoteError>,
    cancel: CancellationToken,
    state: IteratorState,
    current: Option<DecodedEvent>,
    error: Option<ContractError>,
}

impl LogIterator {
    fn spawn(
        event: Event,
        topics: Vec<Option<Vec<B256>>>,
        backlog: Vec<Log>,
        stream: LogStream,
        buffer: usize,
    ) -> Self {
        let (log_tx, log_rx) = mpsc::channel(buffer.max(1));
        let (failure_tx, failure_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        tokio::spawn(forward(
            stream,
            log_tx,
            failure_tx,
            cancel.clone(),
            event.name.clone(),
        ));

        Self {
            event,
            topics,
            backlog: backlog.into(),
            logs: log_rx,
            failure: failure_rx,
            cancel,
            state: IteratorState::Active,
            current: None,
            error: None,
        }
    }

    /// Advance to the next event. Returns `false` once the iterator is closed
    /// or failed and nothing buffered is left; check [`LogIterator::error`] to
    /// tell the two apart.
    pub async fn next(&mut self) -> bool {
        loop {
            let Some(log) = self.pull().await else {
                self.current = None;
                return false;
            };

            let decoded = codec::check_topics(&self.topics, &log)
                .and_then(|()| codec::decode_log(&self.event, &log));
            match decoded {
                Ok(event) => {
                    self.current = Some(event);
                    return true;
                }
                Err(ContractError::TopicMismatch { found, .. }) => {
                    trace!(event = %self.event.name, ?found, "skipping log of another event");
                }
                Err(err) => {
                    warn!(event = %self.event.name, error = %err, "failed to decode log");
                    self.fail(err);
                    self.current = None;
                    return false;
                }
            }
        }
    }

    /// Event produced by the last successful [`LogIterator::next`].
    pub fn event(&self) -> Option<&DecodedEvent> {
        self.current.as_ref()
    }

    pub fn take_event(&mut self) -> Option<DecodedEvent> {
        self.current.take()
    }

    /// Terminal error; `None` while active or after a clean close.
    pub fn error(&self) -> Option<&ContractError> {
        self.error.as_ref()
    }

    pub fn state(&self) -> IteratorState {
        match self.state {
            IteratorState::Active if self.cancel.is_cancelled() => IteratorState::Closed,
            state => state,
        }
    }

    /// Stop the subscription. Idempotent and never blocks.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if self.state == IteratorState::Active {
            self.state = IteratorState::Closed;
        }
    }

    pub fn closer(&self) -> IteratorCloser {
        IteratorCloser {
            cancel: self.cancel.clone(),
        }
    }

    /// Consume the iterator as a stream. A terminal error, if any, is the last
    /// item.
    pub fn into_stream(self) -> BoxStream<'static, Result<DecodedEvent, ContractError>> {
        futures::stream::unfold(Some(self), |iter| async move {
            let mut iter = iter?;
            if iter.next().await {
                let event = iter.take_event()?;
                Some((Ok(event), Some(iter)))
            } else {
                iter.error.take().map(|err| (Err(err), None))
            }
        })
        .boxed()
    }

    async fn pull(&mut self) -> Option<Log> {
        if let Some(log) = self.backlog.pop_front() {
            return Some(log);
        }

        if self.state == IteratorState::Active {
            let cancel = self.cancel.clone();
            tokio::select! {
                biased;
                log = self.logs.recv() => match log {
                    Some(log) => return Some(log),
                    None => {
                        self.finish();
                        return None;
                    }
                },
                _ = cancel.cancelled() => self.state = IteratorState::Closed,
            }
        }

        // closed or failed: hand out what is already buffered
        self.logs.try_recv().ok()
    }

    /// The forwarding task is gone; its error (if any) is already in the
    /// oneshot because it is sent before the log sender drops.
    fn finish(&mut self) {
        match self.failure.try_recv() {
            Ok(err) => self.fail(err.into()),
            Err(_) => self.state = IteratorState::Closed,
        }
    }

    fn fail(&mut self, err: ContractError) {
        self.cancel.cancel();
        self.state = IteratorState::Failed;
        self.error = Some(err);
    }
}

impl Drop for LogIterator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for LogIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogIterator")
            .field("event", &self.event.name)
            .field("state", &self.state())
            .field("backlog", &self.backlog.len())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

async fn forward(
    mut stream: LogStream,
    logs: mpsc::Sender<Log>,
    failure: oneshot::Sender<RemoteError>,
    cancel: CancellationToken,
    event: String,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };

        match item {
            Some(Ok(log)) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = logs.send(log) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Some(Err(err)) => {
                warn!(%event, error = %err, "log subscription failed");
                let _ = failure.send(err);
                break;
            }
            None => {
                let _ = failure.send(RemoteError::SubscriptionClosed);
                break;
            }
        }
    }
    // dropping the stream here releases the transport subscription
    debug!(%event, "log subscription task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::mock::{self, MockBackend, TOKEN};
    use alloy::primitives::{Address, U256};
    use std::{sync::atomic::Ordering, time::Duration};
    use tokio::time::{sleep, timeout};

    fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xb0)
    }

    fn value_of(iter: &LogIterator) -> Option<DynSolValue> {
        iter.event().and_then(|e| e.get("value")).cloned()
    }

    async fn wait_for(flag: &std::sync::atomic::AtomicBool) {
        timeout(Duration::from_secs(1), async {
            while !flag.load(Ordering::SeqCst) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("flag was never set");
    }

    #[tokio::test]
    async fn test_three_live_logs_then_parks_until_closed() {
        let (backend, feed) = MockBackend::new().with_feed();
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let mut iter = contract
            .watch(&WatchOpts::default(), "Transfer", &[])
            .await
            .unwrap();

        for value in 1..=3 {
            feed.send(Ok(mock::transfer_log(alice(), bob(), value, value)))
                .unwrap();
        }

        for value in 1..=3u64 {
            assert!(iter.next().await);
            assert_eq!(value_of(&iter), Some(DynSolValue::Uint(U256::from(value), 256)));
            assert_eq!(iter.event().unwrap().get("from"), Some(&DynSolValue::Address(alice())));
        }

        // nothing more to deliver: next() parks
        assert!(timeout(Duration::from_millis(50), iter.next()).await.is_err());
        assert_eq!(iter.state(), IteratorState::Active);

        iter.close();
        assert!(!iter.next().await);
        assert!(iter.error().is_none());
        assert_eq!(iter.state(), IteratorState::Closed);
        // idempotent
        iter.close();
        assert_eq!(iter.state(), IteratorState::Closed);

        wait_for(&contract.backend().unsubscribed).await;
        drop(feed);
    }

    #[tokio::test]
    async fn test_closer_wakes_parked_next() {
        let (backend, _feed) = MockBackend::new().with_feed();
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let mut iter = contract
            .watch(&WatchOpts::default(), "Transfer", &[])
            .await
            .unwrap();

        let closer = iter.closer();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let delivered = timeout(Duration::from_secs(1), iter.next())
            .await
            .expect("next() should return after close");
        assert!(!delivered);
        assert_eq!(iter.state(), IteratorState::Closed);
        assert!(iter.error().is_none());

        // further calls after the wake-up return at once
        iter.close();
        let delivered = timeout(Duration::from_secs(1), iter.next())
            .await
            .expect("next() after close should not park");
        assert!(!delivered);
        assert_eq!(iter.state(), IteratorState::Closed);
    }

    #[tokio::test]
    async fn test_subscription_filter_selects_matching_logs() {
        let (backend, feed) = MockBackend::new().with_feed();
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let mut iter = contract
            .watch(
                &WatchOpts::default(),
                "Transfer",
                &[None, Some(vec![DynSolValue::Address(bob())])],
            )
            .await
            .unwrap();

        feed.send(Ok(mock::transfer_log(alice(), alice(), 1, 1))).unwrap();
        feed.send(Ok(mock::approval_log(alice(), bob(), 2))).unwrap();
        feed.send(Ok(mock::transfer_log(alice(), bob(), 3, 3))).unwrap();

        assert!(iter.next().await);
        assert_eq!(value_of(&iter), Some(DynSolValue::Uint(U256::from(3), 256)));
        assert_eq!(iter.event().unwrap().raw.block_number, Some(3));
    }

    #[tokio::test]
    async fn test_backlog_is_delivered_before_live_logs() {
        let (backend, feed) = MockBackend::new().with_feed();
        let backend = backend.with_history(vec![
            mock::transfer_log(alice(), bob(), 1, 10),
            mock::transfer_log(alice(), bob(), 2, 11),
        ]);
        feed.send(Ok(mock::transfer_log(alice(), bob(), 3, 12))).unwrap();

        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let mut iter = contract
            .watch(&WatchOpts::from_block(10), "Transfer", &[])
            .await
            .unwrap();

        let mut blocks = Vec::new();
        for _ in 0..3 {
            assert!(iter.next().await);
            blocks.push(iter.take_event().unwrap().raw.block_number);
        }
        assert_eq!(blocks, vec![Some(10), Some(11), Some(12)]);

        let filters = contract.backend().filters.lock().unwrap();
        assert_eq!(filters[0].from_block, None, "subscription has no block range");
        assert_eq!(filters[1].from_block, Some(10));
    }

    #[tokio::test]
    async fn test_skips_other_events_and_constraint_misses() {
        let (backend, feed) = MockBackend::new().ignoring_filters().with_feed();
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let mut iter = contract
            .watch(
                &WatchOpts::default(),
                "Transfer",
                &[Some(vec![DynSolValue::Address(alice())])],
            )
            .await
            .unwrap();

        feed.send(Ok(mock::approval_log(alice(), bob(), 1))).unwrap();
        feed.send(Ok(mock::transfer_log(bob(), alice(), 5, 2))).unwrap();
        feed.send(Ok(mock::transfer_log(alice(), bob(), 7, 3))).unwrap();

        assert!(iter.next().await);
        assert_eq!(value_of(&iter), Some(DynSolValue::Uint(U256::from(7), 256)));
    }

    #[tokio::test]
    async fn test_transport_error_fails_iterator() {
        let (backend, feed) = MockBackend::new().with_feed();
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let mut iter = contract
            .watch(&WatchOpts::default(), "Transfer", &[])
            .await
            .unwrap();

        feed.send(Ok(mock::transfer_log(alice(), bob(), 1, 1))).unwrap();
        feed.send(Err(RemoteError::Transport("connection reset".into())))
            .unwrap();

        assert!(iter.next().await);
        assert!(!iter.next().await);
        assert_eq!(iter.state(), IteratorState::Failed);
        assert!(matches!(
            iter.error(),
            Some(ContractError::Remote(RemoteError::Transport(m))) if m == "connection reset"
        ));

        // a failed iterator stays failed
        iter.close();
        assert_eq!(iter.state(), IteratorState::Failed);
        assert!(!iter.next().await);
    }

    #[tokio::test]
    async fn test_feed_ending_is_reported() {
        let (backend, feed) = MockBackend::new().with_feed();
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let mut iter = contract
            .watch(&WatchOpts::default(), "Transfer", &[])
            .await
            .unwrap();

        drop(feed);
        assert!(!iter.next().await);
        assert!(matches!(
            iter.error(),
            Some(ContractError::Remote(RemoteError::SubscriptionClosed))
        ));
    }

    #[tokio::test]
    async fn test_decode_failure_fails_iterator() {
        let (backend, feed) = MockBackend::new().with_feed();
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let mut iter = contract
            .watch(&WatchOpts::default(), "Transfer", &[])
            .await
            .unwrap();

        let mut truncated = mock::transfer_log(alice(), bob(), 1, 1);
        truncated.data = Default::default();
        feed.send(Ok(truncated)).unwrap();

        assert!(!iter.next().await);
        assert_eq!(iter.state(), IteratorState::Failed);
        assert!(matches!(iter.error(), Some(ContractError::Decoding(_))));
        wait_for(&contract.backend().unsubscribed).await;
    }

    #[tokio::test]
    async fn test_buffered_logs_drain_after_close() {
        let (backend, feed) = MockBackend::new().with_feed();
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let mut iter = contract
            .watch(&WatchOpts::default(), "Transfer", &[])
            .await
            .unwrap();

        feed.send(Ok(mock::transfer_log(alice(), bob(), 1, 1))).unwrap();
        feed.send(Ok(mock::transfer_log(alice(), bob(), 2, 2))).unwrap();
        // let the forwarding task move both logs into the channel
        sleep(Duration::from_millis(20)).await;

        iter.close();
        assert!(iter.next().await);
        assert!(iter.next().await);
        assert!(!iter.next().await);
        assert!(iter.error().is_none());
    }

    #[tokio::test]
    async fn test_removed_logs_pass_through_in_order() {
        let (backend, feed) = MockBackend::new().with_feed();
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let mut iter = contract
            .watch(&WatchOpts::default(), "Transfer", &[])
            .await
            .unwrap();

        let mut reorged = mock::transfer_log(alice(), bob(), 1, 4);
        reorged.removed = true;
        feed.send(Ok(mock::transfer_log(alice(), bob(), 1, 4))).unwrap();
        feed.send(Ok(reorged)).unwrap();

        assert!(iter.next().await);
        assert!(!iter.event().unwrap().raw.removed);
        assert!(iter.next().await);
        assert!(iter.event().unwrap().raw.removed);
    }

    #[tokio::test]
    async fn test_into_stream_ends_with_error() {
        let (backend, feed) = MockBackend::new().with_feed();
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let iter = contract
            .watch(&WatchOpts::default(), "Transfer", &[])
            .await
            .unwrap();

        feed.send(Ok(mock::transfer_log(alice(), bob(), 1, 1))).unwrap();
        feed.send(Ok(mock::transfer_log(alice(), bob(), 2, 2))).unwrap();
        feed.send(Err(RemoteError::Transport("gone".into()))).unwrap();

        let items: Vec<_> = iter.into_stream().collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert!(matches!(items[2], Err(ContractError::Remote(RemoteError::Transport(_)))));
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let (backend, _feed) = MockBackend::new().with_feed();
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);
        let iter = contract
            .watch(&WatchOpts::default(), "Transfer", &[])
            .await
            .unwrap();

        assert!(!contract.backend().unsubscribed.load(Ordering::SeqCst));
        drop(iter);
        wait_for(&contract.backend().unsubscribed).await;
    }

    #[tokio::test]
    async fn test_watch_without_subscription_support() {
        let contract = BoundContract::new(TOKEN, mock::token_abi(), MockBackend::new());
        let err = contract
            .watch(&WatchOpts::default(), "Transfer", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::Remote(RemoteError::Transport(_))));
    }
}
