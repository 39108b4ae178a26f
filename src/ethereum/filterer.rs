use alloy::{dyn_abi::DynSolValue, json_abi::Event, primitives::B256};
use std::vec;
use tracing::{debug, trace};

use super::{
    backend::ContractFilterer, codec, contract::BoundContract, error::ContractError,
    DecodedEvent, Log,
};

/// Block range of a historical query. `end: None` means the latest block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOpts {
    pub start: u64,
    pub end: Option<u64>,
}

impl FilterOpts {
    pub fn range(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }
}

/// Result of one historical query, decoded lazily.
///
/// Logs emitted by other events of the same contract, or outside the topic
/// constraints, are skipped; a log that matches but fails to decode yields
/// its error in place.
#[derive(Debug)]
pub struct EventBatch {
    event: Event,
    topics: Vec<Option<Vec<B256>>>,
    logs: vec::IntoIter<Log>,
}

impl EventBatch {
    /// Raw logs not yet consumed.
    pub fn remaining(&self) -> usize {
        self.logs.len()
    }
}

impl Iterator for EventBatch {
    type Item = Result<DecodedEvent, ContractError>;

    fn next(&mut self) -> Option<Self::Item> {
        for log in self.logs.by_ref() {
            let decoded = codec::check_topics(&self.topics, &log)
                .and_then(|()| codec::decode_log(&self.event, &log));
            match decoded {
                Err(ContractError::TopicMismatch { found, .. }) => {
                    trace!(event = %self.event.name, ?found, "skipping log outside the filter");
                }
                decoded => return Some(decoded),
            }
        }
        None
    }
}

impl<B: ContractFilterer> BoundContract<B> {
    /// Query historical logs of `event`. Each constraint restricts one indexed
    /// parameter, in declaration order, to a set of allowed values.
    pub async fn filter(
        &self,
        opts: &FilterOpts,
        event: &str,
        constraints: &[Option<Vec<DynSolValue>>],
    ) -> Result<EventBatch, ContractError> {
        let event = self.descriptor().event(event)?.clone();
        let filter =
            self.descriptor()
                .log_filter(&event, constraints, Some(opts.start), opts.end)?;

        let logs = self.backend().get_logs(&filter).await?;
        debug!(event = %event.name, count = logs.len(), "fetched historical logs");

        Ok(EventBatch {
            event,
            topics: filter.topics,
            logs: logs.into_iter(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::{
        error::RemoteError,
        mock::{self, MockBackend, TOKEN},
        ContractFilterer, LogFilter,
    };
    use alloy::primitives::{Address, Bytes, B256, U256};
    use async_trait::async_trait;

    fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xb0)
    }

    #[tokio::test]
    async fn test_filter_builds_query_and_decodes() {
        let backend = MockBackend::new().with_history(vec![
            mock::transfer_log(alice(), bob(), 10, 100),
            mock::transfer_log(alice(), bob(), 20, 101),
        ]);
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);

        let batch = contract
            .filter(
                &FilterOpts::range(100, 200),
                "Transfer",
                &[Some(vec![DynSolValue::Address(alice())])],
            )
            .await
            .unwrap();
        assert_eq!(batch.remaining(), 2);

        let values: Vec<_> = batch
            .map(|event| event.unwrap().get("value").cloned())
            .collect();
        assert_eq!(
            values,
            vec![
                Some(DynSolValue::Uint(U256::from(10), 256)),
                Some(DynSolValue::Uint(U256::from(20), 256)),
            ]
        );

        let filters = contract.backend().filters.lock().unwrap();
        assert_eq!(
            filters[0],
            LogFilter {
                address: TOKEN,
                topics: vec![
                    Some(vec![alloy::primitives::keccak256("Transfer(address,address,uint256)")]),
                    Some(vec![alice().into_word()]),
                ],
                from_block: Some(100),
                to_block: Some(200),
            }
        );
    }

    #[tokio::test]
    async fn test_batch_skips_other_events_and_reports_bad_logs() {
        let mut truncated = mock::transfer_log(alice(), bob(), 1, 7);
        truncated.data = Bytes::from(vec![0u8; 3]);

        let backend = MockBackend::new().ignoring_filters().with_history(vec![
            mock::approval_log(alice(), bob(), 5),
            mock::transfer_log(alice(), bob(), 1, 6),
            truncated,
            mock::approval_log(bob(), alice(), 8),
        ]);
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);

        let mut batch = contract
            .filter(&FilterOpts::default(), "Transfer", &[])
            .await
            .unwrap();

        let first = batch.next().unwrap().unwrap();
        assert_eq!(first.raw.block_number, Some(6));
        assert!(matches!(batch.next(), Some(Err(ContractError::Decoding(_)))));
        assert!(batch.next().is_none());
    }

    #[tokio::test]
    async fn test_constraints_select_logs_end_to_end() {
        let history = vec![
            mock::transfer_log(alice(), bob(), 1, 10),
            mock::transfer_log(bob(), alice(), 2, 11),
            mock::approval_log(alice(), bob(), 12),
            mock::transfer_log(alice(), alice(), 3, 13),
            mock::transfer_log(alice(), bob(), 4, 30),
        ];
        let constraints = [None, Some(vec![DynSolValue::Address(bob())])];

        let contract = BoundContract::new(
            TOKEN,
            mock::token_abi(),
            MockBackend::new().with_history(history.clone()),
        );
        let values: Vec<_> = contract
            .filter(&FilterOpts::range(0, 20), "Transfer", &constraints)
            .await
            .unwrap()
            .map(|event| event.unwrap().get("value").cloned())
            .collect();
        assert_eq!(values, vec![Some(DynSolValue::Uint(U256::from(1), 256))]);

        // a node that ignores the topics still yields only matching events
        let contract = BoundContract::new(
            TOKEN,
            mock::token_abi(),
            MockBackend::new().ignoring_filters().with_history(history),
        );
        let batch = contract
            .filter(&FilterOpts::range(0, 20), "Transfer", &constraints)
            .await
            .unwrap();
        assert_eq!(batch.remaining(), 5);
        let blocks: Vec<_> = batch
            .map(|event| event.unwrap().raw.block_number)
            .collect();
        assert_eq!(blocks, vec![Some(10), Some(30)]);
    }

    #[tokio::test]
    async fn test_filter_requeries_each_time() {
        let backend = MockBackend::new().with_history(vec![mock::transfer_log(alice(), bob(), 1, 1)]);
        let contract = BoundContract::new(TOKEN, mock::token_abi(), backend);

        for _ in 0..2 {
            let batch = contract
                .filter(&FilterOpts::default(), "Transfer", &[None, Some(vec![DynSolValue::Address(bob())])])
                .await
                .unwrap();
            assert_eq!(batch.count(), 1);
        }

        let filters = contract.backend().filters.lock().unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].from_block, Some(0));
        assert_eq!(filters[0].to_block, None);
        assert_eq!(filters[0].topics[1], None);
    }

    struct RangeLimited;

    #[async_trait]
    impl ContractFilterer for RangeLimited {
        async fn get_logs(&self, _filter: &LogFilter) -> Result<Vec<Log>, RemoteError> {
            Err(RemoteError::Rejected {
                code: -32005,
                message: "query returned more than 10000 results".into(),
            })
        }

        async fn subscribe_logs(
            &self,
            _filter: &LogFilter,
        ) -> Result<crate::ethereum::LogStream, RemoteError> {
            Err(RemoteError::Transport("not supported".into()))
        }
    }

    #[tokio::test]
    async fn test_range_rejection_is_surfaced() {
        let contract = BoundContract::new(TOKEN, mock::token_abi(), RangeLimited);
        let err = contract
            .filter(&FilterOpts::default(), "Transfer", &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContractError::Remote(RemoteError::Rejected { code: -32005, .. })
        ));
    }

    #[tokio::test]
    async fn test_filter_rejects_bad_constraints() {
        let contract = BoundContract::new(TOKEN, mock::token_abi(), MockBackend::new());

        let err = contract
            .filter(
                &FilterOpts::default(),
                "Transfer",
                &[Some(vec![DynSolValue::FixedBytes(B256::ZERO, 32)])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::Encoding(_)));

        let err = contract
            .filter(&FilterOpts::default(), "Deposit", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::UnknownEvent(_)));
        assert!(contract.backend().filters.lock().unwrap().is_empty());
    }
}
