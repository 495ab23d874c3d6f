//! Execution of a single batch against one connection.
//!
//! [`execute_batch`] submits every item of a [`Batch`] as one multi-request
//! call and maps the ordered responses back onto the submitted items. It has
//! no side effects beyond the remote call: results are returned, never
//! published, so the caller decides how to route them.

use crate::{
    Batch, CountConnection, CountRequestItem, CountResult, Error, ItemResponse, Result,
    TransportError,
};
use core::time::Duration;

/// Fault recorded for a submitted item the remote returned no response for.
pub const MISSING_RESPONSE: &str = "no response returned for entity";

/// Fault recorded for a submitted item whose response named another entity.
pub const MISMATCHED_RESPONSE: &str = "response named a different entity";

/// Results of one batch, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResults {
    /// Exactly one result per submitted item.
    pub results: Vec<CountResult>,
    /// Responses that could not be attributed to their submitted item:
    /// counts keyed by another entity and surplus responses.
    pub discarded: usize,
}

/// Sends `batch` over `connection` and returns one result per item, in
/// submission order.
///
/// When `timeout` is set and expires, the call is abandoned and treated as a
/// transport failure of the whole batch.
///
/// # Errors
///
/// Returns [`Error::BatchTransport`] when the call as a whole fails. Per-item
/// faults are not errors; they are returned as fault results.
pub async fn execute_batch<C>(
    batch: &Batch,
    connection: &C,
    timeout: Option<Duration>,
) -> Result<BatchResults>
where
    C: CountConnection,
{
    let call = connection.execute_multiple(&batch.items);

    let responses = match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(TransportError::Timeout(limit))),
        None => call.await,
    }
    .map_err(|source| Error::BatchTransport {
        batch: batch.index,
        source,
    })?;

    Ok(map_responses(batch, responses))
}

/// Pairs each submitted item with the response at the same position.
///
/// The response at position `i` belongs to the item at position `i`. A count
/// keyed by a different entity name is discarded and the item gets a
/// [`MISMATCHED_RESPONSE`] fault; an empty key is taken as the submitted
/// name. Missing responses become faults; surplus responses are discarded.
pub fn map_responses(batch: &Batch, responses: Vec<ItemResponse>) -> BatchResults {
    let received = responses.len();
    if received != batch.len() {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            batch = batch.index,
            submitted = batch.len(),
            received,
            "Response count does not match submitted item count"
        );
    }

    let mut responses = responses.into_iter();
    let mut discarded = received.saturating_sub(batch.len());

    let results = batch
        .items
        .iter()
        .map(|item| match responses.next() {
            Some(response) => to_result(item, response).unwrap_or_else(|| {
                discarded += 1;
                CountResult::fault(item.logical_name.clone(), MISMATCHED_RESPONSE)
            }),
            None => CountResult::fault(item.logical_name.clone(), MISSING_RESPONSE),
        })
        .collect();

    BatchResults { results, discarded }
}

/// Marks every item of `batch` as failed with the transport error's message.
pub fn fail_batch(batch: &Batch, error: &TransportError) -> Vec<CountResult> {
    let message = error.to_string();
    batch
        .items
        .iter()
        .map(|item| CountResult::fault(item.logical_name.clone(), message.clone()))
        .collect()
}

/// `None` when the response is a count keyed by another entity.
fn to_result(item: &CountRequestItem, response: ItemResponse) -> Option<CountResult> {
    match response {
        ItemResponse::Count { entity, count }
            if entity.is_empty() || entity == item.logical_name =>
        {
            Some(CountResult::success(item.logical_name.clone(), count))
        }
        ItemResponse::Count {
            entity: _entity, ..
        } => {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                submitted = %item.logical_name,
                received = %_entity,
                "Discarding count keyed by a different entity"
            );
            None
        }
        ItemResponse::Fault { message } => {
            Some(CountResult::fault(item.logical_name.clone(), message))
        }
    }
}
