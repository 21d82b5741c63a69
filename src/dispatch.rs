use std::time::{Duration, Instant};

use snafu::prelude::*;
use tracing::{debug, warn};

use crate::{
    driver::Transport,
    error::{DownloadSnafu, Error, HttpStatusSnafu, TransportSnafu},
    pool::{PoolKey, PoolRegistry},
    request::{PreparedRequest, RequestDescriptor},
    response::Response,
};

/// How responses are classified once received.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatusPolicy {
    pub(crate) error_body_limit: usize,
}

/// Sends one request through `transport` and classifies the outcome.
///
/// Statuses of 400 and above are raised as [`Error::HttpStatus`] with the
/// full response attached. A failure that carries a response is classified
/// the same way; one without a response is a [`Error::Transport`].
pub(crate) async fn dispatch<T: Transport>(
    transport: &T,
    descriptor: RequestDescriptor,
    pools: &PoolRegistry,
    policy: StatusPolicy,
) -> Result<Response, Error> {
    let driver = transport.name();
    let (prepared, save_to) = PreparedRequest::from_descriptor(descriptor)?;
    let method = prepared.method().clone();
    let uri = prepared.uri().clone();

    let lease = transport
        .pools_connections()
        .then(|| pools.acquire(PoolKey::for_request(&prepared)));

    let started = Instant::now();
    let outcome = transport.execute(prepared).await;
    let wall_clock = started.elapsed();

    // A response recovered from a failure reports 0 unless the engine timed it.
    let (received, elapsed) = match outcome {
        Ok(received) => {
            let elapsed = received.elapsed().unwrap_or(wall_clock);
            (received, elapsed)
        }
        Err(mut failure) => match failure.take_response() {
            Some(received) => {
                let elapsed = received.elapsed().unwrap_or_default();
                (received, elapsed)
            }
            None => {
                warn!(%driver, %method, %uri, error = %failure, "request failed");
                return Err(failure).context(TransportSnafu { driver });
            }
        },
    };

    let duration_ms = duration_ms(elapsed);
    let response = Response::new(received, duration_ms);
    let status = response.status();

    if status.as_u16() >= 400 {
        warn!(%driver, %method, %uri, status = status.as_u16(), duration_ms, "error status");
        let excerpt = excerpt(response.body(), policy.error_body_limit);
        return HttpStatusSnafu {
            status,
            reason: response.reason_phrase().to_string(),
            excerpt,
            response: Box::new(response),
        }
        .fail();
    }

    if let Some(lease) = lease {
        lease.finish();
    }

    if let Some(path) = save_to {
        let written = tokio::fs::write(&path, response.body()).await;
        written.context(DownloadSnafu { path })?;
    }

    debug!(%driver, %method, %uri, status = status.as_u16(), duration_ms, "request completed");
    Ok(response)
}

fn duration_ms(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

/// Returns the leading `limit` bytes of the body as text, cut on a character
/// boundary and marked with `...` when shortened.
fn excerpt(body: &[u8], limit: usize) -> String {
    // A UTF-8 character spans at most 4 bytes, so a few bytes past `limit`
    // are enough to find the boundary without decoding the whole body.
    let window = &body[..body.len().min(limit.saturating_add(3))];
    let text = String::from_utf8_lossy(window);
    if body.len() <= limit && text.len() <= limit {
        return text.into_owned();
    }
    let mut end = limit.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
