//! The broadcast-request / multiple-reply transaction engine.
//!
//! One [`run`] call drives exactly one command to completion against a
//! set of destinations: it fragments and sends the datagram, then reads
//! replies through a [`Reassembler`] until every destination has
//! answered, a retry budget is exhausted, or `retry_forever` says to keep
//! waiting without resending.

use std::collections::HashMap;
use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, warn};

use crate::channel::FrameChannel;
use crate::datagram::encode_datagram;
use crate::error::{Error, Result};
use crate::reassembler::{datagram_to_frames, Reassembler};

/// The host's own source ID on the bus. The reference client always
/// transmits from node 0.
pub const HOST_SOURCE_ID: u8 = 0;

/// Tuning knobs for one transaction. Defaults mirror the reference
/// client's empirically-tuned pacing (§9): slow adapters and saturated
/// buses need the inter-frame and retry delays to avoid dropping frames.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    pub retry_limit: u32,
    pub error_exit: bool,
    pub retry_forever: bool,
    pub inter_frame_delay: Duration,
    pub retry_delay: Duration,
    pub receive_timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            error_exit: true,
            retry_forever: false,
            inter_frame_delay: Duration::from_millis(3),
            retry_delay: Duration::from_millis(10),
            receive_timeout: Duration::from_secs(1),
        }
    }
}

/// Outcome of a transaction that did not error out: the replies collected
/// so far (complete or partial), and how many retries it took.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub answers: HashMap<u8, Vec<u8>>,
    pub retry_count: u32,
}

fn send_to(
    channel: &mut dyn FrameChannel,
    command_bytes: &[u8],
    destinations: &[u8],
    inter_frame_delay: Duration,
) -> Result<()> {
    let datagram = encode_datagram(command_bytes, destinations);
    let frames = datagram_to_frames(&datagram, HOST_SOURCE_ID);
    for frame in &frames {
        channel.send_frame(frame)?;
        sleep(inter_frame_delay);
    }
    Ok(())
}

/// Run one transaction: send `command_bytes` to `destinations`, collect
/// replies, retry the missing subset per `opts`.
pub fn run(
    channel: &mut dyn FrameChannel,
    command_bytes: &[u8],
    destinations: &[u8],
    opts: &TransactionOptions,
) -> Result<TransactionResult> {
    let destination_set: std::collections::HashSet<u8> = destinations.iter().copied().collect();

    send_to(channel, command_bytes, destinations, opts.inter_frame_delay)?;

    let mut reassembler = Reassembler::new();
    let mut answers: HashMap<u8, Vec<u8>> = HashMap::new();
    let mut retry_count = 0u32;

    while answers.len() < destination_set.len() {
        match channel.receive_frame(opts.receive_timeout)? {
            Some(frame) => {
                if let Some(received) = reassembler.feed(&frame) {
                    if destination_set.contains(&received.source) {
                        answers.entry(received.source).or_insert(received.payload);
                    }
                    // Extraneous replies from IDs outside the destination
                    // set are silently discarded.
                }
            }
            None => {
                let missing: Vec<u8> = destination_set
                    .iter()
                    .copied()
                    .filter(|id| !answers.contains_key(id))
                    .collect();

                if opts.retry_forever {
                    warn!(?missing, "no reply yet; waiting without resend (retry_forever)");
                    continue;
                }

                warn!(?missing, "no reply before timeout");

                if retry_count >= opts.retry_limit {
                    if opts.error_exit {
                        return Err(Error::RetryExhausted { missing });
                    }
                    debug!("retry limit reached, returning partial answers");
                    return Ok(TransactionResult {
                        answers,
                        retry_count,
                    });
                }

                sleep(opts.retry_delay);
                retry_count += 1;
                debug!(attempt = retry_count + 1, "retrying transmission");
                send_to(channel, command_bytes, &missing, opts.inter_frame_delay)?;
            }
        }
    }

    Ok(TransactionResult {
        answers,
        retry_count,
    })
}
