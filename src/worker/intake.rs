use crate::command::{Command, CommandChannel};
use futures::stream::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Which delivery path a command came in on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Live,
    Queue,
}

/// Forward the live subscription into `tx`, resubscribing after transport failures
pub async fn live_intake(
    commands: Arc<dyn CommandChannel>,
    tx: mpsc::UnboundedSender<(Origin, Command)>,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        let mut stream = match commands.subscribe().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Command subscription failed: {:#}", e);
                if pause(&cancel, retry_delay).await {
                    break;
                }
                continue;
            }
        };
        info!("Listening for live commands");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                Some(command) => {
                    if tx.send((Origin::Live, command)).is_err() {
                        return;
                    }
                }
                None => {
                    warn!("Live command subscription closed, resubscribing");
                    break;
                }
            }
        }

        if pause(&cancel, retry_delay).await {
            break;
        }
    }
    debug!("Live command intake stopped");
}

/// Poll the legacy queue into `tx`
pub async fn queue_intake(
    commands: Arc<dyn CommandChannel>,
    tx: mpsc::UnboundedSender<(Origin, Command)>,
    poll_timeout: Duration,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let popped = tokio::select! {
            _ = cancel.cancelled() => break,
            popped = commands.pop_queued(poll_timeout) => popped,
        };
        match popped {
            Ok(Some(command)) => {
                if tx.send((Origin::Queue, command)).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Command queue poll failed: {:#}", e);
                if pause(&cancel, retry_delay).await {
                    break;
                }
            }
        }
    }
    debug!("Queue command intake stopped");
}

/// Sleep for `delay`; true if cancelled meanwhile
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
