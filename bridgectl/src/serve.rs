//! JSON-lines method channel.
//!
//! Each input line is one method call and yields exactly one response line.
//! `listen` and `cancel` attach and detach the event stream, whose lines are
//! interleaved with responses on the same output.
//!
//! Calls are handled serially. Responses carry no request id, so each one
//! answers the oldest unanswered line; a slow call such as a consent prompt
//! delays the calls queued behind it. Event lines keep flowing meanwhile.

use anyhow::{Context, Result};
use bridge_core::{MethodCall, MethodResponse, TunnelBridge};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::host::EventLines;

const LISTEN: &str = "listen";
const CANCEL: &str = "cancel";

/// Serve method calls from `input` until end of input.
pub async fn serve<R, W>(bridge: &TunnelBridge, input: R, output: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (events, mut event_rx) = EventLines::new();
    let mut lines = input.lines();
    info!(session = %bridge.session_name(), "serving method channel");

    loop {
        tokio::select! {
            biased;
            Some(event) = event_rx.recv() => {
                write_line(output, &event).await?;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read method call")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let response = handle_line(bridge, &events, &line).await;
                // Events raised while handling the call precede its response
                while let Ok(event) = event_rx.try_recv() {
                    write_line(output, &event).await?;
                }
                let encoded = serde_json::to_string(&response).context("failed to encode response")?;
                write_line(output, &encoded).await?;
            }
        }
    }

    bridge.detach();
    drop(events);
    while let Ok(event) = event_rx.try_recv() {
        write_line(output, &event).await?;
    }
    debug!("method channel closed");
    Ok(())
}

async fn handle_line(
    bridge: &TunnelBridge,
    events: &Arc<EventLines>,
    line: &str,
) -> MethodResponse {
    let call: MethodCall = match serde_json::from_str(line) {
        Ok(call) => call,
        Err(e) => {
            warn!(error = %e, "malformed method call");
            return MethodResponse::Error {
                code: "invalid_request".to_string(),
                message: e.to_string(),
            };
        }
    };

    match call {
        MethodCall::Unknown(name) if name == LISTEN => {
            bridge.attach(EventLines::downgrade(events));
            MethodResponse::Success { value: None }
        }
        MethodCall::Unknown(name) if name == CANCEL => {
            bridge.detach();
            MethodResponse::Success { value: None }
        }
        call => bridge.dispatch(call).await,
    }
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

/// Forward event lines to `output` until the stream ends.
pub async fn print_events<W: AsyncWrite + Unpin>(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut output: W,
) -> Result<()> {
    while let Some(line) = rx.recv().await {
        write_line(&mut output, &line).await?;
    }
    Ok(())
}
