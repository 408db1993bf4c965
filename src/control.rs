//! Line-based control input for a running dispatcher
//!
//! `bulkmail run` reads one command per line from stdin:
//!
//! - `start` (or `b`): switch to RUNNING
//! - `stop` (or `a`): switch to STOPPED
//! - `delay <seconds>`: change the send delay
//! - `status`: print running state and queue counts
//! - `quit` (or `q`): shut the dispatcher down
//!
//! End of input leaves the dispatcher running.

use crate::dispatcher::DispatcherHandle;
use crate::{style, Result};
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One parsed control line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlInput {
    Start,
    Stop,
    Delay(u64),
    Status,
    Quit,
}

impl FromStr for ControlInput {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_lowercase();

        let input = match command.as_str() {
            "start" | "b" => ControlInput::Start,
            "stop" | "a" => ControlInput::Stop,
            "status" => ControlInput::Status,
            "quit" | "q" | "exit" => ControlInput::Quit,
            "delay" => {
                let seconds = words
                    .next()
                    .and_then(|w| w.parse::<u64>().ok())
                    .filter(|s| *s > 0)
                    .ok_or_else(|| "usage: delay <seconds> (a positive number)".to_string())?;
                ControlInput::Delay(seconds)
            }
            other => return Err(format!("unknown command '{}'", other)),
        };

        if words.next().is_some() {
            return Err(format!("unexpected arguments after '{}'", command));
        }
        Ok(input)
    }
}

/// Forward one input to the dispatcher; returns the text to show the user
pub async fn apply(input: ControlInput, handle: &DispatcherHandle) -> Result<String> {
    match input {
        ControlInput::Start => {
            handle.start().await?;
            Ok("Dispatcher started".to_string())
        }
        ControlInput::Stop => {
            handle.stop().await?;
            Ok("Dispatcher stopped".to_string())
        }
        ControlInput::Delay(seconds) => {
            handle.set_delay(seconds).await?;
            Ok(format!("Delay set to {}s", seconds))
        }
        ControlInput::Status => {
            let stats = handle.stats();
            Ok(format!(
                "{}: pending {}, sending {}, sent {}, failed {}",
                if handle.is_running() { "RUNNING" } else { "STOPPED" },
                stats.pending,
                stats.sending,
                stats.sent,
                stats.failed
            ))
        }
        ControlInput::Quit => {
            handle.shutdown().await?;
            Ok("Shutting down...".to_string())
        }
    }
}

/// Read control lines from `reader` until end of input or `quit`
pub async fn drive<R>(reader: R, handle: DispatcherHandle) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let input = match line.parse::<ControlInput>() {
            Ok(input) => input,
            Err(message) => {
                println!("{}", style::warning(&message));
                continue;
            }
        };

        tracing::debug!(?input, "Control input");
        let reply = apply(input, &handle).await?;
        println!("{}", style::dim(&reply));

        if input == ControlInput::Quit {
            break;
        }
    }

    tracing::debug!("Control input closed");
    Ok(())
}
