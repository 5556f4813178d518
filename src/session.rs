//! Control session loop.
//!
//! Each activation drains every complete line currently buffered for a
//! client and dispatches it to the command interpreter:
//!
//! ```text
//! inbound bytes -> read_line (LF) -> parse -> execute -> replies -> outbound
//! ```
//!
//! An empty line ends the session: it sets `exit_requested` and nothing
//! after it in the same batch is executed. A parse failure is reported to
//! the peer as one `%error` line and the batch continues.
//!
//! A line longer than `max_line_length` is dropped whether or not its
//! terminator has arrived yet. An unterminated head past the limit puts the
//! client into discard mode: buffered bytes are thrown away and later
//! activations keep skipping until the next LF.

use crate::client::Client;
use crate::framer::{read_line_bounded, EolStyle, ReadLine};
use crate::interpreter::{CommandContext, CommandInterpreter};
use crate::output::{control_write, ControlReplies};
use std::ops::AddAssign;
use tracing::{debug, trace, warn};

/// EOL style of the control protocol.
pub const CONTROL_EOL: EolStyle = EolStyle::Lf;

/// Per-session tunables.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionSettings {
    /// Longest accepted line in bytes (0 = unlimited).
    pub max_line_length: usize,
}

impl SessionSettings {
    fn line_limit(&self) -> usize {
        if self.max_line_length == 0 {
            usize::MAX
        } else {
            self.max_line_length
        }
    }
}

/// What one activation did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    /// Lines parsed and executed.
    pub executed: usize,
    /// Lines rejected by the parser.
    pub parse_errors: usize,
    /// Lines dropped for being too long or unallocatable.
    pub discarded: usize,
}

impl AddAssign for Activation {
    fn add_assign(&mut self, other: Self) {
        self.executed += other.executed;
        self.parse_errors += other.parse_errors;
        self.discarded += other.discarded;
    }
}

/// Read and run every complete line buffered for `client`.
///
/// `closed` reports that the transport saw the peer go away; lines already
/// buffered are still processed.
pub fn control_callback<I: CommandInterpreter>(
    client: &mut Client,
    closed: bool,
    interpreter: &mut I,
    settings: &SessionSettings,
) -> Activation {
    let mut activation = Activation::default();

    if closed {
        client.request_exit();
    }

    if client.discarding() && !skip_discarded(client) {
        return activation;
    }

    loop {
        let line = match read_line_bounded(client.inbound_mut(), CONTROL_EOL, settings.line_limit())
        {
            ReadLine::Line(line) => line,
            ReadLine::Incomplete => break,
            ReadLine::Discarded { drained, error } => {
                warn!(client = %client.id(), drained, error = %error, "Dropped control line");
                activation.discarded += 1;
                continue;
            }
        };

        if line.is_empty() {
            debug!(client = %client.id(), "Empty line, ending control session");
            client.request_exit();
            break;
        }

        trace!(client = %client.id(), line = %line, "Control line");

        match interpreter.parse(line.as_str()) {
            Err(cause) => {
                activation.parse_errors += 1;
                control_write(client, &format!("%error in line \"{line}\": {cause}"));
            }
            Ok(commands) => {
                let replies = ControlReplies;
                let mut ctx = CommandContext::new(client, &replies);
                interpreter.execute(&commands, &mut ctx);
                activation.executed += 1;
            }
        }
    }

    let pending = client.inbound().len();
    if !client.exit_requested() && pending > settings.line_limit() {
        warn!(
            client = %client.id(),
            pending,
            max = settings.max_line_length,
            "Dropping unterminated control line"
        );
        let inbound = client.inbound_mut();
        inbound.drain(inbound.len());
        client.start_discarding();
        activation.discarded += 1;
    }

    activation
}

/// Drop the tail of a line already counted as discarded.
///
/// Returns true once its LF has been consumed.
fn skip_discarded(client: &mut Client) -> bool {
    let inbound = client.inbound_mut();
    match CONTROL_EOL.find(inbound.peek()) {
        Some((_, end)) => {
            inbound.drain(end);
            client.stop_discarding();
            true
        }
        None => {
            inbound.drain(inbound.len());
            false
        }
    }
}
