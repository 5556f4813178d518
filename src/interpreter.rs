//! Boundary between the session loop and the command language.
//!
//! The session loop only knows how to hand a line to `parse`, run the
//! result with `execute`, and drop it afterwards. Everything about what a
//! command means lives behind `CommandInterpreter`.

use crate::client::{Client, ClientId};
use crate::output::ReplySink;
use std::fmt::Display;

/// A command language the control session can dispatch lines to.
pub trait CommandInterpreter {
    /// Parsed form of one line. Dropping it releases it.
    type Commands;
    /// Parse failure detail, reported to the peer.
    type Error: Display;

    /// Parse one line into a runnable command list.
    fn parse(&self, line: &str) -> Result<Self::Commands, Self::Error>;

    /// Run a parsed command list to completion.
    ///
    /// All output goes through `ctx` before this returns.
    fn execute(&mut self, commands: &Self::Commands, ctx: &mut CommandContext<'_>);
}

/// Where a running command sends its replies.
pub struct CommandContext<'a> {
    cur_client: &'a mut Client,
    cmd_client: Option<ClientId>,
    replies: &'a dyn ReplySink,
}

impl<'a> CommandContext<'a> {
    /// Bind a context to the connection that issued the command.
    pub fn new(cur_client: &'a mut Client, replies: &'a dyn ReplySink) -> Self {
        Self {
            cur_client,
            cmd_client: None,
            replies,
        }
    }

    /// Connection the replies are delivered to.
    pub fn client_id(&self) -> ClientId {
        self.cur_client.id()
    }

    /// Administrative client the command came from, if any.
    ///
    /// Always `None` for commands read from a control session.
    pub fn cmd_client(&self) -> Option<ClientId> {
        self.cmd_client
    }

    pub fn error(&mut self, text: &str) {
        self.replies.error(self.cur_client, text);
    }

    pub fn print(&mut self, text: &str) {
        self.replies.print(self.cur_client, text);
    }

    pub fn info(&mut self, text: &str) {
        self.replies.info(self.cur_client, text);
    }
}
