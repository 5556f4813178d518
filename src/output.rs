//! Output sink for control replies.
//!
//! Every reply is appended to the client's outbound buffer as one line and
//! the transport is asked to flush. Callers render their text first (with
//! `format!` or similar) and hand over a finished `&str`.

use crate::buffer::ByteBuffer;
use crate::client::Client;

/// Append `text` as one line and request a flush.
///
/// Trailing LFs in `text` are folded into the single terminator.
pub fn control_write(client: &mut Client, text: &str) {
    let text = text.trim_end_matches('\n');
    let out = client.outbound_mut();
    out.append(text.as_bytes());
    out.append(b"\n");
    client.push_output();
}

/// Append the whole of `buffer` as one line and request a flush.
///
/// `buffer` is left empty. As with [`control_write`], the output ends in
/// exactly one LF.
pub fn control_write_buffer(client: &mut Client, buffer: &mut ByteBuffer) {
    buffer.trim_end(b'\n');
    let out = client.outbound_mut();
    out.append_buffer(buffer);
    out.append(b"\n");
    client.push_output();
}

/// The three reply channels available to a running command.
pub trait ReplySink {
    /// Report a command failure.
    fn error(&self, client: &mut Client, text: &str);
    /// Ordinary command output.
    fn print(&self, client: &mut Client, text: &str);
    /// Informational output.
    fn info(&self, client: &mut Client, text: &str);
}

/// Reply channels of a control session.
///
/// Errors and output go to the peer; informational messages are not
/// part of the control protocol and are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlReplies;

impl ReplySink for ControlReplies {
    fn error(&self, client: &mut Client, text: &str) {
        control_write(client, text);
    }

    fn print(&self, client: &mut Client, text: &str) {
        control_write(client, text);
    }

    fn info(&self, _client: &mut Client, _text: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientId;

    fn outbound(client: &Client) -> &[u8] {
        client.outbound().peek()
    }

    #[test]
    fn test_write_appends_newline() {
        let mut client = Client::new(ClientId(0));
        control_write(&mut client, "hello");
        assert_eq!(outbound(&client), b"hello\n");
        assert!(client.take_flush_request());
    }

    #[test]
    fn test_write_does_not_double_newline() {
        let mut client = Client::new(ClientId(0));
        control_write(&mut client, "done\n");
        control_write(&mut client, "");
        assert_eq!(outbound(&client), b"done\n\n");
    }

    #[test]
    fn test_write_folds_trailing_newlines() {
        let mut client = Client::new(ClientId(0));
        control_write(&mut client, "a\n\n");
        control_write(&mut client, "b\nc\n\n\n");
        assert_eq!(outbound(&client), b"a\nb\nc\n");

        let mut body = ByteBuffer::from(&b"d\n\n"[..]);
        control_write_buffer(&mut client, &mut body);
        assert!(body.is_empty());
        assert_eq!(outbound(&client), b"a\nb\nc\nd\n");
    }

    #[test]
    fn test_write_buffer_consumes_source() {
        let mut client = Client::new(ClientId(0));
        let mut body = ByteBuffer::new();
        body.append(b"line one\n");
        body.append(b"line two");

        control_write_buffer(&mut client, &mut body);
        assert!(body.is_empty());
        assert_eq!(outbound(&client), b"line one\nline two\n");
        assert!(client.take_flush_request());

        body.append(b"already\n");
        control_write_buffer(&mut client, &mut body);
        assert_eq!(outbound(&client), b"line one\nline two\nalready\n");
    }

    #[test]
    fn test_control_replies_channels() {
        let mut client = Client::new(ClientId(0));
        let replies = ControlReplies;

        replies.error(&mut client, "bad");
        replies.print(&mut client, "good");
        assert_eq!(outbound(&client), b"bad\ngood\n");
        assert!(client.take_flush_request());

        replies.info(&mut client, "quiet");
        assert_eq!(outbound(&client), b"bad\ngood\n");
        assert!(!client.take_flush_request());
    }
}
