//! Line-oriented wire codec.
//!
//! SMTP is a CRLF-framed text protocol. This module owns both directions of
//! it: bounded command-line reads, and reply writes with the multi-line
//! continuation markers from RFC 5321 section 4.2.1.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// RFC 5321 limit for a command line.
pub(crate) const MAX_COMMAND_LINE: usize = 512;

/// Result of one bounded line read.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Line {
    /// A complete line with the CRLF (or bare LF) terminator stripped.
    Complete(String),
    /// The peer closed the connection between lines.
    Eof,
    /// The line exceeded the limit. Input was consumed through the
    /// terminator so the next read starts on a fresh line.
    TooLong,
}

/// Read one line, refusing to buffer more than `limit` bytes of it.
pub(crate) async fn read_line<R>(reader: &mut R, limit: usize) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    let mut line: Vec<u8> = Vec::new();
    let mut discarding = false;
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(Line::Eof);
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if !discarding {
                    line.extend_from_slice(&buf[..pos]);
                }
                reader.consume(pos + 1);
                if discarding || line.len() > limit {
                    return Ok(Line::TooLong);
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Line::Complete(String::from_utf8_lossy(&line).into_owned()));
            }
            None => {
                let n = buf.len();
                if !discarding {
                    line.extend_from_slice(buf);
                    if line.len() > limit {
                        discarding = true;
                        line.clear();
                    }
                }
                reader.consume(n);
            }
        }
    }
}

/// A single SMTP reply, possibly spanning multiple text lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    pub(crate) fn new(code: u16, text: impl Into<String>) -> Self {
        Reply {
            code,
            text: text.into(),
        }
    }

    /// Render with continuation markers: `250-` on all but the last line,
    /// `250 ` on the last, each line CRLF-terminated.
    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        let mut lines = self.text.lines().peekable();
        while let Some(line) = lines.next() {
            let sep = if lines.peek().is_none() { ' ' } else { '-' };
            out.push_str(&format!("{}{}{}\r\n", self.code, sep, line));
        }
        if out.is_empty() {
            out = format!("{}\r\n", self.code);
        }
        out
    }
}

pub(crate) async fn write_reply<W>(writer: &mut W, reply: &Reply) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(reply.render().as_bytes()).await?;
    writer.flush().await
}

/// Apply the session deadline to an I/O future. A zero duration disables
/// the deadline.
pub(crate) async fn with_deadline<F, T>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    if deadline.is_zero() {
        return Ok(fut.await?);
    }
    match tokio::time::timeout(deadline, fut).await {
        Ok(res) => Ok(res?),
        Err(_) => Err(Error::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn renders_single_line_reply() {
        assert_eq!(Reply::new(250, "OK").render(), "250 OK\r\n");
    }

    #[test]
    fn renders_continuation_markers() {
        let reply = Reply::new(250, "mail.example.com greets peer\nPIPELINING\nSIZE 0");
        assert_eq!(
            reply.render(),
            "250-mail.example.com greets peer\r\n250-PIPELINING\r\n250 SIZE 0\r\n"
        );
    }

    #[tokio::test]
    async fn reads_crlf_and_bare_lf_lines() {
        let mut reader = BufReader::new(&b"NOOP\r\nRSET\nQUIT\r\n"[..]);
        assert_eq!(
            read_line(&mut reader, 512).await.unwrap(),
            Line::Complete("NOOP".into())
        );
        assert_eq!(
            read_line(&mut reader, 512).await.unwrap(),
            Line::Complete("RSET".into())
        );
        assert_eq!(
            read_line(&mut reader, 512).await.unwrap(),
            Line::Complete("QUIT".into())
        );
        assert_eq!(read_line(&mut reader, 512).await.unwrap(), Line::Eof);
    }

    #[tokio::test]
    async fn oversize_line_is_drained_through_its_terminator() {
        let mut input = vec![b'A'; 600];
        input.extend_from_slice(b"\r\nNOOP\r\n");
        let mut reader = BufReader::new(&input[..]);
        assert_eq!(read_line(&mut reader, 512).await.unwrap(), Line::TooLong);
        assert_eq!(
            read_line(&mut reader, 512).await.unwrap(),
            Line::Complete("NOOP".into())
        );
    }

    #[tokio::test]
    async fn empty_line_is_complete() {
        let mut reader = BufReader::new(&b"\r\n"[..]);
        assert_eq!(
            read_line(&mut reader, 512).await.unwrap(),
            Line::Complete(String::new())
        );
    }
}
