//! Message body reader.
//!
//! Reads the dot-stuffed message that follows a 354 reply, per RFC 5321
//! section 4.5.2, and enforces the RFC 1870 size limit.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{Error, Result};
use crate::wire;

/// Read body lines until the bare `.` terminator.
///
/// Each accepted line has a leading `.` stripped, then is appended to the
/// body followed by CRLF; bare LF terminators are normalized. When
/// `max_size` is non-zero and the running total would exceed it, the rest
/// of the input is still consumed up to the terminator, so the connection
/// stays usable for the RSET or QUIT expected after a 552, and
/// `MaxSizeExceeded` is returned.
pub(crate) async fn read_body<R>(
    reader: &mut R,
    max_size: usize,
    deadline: Duration,
) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    let mut line = Vec::new();
    let mut total = 0usize;
    let mut overflowed = false;
    loop {
        line.clear();
        let n = wire::with_deadline(deadline, reader.read_until(b'\n', &mut line)).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.as_slice() == b"." {
            break;
        }
        let text: &[u8] = if line.first() == Some(&b'.') {
            &line[1..]
        } else {
            &line
        };
        total += text.len() + 2;
        if max_size > 0 && total > max_size {
            overflowed = true;
        }
        if !overflowed {
            body.extend_from_slice(text);
            body.extend_from_slice(b"\r\n");
        }
    }
    if overflowed {
        return Err(Error::MaxSizeExceeded);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader};

    const HEADERS: &[u8] = b"Content-Type: text/plain\r\n\r\n";

    #[tokio::test]
    async fn strips_stuffed_dots() {
        let cases: &[(&[u8], &[u8])] = &[
            (b"Test message.\r\n.\r\n", b"Test message.\r\n"),
            (b".Test message.\r\n.\r\n", b"Test message.\r\n"),
            (
                b"Line 1.\r\nLine 2.\r\nLine 3.\r\n.\r\n",
                b"Line 1.\r\nLine 2.\r\nLine 3.\r\n",
            ),
            (
                b"Line 1.\r\n..Line 2.\r\nLine 3.\r\n.\r\n",
                b"Line 1.\r\n.Line 2.\r\nLine 3.\r\n",
            ),
            (b"bare\nlf\n.\r\n", b"bare\r\nlf\r\n"),
        ];
        for (input, want) in cases {
            let mut reader = BufReader::new(*input);
            let body = read_body(&mut reader, 0, Duration::ZERO).await.unwrap();
            assert_eq!(body.as_slice(), *want, "input {:?}", input);
        }
    }

    #[tokio::test]
    async fn eof_before_terminator_is_fatal() {
        let mut reader = BufReader::new(&b""[..]);
        let err = read_body(&mut reader, 0, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));

        let mut reader = BufReader::new(&b"no terminator\r\n"[..]);
        let err = read_body(&mut reader, 0, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn enforces_maximum_size() {
        // "Test message.\r\n" is 15 bytes once the terminator is removed.
        let input: Vec<u8> = [HEADERS, &b"Test message.\r\n.\r\n"[..]].concat();
        let at_limit = HEADERS.len() + 15;

        let mut reader = BufReader::new(&input[..]);
        assert!(read_body(&mut reader, at_limit, Duration::ZERO).await.is_ok());

        let mut reader = BufReader::new(&input[..]);
        assert!(read_body(&mut reader, at_limit + 1, Duration::ZERO).await.is_ok());

        let mut reader = BufReader::new(&input[..]);
        let err = read_body(&mut reader, at_limit - 1, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MaxSizeExceeded));
    }

    #[tokio::test]
    async fn overflow_still_drains_to_the_terminator() {
        let input = b"an oversized line of message text\r\nmore\r\n.\r\nNOOP\r\n";
        let mut reader = BufReader::new(&input[..]);
        let err = read_body(&mut reader, 8, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::MaxSizeExceeded));

        // Everything through the terminator was consumed; the next command
        // is intact.
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest.as_slice(), b"NOOP\r\n");
    }
}
