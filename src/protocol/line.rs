//! LF-delimited line framing shared by every protocol front-end
//!
//! Grounded on `python/archiver/protocol.py`'s `MessageReceiver`, a Twisted
//! `LineOnlyReceiver` subclass with `delimiter = '\n'` that additionally
//! strips a trailing `\r` so telnet clients (which send CRLF) work
//! unmodified, and caps accepted line length.

use crate::errors::{ArchiverError, ArchiverResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Matches the original's line-length ceiling; a line past this is logged
/// and dropped rather than killing the connection.
pub const MAX_LINE_LEN: usize = 1 << 16;

pub struct LineReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Reads one line with its delimiter stripped. `Ok(None)` means the
    /// stream reached EOF cleanly. An oversized line is reported as a
    /// `Protocol` error with the offending byte count already consumed off
    /// the wire, so the caller can log and keep reading the next line.
    pub async fn read_line(&mut self) -> ArchiverResult<Option<String>> {
        let mut buf = Vec::new();
        let n = self.inner.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        if buf.len() > MAX_LINE_LEN {
            return Err(ArchiverError::protocol(format!(
                "line exceeds max length of {MAX_LINE_LEN} bytes"
            )));
        }
        let line = String::from_utf8(buf).map_err(ArchiverError::from)?;
        Ok(Some(line))
    }
}

/// Splits a command line into tokens, honoring `"..."` quoting so an
/// expression or help string containing spaces can be passed as one
/// argument.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut token = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                token.push(c);
            }
        } else {
            while matches!(chars.peek(), Some(c) if !c.is_whitespace()) {
                token.push(chars.next().unwrap());
            }
        }
        tokens.push(token);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_whitespace() {
        assert_eq!(tokenize("monitor info"), vec!["monitor", "info"]);
    }

    #[test]
    fn tokenize_honors_quotes() {
        let tokens = tokenize(r#"monitor create M "x.y.val + 1" "my help""#);
        assert_eq!(tokens, vec!["monitor", "create", "M", "x.y.val + 1", "my help"]);
    }

    #[tokio::test]
    async fn read_line_strips_cr_lf() {
        let data = b"hello\r\nworld\n".to_vec();
        let mut reader = LineReader::new(std::io::Cursor::new(data));
        assert_eq!(reader.read_line().await.unwrap(), Some("hello".to_string()));
        assert_eq!(reader.read_line().await.unwrap(), Some("world".to_string()));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_line_rejects_oversized_input() {
        let data = vec![b'a'; MAX_LINE_LEN + 10];
        let mut reader = LineReader::new(std::io::Cursor::new(data));
        assert!(reader.read_line().await.is_err());
    }
}
