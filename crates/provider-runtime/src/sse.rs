//! Minimal Server-Sent-Events line framing shared by the HTTP-based adapters.
//!
//! Neither OpenAI's nor Anthropic's streaming wire format needs a full SSE
//! parser (no retry/id fields in practice) — just splitting the byte stream
//! on newlines and handing back non-empty `data: ...` lines.

use bytes::Bytes;
use futures::Stream;

/// Split a chunked byte stream on newlines, yielding complete non-empty lines.
pub fn lines(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> impl Stream<Item = String> + Send {
    futures::stream::unfold((byte_stream, String::new()), |(mut stream, mut buf)| async move {
        use futures::StreamExt;
        loop {
            if let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim_end_matches('\r').to_string();
                buf.drain(..=pos);
                if line.is_empty() {
                    continue;
                }
                return Some((line, (stream, buf)));
            }
            match stream.next().await {
                Some(Ok(bytes)) => buf.push_str(&String::from_utf8_lossy(&bytes)),
                _ => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn lines_splits_on_newlines_and_skips_blank_lines() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: a\n\ndata: b")),
            Ok(Bytes::from_static(b"\n")),
        ];
        let byte_stream = futures::stream::iter(chunks);
        let collected: Vec<String> = lines(byte_stream).collect().await;
        assert_eq!(collected, vec!["data: a".to_string(), "data: b".to_string()]);
    }

    #[tokio::test]
    async fn lines_reassembles_a_line_split_across_chunks() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: hel")),
            Ok(Bytes::from_static(b"lo\n")),
        ];
        let byte_stream = futures::stream::iter(chunks);
        let collected: Vec<String> = lines(byte_stream).collect().await;
        assert_eq!(collected, vec!["data: hello".to_string()]);
    }
}
