//! SSE ingestion shared by streaming adapters.
//!
//! Upstreams emit `data:` frames separated by blank lines. We buffer
//! response chunks, split on `\n\n`, strip any `\r`, ignore comment
//! (`:`-prefixed) and non-`data:` lines, and feed each payload to an
//! adapter-specific parser returning zero or more stream events. The
//! `[DONE]` sentinel is part of the wire protocol, not an implementation
//! detail — parsers see it verbatim.

use nx_domain::error::{Error, Result};
use nx_domain::stream::{BoxStream, StreamEvent};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// The buffer is drained in-place: consumed bytes are removed and any
/// trailing partial event remains for the next call. `\r` is stripped
/// so CRLF upstreams parse identically.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2); // remove the \n\n delimiter

        for line in block.lines() {
            let line = line.trim_end_matches('\r').trim();
            if line.starts_with(':') {
                continue; // SSE comment
            }
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a [`BoxStream`] from an SSE `reqwest::Response` and an
/// adapter-specific parser closure.
///
/// The closure is `FnMut` because adapters keep state across payloads
/// (tool-call fragment assembly). The stream flushes the trailing buffer
/// when the body closes and guarantees a final `Done` event even if the
/// upstream never sent one.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    for data in drain_data_lines(&mut buffer) {
                        for event in parse_data(&data) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed — flush any remaining partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for event in parse_data(&data) {
                                if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::ProviderRequestFailed(format!("stream read: {e}")));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done { finish_reason: Some("stop".into()) });
        }
    };

    Box::pin(stream)
}
