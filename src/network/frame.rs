// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Decoder;

use crate::AppError::{Incomplete, MalformedProtocol};
use crate::{AppError, AppResult};

/// Longest length prefix we are willing to buffer before seeing a `:`.
pub const MAX_LENGTH_DIGITS: usize = 20;

/// A socketmap request: `<length>:<map name> <key>,`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub map_name: String,
    pub key: String,
}

/// Byte offsets of one netstring inside the read buffer.
#[derive(Debug, PartialEq, Eq)]
struct FrameBounds {
    content_start: usize,
    content_end: usize,
    /// Bytes to drop from the buffer once the frame is handled.
    consumed: usize,
}

impl RequestFrame {
    pub fn new(map_name: impl Into<String>, key: impl Into<String>) -> Self {
        RequestFrame {
            map_name: map_name.into(),
            key: key.into(),
        }
    }

    /// Drops whitespace and stray terminators in front of the next frame.
    /// A client that counts the terminator into the length leaves a lone `,`
    /// behind when the frame arrives in pieces.
    fn skip_padding(buffer: &mut BytesMut) {
        let padding = buffer
            .iter()
            .take_while(|b| b.is_ascii_whitespace() || **b == b',')
            .count();
        buffer.advance(padding);
    }

    fn check(buffer: &BytesMut, max_frame_size: usize) -> AppResult<FrameBounds> {
        let Some(colon) = buffer.iter().position(|b| *b == b':') else {
            if buffer.len() > MAX_LENGTH_DIGITS || !buffer.iter().all(u8::is_ascii_digit) {
                return Err(MalformedProtocol("missing length delimiter".to_string()));
            }
            return Err(Incomplete);
        };

        let prefix = &buffer[..colon];
        if prefix.is_empty()
            || prefix.len() > MAX_LENGTH_DIGITS
            || !prefix.iter().all(u8::is_ascii_digit)
        {
            return Err(MalformedProtocol(format!(
                "invalid length prefix {:?}",
                String::from_utf8_lossy(prefix)
            )));
        }
        let length: usize = std::str::from_utf8(prefix)
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| MalformedProtocol("length prefix out of range".to_string()))?;
        if length > max_frame_size {
            return Err(MalformedProtocol(format!(
                "frame of length {} is too large",
                length
            )));
        }

        let content_start = colon + 1;
        let content_end = content_start + length;
        if buffer.len() < content_end {
            return match Self::short_frame_end(buffer, content_start) {
                Some(end) => Ok(FrameBounds {
                    content_start,
                    content_end: end,
                    consumed: end + 1,
                }),
                None => Err(Incomplete),
            };
        }

        let counted_terminator = length > 0 && buffer[content_end - 1] == b',';
        match buffer.get(content_end) {
            Some(b',') => Ok(FrameBounds {
                content_start,
                content_end,
                consumed: content_end + 1,
            }),
            // the length covered the terminator as well
            _ if counted_terminator => Ok(FrameBounds {
                content_start,
                content_end,
                consumed: content_end,
            }),
            Some(other) => Err(MalformedProtocol(format!(
                "expected ',' after {} bytes, found {:?}",
                length, *other as char
            ))),
            None => Err(Incomplete),
        }
    }

    /// A request whose length prefix overstates its content, e.g.
    /// `29:mailboxes user@example.com,`. It is accepted when the buffer ends
    /// with a `,` right after a `<map> <key>` pair, since the client is then
    /// waiting for an answer and no more bytes will come. Returns the offset
    /// of that terminator.
    fn short_frame_end(buffer: &BytesMut, content_start: usize) -> Option<usize> {
        let content = &buffer[content_start..];
        let (last, body) = content.split_last()?;
        if *last != b',' || body.contains(&b',') {
            return None;
        }
        let text = std::str::from_utf8(body).ok()?;
        let (map_name, key) = text.split_once(' ')?;
        (!map_name.is_empty() && !key.trim().is_empty()).then_some(buffer.len() - 1)
    }

    /// Discards input after a framing error so the next request can be read.
    /// Everything up to and including the next `,` goes, or the whole buffer
    /// when there is none.
    fn resync(buffer: &mut BytesMut) {
        match buffer.iter().position(|b| *b == b',') {
            Some(pos) => buffer.advance(pos + 1),
            None => buffer.clear(),
        }
    }

    fn decode_content(content: &[u8]) -> AppResult<RequestFrame> {
        let content = std::str::from_utf8(content)
            .map_err(|e| MalformedProtocol(format!("request is not utf-8: {}", e)))?;
        let (map_name, rest) = content
            .split_once(' ')
            .ok_or_else(|| MalformedProtocol(format!("no key in request {:?}", content)))?;
        let rest = rest.trim();
        if map_name.is_empty() || rest.is_empty() {
            return Err(MalformedProtocol(format!(
                "expected '<map> <key>', got {:?}",
                content
            )));
        }
        let key = rest.strip_suffix(',').unwrap_or(rest).trim();
        Ok(RequestFrame::new(map_name, key))
    }

    /// Extracts the next request from `buffer`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On a framing error the
    /// offending bytes are removed before the error is returned, so the
    /// caller can answer it and keep reading from the same buffer.
    pub fn parse(buffer: &mut BytesMut, max_frame_size: usize) -> AppResult<Option<RequestFrame>> {
        Self::skip_padding(buffer);
        if buffer.is_empty() {
            return Ok(None);
        }

        match RequestFrame::check(buffer, max_frame_size) {
            Ok(bounds) => {
                let frame = buffer.split_to(bounds.consumed);
                RequestFrame::decode_content(&frame[bounds.content_start..bounds.content_end])
                    .map(Some)
            }
            Err(Incomplete) => {
                if let Some(colon) = buffer.iter().position(|b| *b == b':') {
                    if let Ok(Ok(length)) =
                        std::str::from_utf8(&buffer[..colon]).map(str::parse::<usize>)
                    {
                        buffer.reserve((colon + length + 2).saturating_sub(buffer.len()));
                    }
                }
                Ok(None)
            }
            Err(e) => {
                Self::resync(buffer);
                Err(e)
            }
        }
    }

    /// Client side encoding, `<map name> <key>` as a netstring.
    pub fn encode(&self) -> BytesMut {
        format_response(&format!("{} {}", self.map_name, self.key))
    }
}

/// Wraps `text` in netstring framing. The length is counted in bytes.
pub fn format_response(text: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(text.len() + MAX_LENGTH_DIGITS + 2);
    buf.put_slice(text.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(text.as_bytes());
    buf.put_u8(b',');
    buf
}

/// Strict netstring decoder, used on the client side of the protocol.
#[derive(Debug, Clone)]
pub struct NetstringCodec {
    max_length: usize,
}

impl NetstringCodec {
    pub fn new(max_length: usize) -> Self {
        NetstringCodec { max_length }
    }
}

impl Decoder for NetstringCodec {
    type Item = BytesMut;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(colon) = src.iter().position(|b| *b == b':') else {
            if src.len() > MAX_LENGTH_DIGITS || !src.iter().all(u8::is_ascii_digit) {
                return Err(MalformedProtocol("missing length delimiter".to_string()));
            }
            return Ok(None);
        };
        let length: usize = std::str::from_utf8(&src[..colon])
            .ok()
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| MalformedProtocol("invalid length prefix".to_string()))?;
        if length > self.max_length {
            return Err(MalformedProtocol(format!(
                "netstring of length {} is too large",
                length
            )));
        }
        if src.len() < colon + length + 2 {
            src.reserve(colon + length + 2 - src.len());
            return Ok(None);
        }
        if src[colon + 1 + length] != b',' {
            return Err(MalformedProtocol("missing netstring terminator".to_string()));
        }

        src.advance(colon + 1);
        let payload = src.split_to(length);
        src.advance(1);
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const MAX: usize = 4096;

    fn parse_all(input: &[u8]) -> Vec<AppResult<Option<RequestFrame>>> {
        let mut buffer = BytesMut::from(input);
        let mut results = Vec::new();
        loop {
            let result = RequestFrame::parse(&mut buffer, MAX);
            let done = matches!(result, Ok(None));
            results.push(result);
            if done {
                return results;
            }
        }
    }

    #[rstest]
    #[case(b"19:domains example.com,", "domains", "example.com")]
    // a length that counts the trailing comma is tolerated
    #[case(b"20:domains example.com,", "domains", "example.com")]
    #[case(b"26:mailboxes user@example.com,", "mailboxes", "user@example.com")]
    #[case(b"19:mailboxes  a b c , ,", "mailboxes", "a b c")]
    #[case(b"  19:domains example.com,", "domains", "example.com")]
    // overstated lengths, the request ends at the final comma
    #[case(b"29:mailboxes user@example.com,", "mailboxes", "user@example.com")]
    #[case(b"27:mailboxes user@example.com,", "mailboxes", "user@example.com")]
    #[case(b"4000:domains example.com,", "domains", "example.com")]
    fn parses_single_request(#[case] input: &[u8], #[case] map: &str, #[case] key: &str) {
        let mut buffer = BytesMut::from(input);
        let frame = RequestFrame::parse(&mut buffer, MAX).unwrap().unwrap();
        assert_eq!(frame, RequestFrame::new(map, key));
        assert!(buffer.is_empty());
    }

    #[rstest]
    #[case(b"")]
    #[case(b"1")]
    #[case(b"19")]
    #[case(b"19:")]
    #[case(b"19:domains exam")]
    #[case(b"19:domains example.com")]
    #[case(b"29:domains,")]
    #[case(b"29:domains ,")]
    fn waits_for_more_bytes(#[case] input: &[u8]) {
        let mut buffer = BytesMut::from(input);
        assert!(RequestFrame::parse(&mut buffer, MAX).unwrap().is_none());
        assert_eq!(&buffer[..], input);
    }

    #[rstest]
    #[case(b"domains example.com,")]
    #[case(b"x9:domains example.com,")]
    #[case(b":domains example.com,")]
    #[case(b"7:domains,")]
    #[case(b"19:domains example.comX")]
    #[case(b"9:domains  ,")]
    #[case(b"123456789012345678901:a b,")]
    fn rejects_malformed_request(#[case] input: &[u8]) {
        let mut buffer = BytesMut::from(input);
        assert!(matches!(
            RequestFrame::parse(&mut buffer, MAX),
            Err(AppError::MalformedProtocol(_))
        ));
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut buffer = BytesMut::from(&b"5000:domains example.com,"[..]);
        assert!(matches!(
            RequestFrame::parse(&mut buffer, MAX),
            Err(AppError::MalformedProtocol(_))
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut buffer = BytesMut::from(&b"10:domains \xff\xfe,"[..]);
        assert!(matches!(
            RequestFrame::parse(&mut buffer, MAX),
            Err(AppError::MalformedProtocol(_))
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn recovers_after_malformed_request() {
        let results = parse_all(b"domains example.com,19:domains example.org,");
        assert_eq!(results.len(), 3);
        assert!(results[0].is_err());
        assert_eq!(
            results[1].as_ref().unwrap().as_ref().unwrap(),
            &RequestFrame::new("domains", "example.org")
        );
    }

    #[test]
    fn overstated_length_does_not_swallow_next_request() {
        let mut buffer = BytesMut::from(&b"29:mailboxes user@example.com,"[..]);
        assert_eq!(
            RequestFrame::parse(&mut buffer, MAX).unwrap(),
            Some(RequestFrame::new("mailboxes", "user@example.com"))
        );
        assert!(buffer.is_empty());

        buffer.put_slice(b"20:domains example.com,");
        assert_eq!(
            RequestFrame::parse(&mut buffer, MAX).unwrap(),
            Some(RequestFrame::new("domains", "example.com"))
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn parses_coalesced_requests_in_order() {
        let results =
            parse_all(b"19:domains example.com,26:mailboxes user@example.com,20:domains example.org,");
        let frames: Vec<RequestFrame> = results
            .into_iter()
            .filter_map(|r| r.unwrap())
            .collect();
        assert_eq!(
            frames,
            vec![
                RequestFrame::new("domains", "example.com"),
                RequestFrame::new("mailboxes", "user@example.com"),
                RequestFrame::new("domains", "example.org"),
            ]
        );
    }

    #[test]
    fn parses_fragmented_request() {
        let input = b"26:mailboxes user@example.com,";
        let mut buffer = BytesMut::new();
        for (i, byte) in input.iter().enumerate() {
            buffer.put_u8(*byte);
            let parsed = RequestFrame::parse(&mut buffer, MAX).unwrap();
            if i + 1 < input.len() {
                assert!(parsed.is_none(), "complete after {} bytes", i + 1);
            } else {
                assert_eq!(parsed, Some(RequestFrame::new("mailboxes", "user@example.com")));
            }
        }
        assert!(buffer.is_empty());
    }

    #[rstest]
    #[case("OK ", b"3:OK ,")]
    #[case("NOTFOUND ", b"9:NOTFOUND ,")]
    #[case("OK example.com/user/", b"20:OK example.com/user/,")]
    #[case("OK müller.de/ö/", b"17:OK m\xc3\xbcller.de/\xc3\xb6/,")]
    #[case("", b"0:,")]
    fn formats_response(#[case] text: &str, #[case] expected: &[u8]) {
        assert_eq!(&format_response(text)[..], expected);
    }

    #[rstest]
    #[case("example.com")]
    #[case("user@example.com")]
    #[case("key with spaces")]
    #[case("x")]
    fn encoded_request_round_trips(#[case] key: &str) {
        let request = RequestFrame::new("domains", key);
        let mut buffer = request.encode();
        assert_eq!(RequestFrame::parse(&mut buffer, MAX).unwrap(), Some(request));
    }

    #[test]
    fn codec_decodes_netstrings() {
        let mut codec = NetstringCodec::new(MAX);
        let mut src = BytesMut::from(&b"3:OK ,9:NOTF"[..]);
        assert_eq!(&codec.decode(&mut src).unwrap().unwrap()[..], b"OK ");
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.put_slice(b"OUND ,");
        assert_eq!(&codec.decode(&mut src).unwrap().unwrap()[..], b"NOTFOUND ");
        assert!(src.is_empty());

        let mut src = BytesMut::from(&b"3:OK !"[..]);
        assert!(codec.decode(&mut src).is_err());
    }
}
