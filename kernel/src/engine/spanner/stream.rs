//! Incremental decoding of `executeStreamingSql` responses.
//!
//! The REST API streams a JSON array of `PartialResultSet` messages. Bytes are fed in as they
//! arrive, split into complete messages, and the flat list of values those messages carry is cut
//! into rows of the result set's width. Only the messages of rows not yet read are held in memory.

use std::collections::VecDeque;
use std::sync::Arc;

use reqwest::{Response, StatusCode};
use serde_json::Value;
use tokio::runtime::Runtime;

use super::client::status_error;
use super::decode::{decode_row, schema};
use super::models::PartialResultSet;
use crate::row::{Row, RowCursor};
use crate::schema::SchemaRef;
use crate::utils::require;
use crate::{Error, PitrResult};

/// Finds the complete elements of a JSON array whose bytes arrive in arbitrary pieces.
#[derive(Debug, Default)]
struct JsonArraySplitter {
    buffer: Vec<u8>,
    scanned: usize,
    depth: usize,
    element_start: Option<usize>,
    in_string: bool,
    escaped: bool,
    closed: bool,
    finished: bool,
}

impl JsonArraySplitter {
    fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    /// The next complete element, or `None` until more bytes have been fed.
    fn next_element(&mut self) -> PitrResult<Option<Vec<u8>>> {
        while self.scanned < self.buffer.len() {
            let i = self.scanned;
            let byte = self.buffer[i];
            self.scanned += 1;

            if self.in_string {
                match byte {
                    _ if self.escaped => self.escaped = false,
                    b'\\' => self.escaped = true,
                    b'"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => {
                    self.depth += 1;
                    if self.depth == 2 {
                        self.element_start = Some(i);
                    }
                }
                b'}' | b']' => {
                    self.depth = self
                        .depth
                        .checked_sub(1)
                        .ok_or_else(|| Error::decode("Unbalanced streaming response"))?;
                    match (self.depth, self.element_start) {
                        (1, Some(start)) => {
                            let element = self.buffer[start..=i].to_vec();
                            self.buffer.drain(..=i);
                            self.scanned = 0;
                            self.element_start = None;
                            return Ok(Some(element));
                        }
                        (0, _) => self.closed = true,
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        if self.element_start.is_none() {
            self.buffer.clear();
            self.scanned = 0;
        }
        require!(
            !self.finished || self.closed,
            Error::decode("Streaming response ended before the result set was complete")
        );
        Ok(None)
    }
}

/// Turns the messages of a streaming response into rows.
#[derive(Debug, Default)]
pub(crate) struct PartialResultDecoder {
    messages: JsonArraySplitter,
    schema: Option<SchemaRef>,
    pending: VecDeque<Value>,
    chunked: Option<Value>,
}

impl PartialResultDecoder {
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.messages.feed(bytes);
    }

    /// Mark the end of the response body.
    pub(crate) fn finish(&mut self) {
        self.messages.finish();
    }

    /// The schema, once the first message has been decoded.
    pub(crate) fn schema(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    /// Decode the next buffered message. False if more bytes are needed first, or there are none.
    pub(crate) fn next_message(&mut self) -> PitrResult<bool> {
        match self.messages.next_element()? {
            Some(element) => {
                let message = parse_message(&element)?;
                self.push(message)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The next complete row, or `None` if more bytes are needed or the response is over.
    pub(crate) fn next_row(&mut self) -> PitrResult<Option<Row>> {
        loop {
            if let Some(schema) = &self.schema {
                let width = schema.len();
                if width > 0 && self.pending.len() >= width {
                    let values = self.pending.drain(..width).collect();
                    return decode_row(schema, values).map(Some);
                }
            }
            if !self.next_message()? {
                if self.messages.finished {
                    require!(
                        self.chunked.is_none() && self.pending.is_empty(),
                        Error::decode("Streaming response ended in the middle of a row")
                    );
                }
                return Ok(None);
            }
        }
    }

    fn push(&mut self, message: PartialResultSet) -> PitrResult<()> {
        if self.schema.is_none() {
            self.schema = Some(schema(message.metadata.as_ref()));
        }
        let mut values = message.values.into_iter();
        if let Some(head) = self.chunked.take() {
            let value = match values.next() {
                Some(tail) => merge_chunks(head, tail)?,
                None => head,
            };
            self.pending.push_back(value);
        }
        self.pending.extend(values);
        if message.chunked_value {
            self.chunked = self.pending.pop_back();
        }
        Ok(())
    }
}

/// A message, or the error Spanner appends to the array when a query fails mid-stream.
fn parse_message(element: &[u8]) -> PitrResult<PartialResultSet> {
    let value: Value = serde_json::from_slice(element)?;
    if let Some(error) = value.get("error") {
        let status = error
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err(status_error(status, &String::from_utf8_lossy(element)));
    }
    Ok(serde_json::from_value(value)?)
}

/// Join a value split across two messages: strings concatenate, lists concatenate with their
/// adjoining string or list elements joined in turn.
fn merge_chunks(head: Value, tail: Value) -> PitrResult<Value> {
    match (head, tail) {
        (Value::String(mut head), Value::String(tail)) => {
            head.push_str(&tail);
            Ok(Value::String(head))
        }
        (Value::Array(mut head), Value::Array(tail)) => {
            let mut tail = tail.into_iter();
            match (head.pop(), tail.next()) {
                (Some(last @ (Value::String(_) | Value::Array(_))), Some(first)) => {
                    head.push(merge_chunks(last, first)?)
                }
                (last, first) => head.extend(last.into_iter().chain(first)),
            }
            head.extend(tail);
            Ok(Value::Array(head))
        }
        (head, tail) => Err(Error::decode(format!(
            "Cannot join chunked values {head} and {tail}"
        ))),
    }
}

/// Rows of a streaming response, read from the connection as the caller asks for them.
///
/// Dropping the cursor drops the response, which closes the connection and ends the query.
pub(crate) struct StreamingRows {
    runtime: Arc<Runtime>,
    response: Option<Response>,
    decoder: PartialResultDecoder,
    done: bool,
}

impl StreamingRows {
    /// Read until the result set metadata has arrived, and return a cursor over the rows.
    pub(crate) fn open(runtime: Arc<Runtime>, response: Response) -> PitrResult<RowCursor> {
        let mut rows = Self {
            runtime,
            response: Some(response),
            decoder: PartialResultDecoder::default(),
            done: false,
        };
        let schema = loop {
            if let Some(schema) = rows.decoder.schema() {
                break schema.clone();
            }
            if !rows.decoder.next_message()? && !rows.read_more()? {
                return Err(Error::decode(
                    "Streaming response ended before the result set metadata",
                ));
            }
        };
        Ok(RowCursor::new(schema, rows))
    }

    /// Feed the next piece of the body to the decoder. False once the body is exhausted.
    fn read_more(&mut self) -> PitrResult<bool> {
        let Some(response) = self.response.as_mut() else {
            return Ok(false);
        };
        match self.runtime.block_on(response.chunk())? {
            Some(bytes) => self.decoder.feed(&bytes),
            None => {
                self.response = None;
                self.decoder.finish();
            }
        }
        Ok(true)
    }

    fn next_row(&mut self) -> PitrResult<Option<Row>> {
        loop {
            if let Some(row) = self.decoder.next_row()? {
                return Ok(Some(row));
            }
            if !self.read_more()? {
                return Ok(None);
            }
        }
    }
}

impl Iterator for StreamingRows {
    type Item = PitrResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.next_row().transpose();
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
            self.response = None;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use serde_json::json;

    use crate::scalars::Scalar;

    const BODY: &str = r#"[{
  "metadata": {"rowType": {"fields": [
    {"name": "id", "type": {"code": "INT64"}},
    {"name": "note", "type": {"code": "STRING"}}
  ]}},
  "values": ["1", "a \"quoted\" [note]", "2", "sp"],
  "chunkedValue": true
},
{
  "values": ["lit}", "3", null]
}
]"#;

    fn rows_of(decoder: &mut PartialResultDecoder) -> Vec<Row> {
        std::iter::from_fn(|| decoder.next_row().unwrap()).collect()
    }

    #[rstest]
    #[case::whole(BODY.len())]
    #[case::byte_by_byte(1)]
    #[case::uneven(7)]
    fn test_rows_across_arbitrary_pieces(#[case] piece: usize) {
        let mut decoder = PartialResultDecoder::default();
        let mut rows = vec![];
        for bytes in BODY.as_bytes().chunks(piece) {
            decoder.feed(bytes);
            rows.extend(rows_of(&mut decoder));
        }
        decoder.finish();
        rows.extend(rows_of(&mut decoder));

        assert_eq!(decoder.schema().unwrap().len(), 2);
        let values: Vec<_> = rows.iter().map(|row| row.values().to_vec()).collect();
        assert_eq!(
            values,
            [
                vec![Scalar::Long(1), Scalar::from("a \"quoted\" [note]")],
                vec![Scalar::Long(2), Scalar::from("split}")],
                vec![Scalar::Long(3), Scalar::Null],
            ]
        );
    }

    #[test]
    fn test_rows_are_yielded_before_the_response_ends() {
        let mut decoder = PartialResultDecoder::default();
        let first_message = &BODY[..BODY.find("},\n{").unwrap() + 1];
        decoder.feed(first_message.as_bytes());
        assert_eq!(rows_of(&mut decoder).len(), 1);
        // the second row's note is still waiting for its continuation
        assert!(decoder.next_row().unwrap().is_none());
    }

    #[test]
    fn test_empty_result_keeps_schema() {
        let mut decoder = PartialResultDecoder::default();
        decoder.feed(br#"[{"metadata": {"rowType": {"fields": [{"name": "", "type": {"code": "BOOL"}}]}}}]"#);
        decoder.finish();
        assert!(decoder.next_row().unwrap().is_none());
        assert_eq!(decoder.schema().unwrap().len(), 1);
    }

    #[rstest]
    #[case::unclosed(r#"[{"metadata": {}, "values": []}"#)]
    #[case::partial_row(
        r#"[{"metadata": {"rowType": {"fields": [{"name": "a", "type": {"code": "BOOL"}}, {"name": "b", "type": {"code": "BOOL"}}]}}, "values": [true]}]"#
    )]
    #[case::dangling_chunk(
        r#"[{"metadata": {"rowType": {"fields": [{"name": "a", "type": {"code": "STRING"}}]}}, "values": ["x"], "chunkedValue": true}]"#
    )]
    fn test_truncated_response(#[case] body: &str) {
        let mut decoder = PartialResultDecoder::default();
        decoder.feed(body.as_bytes());
        decoder.finish();
        assert!(matches!(decoder.next_row(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_error_after_rows() {
        let mut decoder = PartialResultDecoder::default();
        decoder.feed(
            br#"[{"metadata": {"rowType": {"fields": [{"name": "ok", "type": {"code": "BOOL"}}]}}, "values": [true]},
{"error": {"code": 409, "message": "Transaction was aborted.", "status": "ABORTED"}}]"#,
        );
        assert!(decoder.next_row().unwrap().is_some());
        assert!(matches!(
            decoder.next_row(),
            Err(Error::Query { status, .. }) if status == "ABORTED"
        ));
    }

    #[rstest]
    #[case::strings(json!("ab"), json!("cd"), json!("abcd"))]
    #[case::numbers(json!([1, 2]), json!([3]), json!([1, 2, 3]))]
    #[case::string_lists(json!(["a", "b"]), json!(["c", "d"]), json!(["a", "bc", "d"]))]
    #[case::nested_lists(json!([[1, 2], [3]]), json!([[4], [5, 6]]), json!([[1, 2], [3, 4], [5, 6]]))]
    #[case::empty_tail(json!(["a"]), json!([]), json!(["a"]))]
    fn test_merge_chunks(#[case] head: Value, #[case] tail: Value, #[case] expected: Value) {
        assert_eq!(merge_chunks(head, tail).unwrap(), expected);
    }

    #[test]
    fn test_merge_mismatched_chunks() {
        assert!(merge_chunks(json!("a"), json!(["b"])).is_err());
        assert!(merge_chunks(json!(true), json!(false)).is_err());
    }
}
