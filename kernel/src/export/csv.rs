//! Quoted CSV encoding: every present field is wrapped in `"` (with embedded quotes doubled),
//! fields are separated by `,` and rows end with `\n`. An absent field is written as nothing at
//! all, so `NULL` stays distinguishable from the empty string `""`.

use std::io::{self, Write};

const QUOTE: u8 = b'"';
const SEPARATOR: u8 = b',';
const LINE_END: &[u8] = b"\n";

pub(crate) fn write_row<'a, W: Write + ?Sized>(
    writer: &mut W,
    fields: impl IntoIterator<Item = Option<&'a str>>,
) -> io::Result<()> {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            writer.write_all(&[SEPARATOR])?;
        }
        if let Some(field) = field {
            write_quoted(writer, field)?;
        }
    }
    writer.write_all(LINE_END)
}

fn write_quoted<W: Write + ?Sized>(writer: &mut W, field: &str) -> io::Result<()> {
    writer.write_all(&[QUOTE])?;
    let mut pieces = field.split('"');
    if let Some(first) = pieces.next() {
        writer.write_all(first.as_bytes())?;
    }
    for piece in pieces {
        writer.write_all(&[QUOTE, QUOTE])?;
        writer.write_all(piece.as_bytes())?;
    }
    writer.write_all(&[QUOTE])
}
