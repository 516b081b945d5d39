use {
    super::{
        options::{self, Encoding, RenderOptions},
        table::{ItemSource, Table, tabulize},
    },
    serde::Serialize,
    serde_json::Value,
    std::{borrow::Cow, cell::RefCell, io::Write, rc::Rc},
    tracing::instrument,
};

/// Field holding the page's items in a paginated response.
pub const DEFAULT_RESULTS_FIELD: &str = "results";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid render options")]
    Options(#[from] options::Error),
    #[error("Could not serialize the item to a value")]
    SerializingToValue(#[source] serde_json::Error),
    #[error("Writing row #{idx}")]
    WritingRecord {
        idx: usize,
        #[source]
        source: csv::Error,
    },
    #[error("Flushing the csv writer")]
    Flushing(#[source] std::io::Error),
    #[error("Row #{idx} holds {ch:?}, which {encoding} cannot represent")]
    Unencodable { idx: usize, ch: char, encoding: Encoding },
}

type Result<T> = std::result::Result<T, self::Error>;

/// Text of a single cell. `null` (an absent column) and `""` look the same once written.
fn cell_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::Bool(bool) => Cow::Owned(bool.to_string()),
        Value::Number(number) => Cow::Owned(number.to_string()),
        Value::String(v) => Cow::Borrowed(v.as_str()),
        // flattening never leaves a container in a cell
        other @ (Value::Array(_) | Value::Object(_)) => Cow::Owned(other.to_string()),
    }
}

#[extension_traits::extension(pub trait CsvWriterTableExt)]
impl<W: Write> csv::Writer<W> {
    /// Writes one table row. `idx` counts the header row as `0`.
    ///
    /// The row must hold at least one cell: csv writes an empty record as `""`, which reads
    /// back as one empty column.
    fn write_table_row(&mut self, idx: usize, row: &[Value], encoding: Encoding) -> Result<()> {
        row.iter()
            .map(|cell| {
                encoding
                    .encode(cell_text(cell))
                    .map_err(|ch| self::Error::Unencodable { idx, ch, encoding })
            })
            .collect::<Result<Vec<_>>>()
            .and_then(|fields| {
                self.write_record(&fields)
                    .map_err(|source| self::Error::WritingRecord { idx, source })
            })
    }
}

/// Turns any serializable collection into items.
pub fn to_items<'a, T>(items: impl IntoIterator<Item = &'a T>) -> Result<Vec<Value>>
where
    T: Serialize + 'a,
{
    items
        .into_iter()
        .map(|item| serde_json::to_value(item).map_err(self::Error::SerializingToValue))
        .collect()
}

/// Renders `items` into one CSV document.
#[instrument(skip_all, fields(level_sep = %options.level_sep, encoding = %options.encoding))]
pub fn render<'a, S>(items: S, options: &'a RenderOptions) -> Result<Vec<u8>>
where
    S: ItemSource,
    S::Items: 'a,
{
    render_lines(items, options)?
        .try_fold((0usize, Vec::new()), |(written, mut out), line| {
            line.map(|line| {
                out.extend_from_slice(&line);
                (written + 1, out)
            })
        })
        .map(|(written, out)| {
            tracing::debug!(written, bytes = out.len(), "rendered document");
            out
        })
}

/// [`render`] for anything `Serialize`.
pub fn render_serialized<'a, T>(items: impl IntoIterator<Item = &'a T>, options: &RenderOptions) -> Result<Vec<u8>>
where
    T: Serialize + 'a,
{
    to_items(items).and_then(|items| render(items, options))
}

/// Renders the page's results. A wrapper without `results_field` is rendered as it is, as one
/// collection of items.
#[instrument(skip(data, options))]
pub fn render_paginated(data: Value, results_field: &str, options: &RenderOptions) -> Result<Vec<u8>> {
    let items = match data {
        Value::Object(mut page) if page.contains_key(results_field) => page
            .remove(results_field)
            .unwrap_or_default(),
        other => {
            tracing::warn!("no '{results_field}' field, rendering the whole input");
            other
        }
    };
    render(items, options)
}

/// Sink handing back whatever the csv writer pushed into it since the last take.
#[derive(Debug, Clone, Default)]
struct Echo(Rc<RefCell<Vec<u8>>>);

impl Echo {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

impl Write for Echo {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// CSV output one line at a time, byte for byte what [`render`] produces in one go.
///
/// The byte order mark, when requested, comes as its own first chunk. After an error the
/// iterator is exhausted. Dropping it early releases everything.
pub struct CsvLines<'a> {
    bom: Option<&'static [u8]>,
    terminator: &'static [u8],
    table: Table<'a>,
    writer: csv::Writer<Echo>,
    echo: Echo,
    encoding: Encoding,
    idx: usize,
    failed: bool,
}

impl CsvLines<'_> {
    /// Every line is flushed out of the writer, so a zero-width row can skip it entirely.
    fn line(&mut self, row: &[Value]) -> Result<Vec<u8>> {
        match row.is_empty() {
            true => Ok(self.terminator.to_vec()),
            false => self
                .writer
                .write_table_row(self.idx, row, self.encoding)
                .and_then(|()| self.writer.flush().map_err(self::Error::Flushing))
                .map(|()| self.echo.take()),
        }
    }
}

impl Iterator for CsvLines<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(bom) = self.bom.take() {
            return Some(Ok(bom.to_vec()));
        }
        if self.failed {
            return None;
        }
        let row = self.table.next()?;
        let line = self.line(&row);
        self.idx += 1;
        self.failed = line.is_err();
        Some(line)
    }
}

/// Streaming [`render`]. Options are checked here, before the first line is produced.
///
/// Without a header in `options` (or one carried by `items`) the input is flattened in full
/// before the first line can be known.
#[instrument(skip_all, fields(level_sep = %options.level_sep, encoding = %options.encoding))]
pub fn render_lines<'a, S>(items: S, options: &'a RenderOptions) -> Result<CsvLines<'a>>
where
    S: ItemSource,
    S::Items: 'a,
{
    options.validate()?;
    let echo = Echo::default();
    let writer = options.writer.builder()?.from_writer(echo.clone());
    Ok(CsvLines {
        bom: options.bom_bytes(),
        terminator: options.writer.terminator.as_bytes(),
        table: tabulize(items, options.header.as_ref(), options.labels.as_ref(), &options.level_sep),
        writer,
        echo,
        encoding: options.encoding,
        idx: 0,
        failed: false,
    })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::nested_csv::options::{QuoteStyle, Terminator, WriterOptions},
        serde_json::json,
    };

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).expect("utf-8 output")
    }

    fn options_lf() -> RenderOptions {
        RenderOptions::default().with_writer(WriterOptions::default().with_terminator(Terminator::Lf))
    }

    fn streamed(items: Value, options: &RenderOptions) -> anyhow::Result<Vec<u8>> {
        render_lines(items, options)?
            .collect::<Result<Vec<_>>>()
            .map(|lines| lines.concat())
            .map_err(anyhow::Error::from)
    }

    #[test]
    fn test_render_a_list_with_unicode_elements() -> anyhow::Result<()> {
        let dump = render(
            json!([{"a": 1, "b": "hello\u{2014}goodbye", "c": "http://example.com/"}]),
            &RenderOptions::default(),
        )?;
        assert_eq!(text(dump), "a,b,c\r\n1,hello—goodbye,http://example.com/\r\n");
        Ok(())
    }

    #[test]
    fn test_render_absent_cells_are_empty() -> anyhow::Result<()> {
        let dump = render(
            json!([{"a": 1, "b": 2}, {"b": 3, "c": {"x": 4, "y": 5}}]),
            &RenderOptions::default(),
        )?;
        assert_eq!(text(dump), "a,b,c.x,c.y\r\n1,2,,\r\n,3,4,5\r\n");
        Ok(())
    }

    #[test]
    fn test_render_quotes_only_when_necessary() -> anyhow::Result<()> {
        let dump = render(
            json!([{"a": "x,y", "b": "say \"hi\"", "c": "two\nlines", "d": true, "e": null}]),
            &RenderOptions::default(),
        )?;
        assert_eq!(
            text(dump),
            "a,b,c,d,e\r\n\"x,y\",\"say \"\"hi\"\"\",\"two\nlines\",true,\r\n"
        );
        Ok(())
    }

    #[test]
    fn test_render_with_writer_options() -> anyhow::Result<()> {
        let options = RenderOptions::default().with_writer(
            WriterOptions::default()
                .with_delimiter(';')
                .with_quote('\'')
                .with_quote_style(QuoteStyle::Always)
                .with_terminator(Terminator::Lf),
        );
        let dump = render(json!([{"a": 1, "b": "x"}]), &options)?;
        assert_eq!(text(dump), "'a';'b'\n'1';'x'\n");
        Ok(())
    }

    #[test]
    fn test_render_header_and_labels() -> anyhow::Result<()> {
        let options = RenderOptions::default()
            .with_header(["c.x", "a"])
            .with_labels([("c.x", "Coordinate X")]);
        let dump = render(json!([{"a": 1, "c": {"x": 2, "y": 3}}]), &options)?;
        assert_eq!(text(dump), "Coordinate X,a\r\n2,1\r\n");
        Ok(())
    }

    #[test]
    fn test_render_underscored() -> anyhow::Result<()> {
        let dump = render(json!([{"location": {"lat": 1}}]), &RenderOptions::underscored())?;
        assert_eq!(text(dump), "location_lat\r\n1\r\n");
        Ok(())
    }

    #[test]
    fn test_render_degenerate_inputs() -> anyhow::Result<()> {
        assert!(render(json!([]), &RenderOptions::default())?.is_empty());
        assert!(render(Value::Null, &RenderOptions::default())?.is_empty());
        let dump = render(json!([]), &RenderOptions::default().with_header(["a", "b"]))?;
        assert_eq!(text(dump), "a,b\r\n");
        Ok(())
    }

    #[test]
    fn test_render_zero_width_rows() -> anyhow::Result<()> {
        let items = json!([{}, []]);
        let dump = render(items.clone(), &RenderOptions::default())?;
        assert_eq!(text(dump.clone()), "\r\n\r\n\r\n");
        assert_eq!(streamed(items.clone(), &options_lf())?, b"\n\n\n");
        assert_eq!(streamed(items, &RenderOptions::default())?, dump);

        // no field was written, so reading it back finds no header at all
        assert!(matches!(
            crate::parse(dump.as_slice(), &Default::default()),
            Err(crate::ParseError::NoHeaders)
        ));
        Ok(())
    }

    #[test]
    fn test_render_single_item() -> anyhow::Result<()> {
        let dump = render(json!({"a": 1}), &RenderOptions::default())?;
        assert_eq!(text(dump), "a\r\n1\r\n");
        Ok(())
    }

    #[test]
    fn test_render_bom() -> anyhow::Result<()> {
        let options = RenderOptions::default().with_bom(true);
        let dump = render(json!([{"a": 1}]), &options)?;
        assert_eq!(dump, b"\xEF\xBB\xBFa\r\n1\r\n");
        assert_eq!(streamed(json!([{"a": 1}]), &options)?, dump);
        Ok(())
    }

    #[test]
    fn test_render_latin1() -> anyhow::Result<()> {
        let options = RenderOptions::default().with_encoding(Encoding::Latin1).with_bom(true);
        assert_eq!(render(json!([{"a": "café"}]), &options)?, b"a\r\ncaf\xe9\r\n");
        assert!(matches!(
            render(json!([{"a": "—"}]), &options),
            Err(Error::Unencodable { idx: 1, ch: '—', .. })
        ));
        Ok(())
    }

    #[test]
    fn test_streaming_matches_batch() -> anyhow::Result<()> {
        let items = json!([
            {"a": 1, "b": "x,y"},
            {"b": 3, "c": {"x": 4, "y": [5, 6]}},
            [7, {"z": "multi\nline"}],
            8
        ]);
        let options = RenderOptions::default();
        assert_eq!(streamed(items.clone(), &options)?, render(items, &options)?);
        Ok(())
    }

    #[test]
    fn test_streaming_is_line_by_line() -> anyhow::Result<()> {
        let lines = render_lines(json!([{"a": 1}, {"a": 2}]), &RenderOptions::default())?
            .map(|line| line.map(text))
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(lines, ["a\r\n", "1\r\n", "2\r\n"]);
        Ok(())
    }

    #[test]
    fn test_bad_options_fail_at_call_time() {
        let options = RenderOptions::default().with_writer(WriterOptions::default().with_delimiter('"'));
        assert!(matches!(render_lines(json!([]), &options), Err(Error::Options(_))));
        assert!(matches!(render(json!([]), &options), Err(Error::Options(_))));
    }

    #[test]
    fn test_render_paginated() -> anyhow::Result<()> {
        let page = json!({"count": 2, "next": null, "results": [{"a": 1}, {"a": 2}]});
        let dump = render_paginated(page, DEFAULT_RESULTS_FIELD, &RenderOptions::default())?;
        assert_eq!(text(dump), "a\r\n1\r\n2\r\n");

        let plain = json!([{"a": 1}]);
        let dump = render_paginated(plain, DEFAULT_RESULTS_FIELD, &RenderOptions::default())?;
        assert_eq!(text(dump), "a\r\n1\r\n");

        let wrapper = json!({"a": 1});
        let dump = render_paginated(wrapper, DEFAULT_RESULTS_FIELD, &RenderOptions::default())?;
        assert_eq!(text(dump), "a\r\n1\r\n");
        Ok(())
    }

    #[test]
    fn test_render_serialized() -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Point {
            x: i32,
            tags: Vec<&'static str>,
        }

        let dump = render_serialized(
            &[Point { x: 1, tags: vec!["a"] }, Point { x: 2, tags: vec!["b", "c"] }],
            &RenderOptions::default(),
        )?;
        assert_eq!(text(dump), "tags.0,tags.1,x\r\na,,1\r\nb,c,2\r\n");
        Ok(())
    }
}
