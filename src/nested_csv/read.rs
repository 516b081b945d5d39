use {
    super::{
        options::{self, Encoding, ParseOptions},
        table::Header,
    },
    crate::flatten_value::{FlatRow, unflatten},
    serde_json::Value,
    std::{borrow::Cow, io::Read},
    tap::Pipe,
    tracing::instrument,
};

/// Every way a parse can fail. A failure anywhere aborts the whole parse.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("CSV parse error - invalid options")]
    Options(#[from] options::Error),
    #[error("CSV parse error - reading the source")]
    Reading(#[source] std::io::Error),
    #[error("CSV parse error - source is not valid {encoding}")]
    Decoding {
        encoding: Encoding,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("CSV parse error - no header line")]
    NoHeaders,
    #[error("CSV parse error - reading record #{record}")]
    ReadingRecord {
        record: usize,
        #[source]
        source: csv::Error,
    },
    #[error("CSV parse error - rebuilding record #{record}")]
    Unflattening {
        record: usize,
        #[source]
        source: unflatten::Error,
    },
}

type Result<T> = std::result::Result<T, self::Error>;

/// Flat rows that remember the column order of the table they were read from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderedRows {
    header: Option<Header>,
    rows: Vec<FlatRow>,
}

impl OrderedRows {
    /// Surrounding whitespace is trimmed from every column name.
    pub fn new(header: Option<Header>) -> Self {
        Self {
            header: header.map(|header| header.iter().map(str::trim).collect()),
            rows: Vec::new(),
        }
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn rows(&self) -> &[FlatRow] {
        &self.rows
    }

    pub fn push(&mut self, row: FlatRow) {
        self.rows.push(row)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_parts(self) -> (Option<Header>, Vec<FlatRow>) {
        (self.header, self.rows)
    }

    /// Rebuilds the nested items the rows were flattened from. Empty cells are left out.
    #[instrument(level = "debug", skip(self), fields(rows = self.rows.len()))]
    pub fn unflattened(&self, level_sep: &str) -> Result<Vec<Value>> {
        self.rows
            .iter()
            .enumerate()
            .map(|(record, row)| {
                unflatten::unflattened(row, level_sep)
                    .map_err(|source| self::Error::Unflattening { record, source })
            })
            .collect()
    }
}

impl IntoIterator for OrderedRows {
    type Item = FlatRow;
    type IntoIter = std::vec::IntoIter<FlatRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// `\r\n` and lone `\r` both become `\n`, so sources written with old Mac line endings split
/// into records the same way CRLF ones do.
fn universal_newlines(text: &str) -> Cow<'_, str> {
    match text.contains('\r') {
        true => text.replace("\r\n", "\n").replace('\r', "\n").pipe(Cow::<str>::Owned),
        false => Cow::Borrowed(text),
    }
}

/// Reads a whole CSV source into flat rows.
///
/// The first record is the header. Every later record is zipped against it by position: short
/// records simply lack the trailing columns, surplus fields are dropped. Cells stay strings.
/// Blank lines, wherever they appear, yield no record.
#[instrument(skip(source), fields(delimiter = %options.delimiter, encoding = %options.encoding))]
pub fn parse<R: Read>(mut source: R, options: &ParseOptions) -> Result<OrderedRows> {
    let delimiter = options.validate().and_then(|()| options.delimiter_byte())?;
    let raw = Vec::new().pipe(|mut raw| {
        source
            .read_to_end(&mut raw)
            .map_err(self::Error::Reading)
            .map(|_| raw)
    })?;
    let text = options
        .encoding
        .decode(&raw)
        .map_err(|source| self::Error::Decoding {
            encoding: options.encoding,
            source,
        })?
        .pipe(|text| universal_newlines(&text).into_owned());

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let mut records = reader.records();

    let names = records
        .next()
        .ok_or(self::Error::NoHeaders)?
        .map_err(|source| self::Error::ReadingRecord { record: 0, source })?
        .iter()
        .map(|name| name.trim().to_string())
        .collect::<Vec<_>>();
    tracing::debug!(?names, "read header");

    let mut rows = OrderedRows::new(Some(Header::from(names.clone())));
    records.enumerate().try_for_each(|(idx, record)| {
        record
            .map_err(|source| self::Error::ReadingRecord {
                record: idx + 1,
                source,
            })
            .map(|record| {
                names
                    .iter()
                    .cloned()
                    .zip(record.iter().map(|field| Value::String(field.to_string())))
                    .collect::<FlatRow>()
                    .pipe(|row| rows.push(row))
            })
    })?;
    tracing::debug!(rows = rows.len(), "parsed records");
    Ok(rows)
}

/// [`parse`] followed by [`OrderedRows::unflattened`].
pub fn parse_nested<R: Read>(source: R, options: &ParseOptions) -> Result<Vec<Value>> {
    parse(source, options).and_then(|rows| rows.unflattened(&options.level_sep))
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn parsed(text: &str) -> Result<OrderedRows> {
        parse(text.as_bytes(), &ParseOptions::default())
    }

    fn row(value: Value) -> FlatRow {
        value.as_object().cloned().expect("fixture is an object")
    }

    #[test]
    fn test_header_keeps_order_and_is_trimmed() -> anyhow::Result<()> {
        let rows = parsed(" z , a,m \r\n1,2,3\r\n")?;
        assert_eq!(rows.header().map(Header::names), Some(&["z", "a", "m"].map(String::from)[..]));
        assert_eq!(rows.rows(), [row(json!({"z": "1", "a": "2", "m": "3"}))]);
        Ok(())
    }

    #[test]
    fn test_short_and_long_records() -> anyhow::Result<()> {
        let rows = parsed("a,b,c\n1\n1,2,3,4\n")?;
        assert_eq!(
            rows.rows(),
            [row(json!({"a": "1"})), row(json!({"a": "1", "b": "2", "c": "3"}))]
        );
        Ok(())
    }

    #[test]
    fn test_header_only() -> anyhow::Result<()> {
        let rows = parsed("a,b\r\n")?;
        assert!(rows.is_empty());
        assert!(rows.unflattened(".")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_blank_lines_yield_no_rows() -> anyhow::Result<()> {
        let rows = parsed("a,b\r\n\r\n1,2\r\n\r\n\r\n3,4\r\n\r\n")?;
        assert_eq!(rows.rows(), [row(json!({"a": "1", "b": "2"})), row(json!({"a": "3", "b": "4"}))]);
        assert_eq!(parsed("a\r\r1\r")?.rows(), [row(json!({"a": "1"}))]);
        Ok(())
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(matches!(parsed(""), Err(Error::NoHeaders)));
    }

    #[test]
    fn test_carriage_return_only() -> anyhow::Result<()> {
        let crlf = parsed("a,b\r\n1,\"x\"\r\n3,4\r\n")?;
        let cr = parsed("a,b\r1,\"x\"\r3,4\r")?;
        assert_eq!(crlf, cr);
        assert_eq!(cr.len(), 2);
        Ok(())
    }

    #[test]
    fn test_quoted_line_breaks_are_normalized() -> anyhow::Result<()> {
        let rows = parsed("a\r\n\"one\r\ntwo\"\r\n")?;
        assert_eq!(rows.rows(), [row(json!({"a": "one\ntwo"}))]);
        Ok(())
    }

    #[test]
    fn test_custom_delimiter() -> anyhow::Result<()> {
        let rows = parse("a;b\n1;2\n".as_bytes(), &ParseOptions::default().with_delimiter(';'))?;
        assert_eq!(rows.rows(), [row(json!({"a": "1", "b": "2"}))]);
        Ok(())
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(
            parse(&b"a,b\n\xff,1\n"[..], &ParseOptions::default()),
            Err(Error::Decoding { encoding: Encoding::Utf8, .. })
        ));
    }

    #[test]
    fn test_latin1_source() -> anyhow::Result<()> {
        let rows = parse(
            &b"name\ncaf\xe9\n"[..],
            &ParseOptions::default().with_encoding(Encoding::Latin1),
        )?;
        assert_eq!(rows.rows(), [row(json!({"name": "café"}))]);
        Ok(())
    }

    #[test]
    fn test_parse_nested() -> anyhow::Result<()> {
        let items = parse_nested(
            "a,b,c.0,c.1,c.x\r\n1,,4,5,\r\n,2,,,\r\n".as_bytes(),
            &ParseOptions::default(),
        )?;
        assert_eq!(items, [json!({"a": "1", "c": ["4", "5"]}), json!({"b": "2"})]);
        Ok(())
    }

    #[test]
    fn test_parse_nested_conflict() {
        let err = parse_nested("a,a.b\r\n1,2\r\n".as_bytes(), &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unflattening { record: 0, .. }));
    }

    #[test]
    fn test_parse_nested_index_beyond_row_width() {
        for text in ["a.18446744073709551615\r\n1\r\n", "a.0,a.5\r\n1,2\r\n"] {
            let err = parse_nested(text.as_bytes(), &ParseOptions::default()).unwrap_err();
            assert!(matches!(err, Error::Unflattening { record: 0, .. }));
        }
    }

    #[test]
    fn test_bad_options_fail_up_front() {
        assert!(matches!(
            parse("a\n".as_bytes(), &ParseOptions::default().with_delimiter('→')),
            Err(Error::Options(_))
        ));
    }
}
