//! Per-call configuration for rendering and parsing.
//!
//! Every struct here is plain data: build it with the `with_*` methods, or deserialize it from a
//! loosely typed settings map with [`RenderOptions::from_value`] and friends. Unknown keys are
//! rejected when the options are built, never later while output is being produced.

use {
    super::table::{Header, Labels},
    crate::flatten_value::DEFAULT_LEVEL_SEP,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::{borrow::Cow, fmt},
    tap::Pipe,
};

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed options")]
    Malformed(#[source] serde_json::Error),
    #[error("'{option}' must be a single ASCII character, found {found:?}")]
    NotAscii { option: &'static str, found: char },
    #[error("delimiter and quote must differ, both are {0:?}")]
    DelimiterIsQuote(char),
    #[error("the level separator must not be empty")]
    EmptyLevelSep,
}

type Result<T> = std::result::Result<T, self::Error>;

fn ascii(option: &'static str, found: char) -> Result<u8> {
    match found.is_ascii() {
        true => Ok(found as u8),
        false => Err(self::Error::NotAscii { option, found }),
    }
}

fn check_level_sep(level_sep: &str) -> Result<()> {
    match level_sep.is_empty() {
        true => Err(self::Error::EmptyLevelSep),
        false => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStyle {
    /// Quote only fields holding the delimiter, the quote character or a line break.
    #[default]
    Necessary,
    Always,
    NonNumeric,
    Never,
}

impl From<QuoteStyle> for csv::QuoteStyle {
    fn from(style: QuoteStyle) -> Self {
        match style {
            QuoteStyle::Necessary => csv::QuoteStyle::Necessary,
            QuoteStyle::Always => csv::QuoteStyle::Always,
            QuoteStyle::NonNumeric => csv::QuoteStyle::NonNumeric,
            QuoteStyle::Never => csv::QuoteStyle::Never,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminator {
    #[default]
    Crlf,
    Lf,
    Cr,
}

impl Terminator {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Terminator::Crlf => b"\r\n",
            Terminator::Lf => b"\n",
            Terminator::Cr => b"\r",
        }
    }
}

impl From<Terminator> for csv::Terminator {
    fn from(terminator: Terminator) -> Self {
        match terminator {
            Terminator::Crlf => csv::Terminator::CRLF,
            Terminator::Lf => csv::Terminator::Any(b'\n'),
            Terminator::Cr => csv::Terminator::Any(b'\r'),
        }
    }
}

/// How rows are encoded as CSV text. Defaults follow RFC 4180.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriterOptions {
    pub delimiter: char,
    pub quote: char,
    pub quote_style: QuoteStyle,
    pub terminator: Terminator,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            quote_style: QuoteStyle::Necessary,
            terminator: Terminator::Crlf,
        }
    }
}

impl WriterOptions {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value::<Self>(value)
            .map_err(self::Error::Malformed)
            .and_then(|options| options.validate().map(|()| options))
    }

    pub fn with_delimiter(self, delimiter: char) -> Self {
        Self { delimiter, ..self }
    }

    pub fn with_quote(self, quote: char) -> Self {
        Self { quote, ..self }
    }

    pub fn with_quote_style(self, quote_style: QuoteStyle) -> Self {
        Self { quote_style, ..self }
    }

    pub fn with_terminator(self, terminator: Terminator) -> Self {
        Self { terminator, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        ascii("delimiter", self.delimiter)?;
        ascii("quote", self.quote)?;
        match self.delimiter == self.quote {
            true => Err(self::Error::DelimiterIsQuote(self.delimiter)),
            false => Ok(()),
        }
    }

    /// A `csv` writer builder carrying these options. Headers are never written by the `csv`
    /// crate itself, the table carries its own header row.
    pub fn builder(&self) -> Result<csv::WriterBuilder> {
        self.validate()?;
        let mut builder = csv::WriterBuilder::new();
        builder
            .has_headers(false)
            .delimiter(ascii("delimiter", self.delimiter)?)
            .quote(ascii("quote", self.quote)?)
            .quote_style(self.quote_style.into())
            .terminator(self.terminator.into());
        Ok(builder)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8", alias = "UTF-8")]
    Utf8,
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1", alias = "ISO-8859-1")]
    Latin1,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf8 => f.write_str("utf-8"),
            Encoding::Latin1 => f.write_str("latin-1"),
        }
    }
}

impl Encoding {
    /// Turns raw input into text. A leading UTF-8 byte order mark is dropped.
    pub fn decode<'a>(&self, raw: &'a [u8]) -> std::result::Result<Cow<'a, str>, std::str::Utf8Error> {
        match self {
            Encoding::Utf8 => raw
                .strip_prefix(UTF8_BOM)
                .unwrap_or(raw)
                .pipe(std::str::from_utf8)
                .map(Cow::Borrowed),
            Encoding::Latin1 => raw
                .iter()
                .map(|&b| b as char)
                .collect::<String>()
                .pipe(Cow::<str>::Owned)
                .pipe(Ok),
        }
    }

    /// Turns text into output bytes, failing with the first character the encoding cannot hold.
    pub fn encode<'a>(&self, text: Cow<'a, str>) -> std::result::Result<Cow<'a, [u8]>, char> {
        match self {
            Encoding::Utf8 => match text {
                Cow::Borrowed(text) => Ok(Cow::Borrowed(text.as_bytes())),
                Cow::Owned(text) => Ok(Cow::Owned(text.into_bytes())),
            },
            Encoding::Latin1 => text
                .chars()
                .map(|ch| u8::try_from(u32::from(ch)).map_err(|_| ch))
                .collect::<std::result::Result<Vec<u8>, char>>()
                .map(Cow::Owned),
        }
    }
}

/// Everything a render call needs. Nothing here is shared between calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderOptions {
    /// Column order. When absent the columns are inferred from the data.
    pub header: Option<Header>,
    /// Display names for the header row only.
    pub labels: Option<Labels>,
    pub level_sep: String,
    #[serde(rename = "writer_options")]
    pub writer: WriterOptions,
    pub encoding: Encoding,
    /// Prefix the output with a byte order mark, honoured for UTF-8 only.
    pub bom: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            header: None,
            labels: None,
            level_sep: DEFAULT_LEVEL_SEP.to_string(),
            writer: WriterOptions::default(),
            encoding: Encoding::default(),
            bom: false,
        }
    }
}

impl RenderOptions {
    /// Joins nesting levels with `_` instead of `.`.
    pub fn underscored() -> Self {
        Self::default().with_level_sep("_")
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value::<Self>(value)
            .map_err(self::Error::Malformed)
            .and_then(|options| options.validate().map(|()| options))
    }

    pub fn with_header<S: Into<String>>(self, header: impl IntoIterator<Item = S>) -> Self {
        Self {
            header: Some(header.into_iter().collect()),
            ..self
        }
    }

    pub fn with_labels<K: Into<String>, V: Into<String>>(
        self,
        labels: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self {
            labels: Some(labels.into_iter().collect()),
            ..self
        }
    }

    pub fn with_level_sep(self, level_sep: impl Into<String>) -> Self {
        Self {
            level_sep: level_sep.into(),
            ..self
        }
    }

    pub fn with_writer(self, writer: WriterOptions) -> Self {
        Self { writer, ..self }
    }

    pub fn with_encoding(self, encoding: Encoding) -> Self {
        Self { encoding, ..self }
    }

    pub fn with_bom(self, bom: bool) -> Self {
        Self { bom, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        check_level_sep(&self.level_sep)?;
        self.writer.validate()
    }

    pub fn bom_bytes(&self) -> Option<&'static [u8]> {
        (self.bom && self.encoding == Encoding::Utf8).then_some(UTF8_BOM)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParseOptions {
    pub delimiter: char,
    pub encoding: Encoding,
    /// Only used when rebuilding nested items.
    pub level_sep: String,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            encoding: Encoding::default(),
            level_sep: DEFAULT_LEVEL_SEP.to_string(),
        }
    }
}

impl ParseOptions {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value::<Self>(value)
            .map_err(self::Error::Malformed)
            .and_then(|options| options.validate().map(|()| options))
    }

    pub fn with_delimiter(self, delimiter: char) -> Self {
        Self { delimiter, ..self }
    }

    pub fn with_encoding(self, encoding: Encoding) -> Self {
        Self { encoding, ..self }
    }

    pub fn with_level_sep(self, level_sep: impl Into<String>) -> Self {
        Self {
            level_sep: level_sep.into(),
            ..self
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_level_sep(&self.level_sep)?;
        ascii("delimiter", self.delimiter).map(drop)
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        ascii("delimiter", self.delimiter)
    }
}
