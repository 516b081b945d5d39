use {
    super::read::OrderedRows,
    crate::flatten_value::{FlatRow, boxed_iter, flatten::flattened_items},
    indexmap::IndexMap,
    itertools::Itertools,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::collections::BTreeSet,
    tap::Pipe,
    tracing::instrument,
};

/// Ordered, duplicate free column names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Header(Vec<String>);

impl From<Vec<String>> for Header {
    /// Later duplicates are dropped, the first occurrence keeps its position.
    fn from(names: Vec<String>) -> Self {
        names.into_iter().unique().collect::<Vec<_>>().pipe(Header)
    }
}

impl From<Header> for Vec<String> {
    fn from(header: Header) -> Self {
        header.0
    }
}

impl<S: Into<String>> FromIterator<S> for Header {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        iter.into_iter().map(Into::into).collect::<Vec<_>>().pipe(Header::from)
    }
}

impl Header {
    /// Sorted union of every key found in `rows`.
    pub fn inferred<'a>(rows: impl IntoIterator<Item = &'a FlatRow>) -> Self {
        rows.into_iter()
            .flat_map(|row| row.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>()
            .pipe(Header)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The row shown on top of the table. Labels rename, they never reorder or filter.
    pub fn labelled(&self, labels: Option<&Labels>) -> Vec<Value> {
        self.iter()
            .map(|name| labels.map_or(name, |labels| labels.label(name)))
            .map(|name| Value::String(name.to_string()))
            .collect()
    }
}

/// Display names for the header row, keyed by column name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(IndexMap<String, String>);

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<IndexMap<_, _>>()
            .pipe(Labels)
    }
}

impl Labels {
    pub fn label<'a>(&'a self, name: &'a str) -> &'a str {
        self.0.get(name).map(String::as_str).unwrap_or(name)
    }
}

/// Anything that can be fed to the tabulizer: a collection of items, optionally carrying the
/// column order it was originally read with.
pub trait ItemSource {
    type Items: Iterator<Item = Value>;

    fn into_items(self) -> (Option<Header>, Self::Items);
}

impl ItemSource for Vec<Value> {
    type Items = std::vec::IntoIter<Value>;

    fn into_items(self) -> (Option<Header>, Self::Items) {
        (None, self.into_iter())
    }
}

/// A sequence is the collection itself, `null` is an empty collection, anything else is a
/// collection of one.
impl ItemSource for Value {
    type Items = std::vec::IntoIter<Value>;

    fn into_items(self) -> (Option<Header>, Self::Items) {
        match self {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            single => vec![single],
        }
        .into_items()
    }
}

impl ItemSource for OrderedRows {
    type Items = std::iter::Map<std::vec::IntoIter<FlatRow>, fn(FlatRow) -> Value>;

    fn into_items(self) -> (Option<Header>, Self::Items) {
        let (header, rows) = self.into_parts();
        (header, rows.into_iter().map(Value::Object as fn(FlatRow) -> Value))
    }
}

/// Wraps any iterator of items so it can be tabulized without collecting it first.
#[derive(Debug, Clone)]
pub struct Lazy<I>(pub I);

impl<I: IntoIterator<Item = Value>> ItemSource for Lazy<I> {
    type Items = I::IntoIter;

    fn into_items(self) -> (Option<Header>, Self::Items) {
        (None, self.0.into_iter())
    }
}

/// Rectangular view over flattened rows. The first row is the (labelled) header, each following
/// row holds one cell per header column with `null` where the item had no such column.
///
/// Rows are produced on demand. The iterator is finite and cannot be restarted.
pub struct Table<'a> {
    header: Header,
    header_row: Option<Vec<Value>>,
    rows: Box<dyn Iterator<Item = FlatRow> + 'a>,
}

impl<'a> Table<'a> {
    fn new(header: Header, labels: Option<&Labels>, rows: Box<dyn Iterator<Item = FlatRow> + 'a>) -> Self {
        Self {
            header_row: Some(header.labelled(labels)),
            header,
            rows,
        }
    }

    fn empty() -> Self {
        Self {
            header: Header::default(),
            header_row: None,
            rows: boxed_iter(std::iter::empty()),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }
}

impl Iterator for Table<'_> {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(header_row) = self.header_row.take() {
            return Some(header_row);
        }
        self.rows.next().map(|mut row| {
            self.header
                .iter()
                .map(|name| row.remove(name).unwrap_or(Value::Null))
                .collect()
        })
    }
}

/// Builds the table for `items`.
///
/// Column order comes from `header`, else from the header `items` were read with, else it is
/// the sorted union of every flattened row's keys. Only that last case has to flatten the whole
/// input up front; supply a header to keep the table lazy. Empty headers count as absent.
#[instrument(level = "debug", skip_all, fields(level_sep = %level_sep))]
pub fn tabulize<'a, S>(
    items: S,
    header: Option<&Header>,
    labels: Option<&Labels>,
    level_sep: &'a str,
) -> Table<'a>
where
    S: ItemSource,
    S::Items: 'a,
{
    let (established, items) = items.into_items();
    let rows = flattened_items(items, level_sep);
    match header
        .filter(|header| !header.is_empty())
        .cloned()
        .or_else(|| established.filter(|header| !header.is_empty()))
    {
        Some(header) => Table::new(header, labels, boxed_iter(rows)),
        None => {
            let rows = rows.collect::<Vec<_>>();
            tracing::debug!(rows = rows.len(), "materialized the input to infer its header");
            match rows.is_empty() {
                true => Table::empty(),
                false => {
                    let header = Header::inferred(&rows);
                    tracing::trace!(header = ?header.names(), "inferred header");
                    Table::new(header, labels, boxed_iter(rows.into_iter()))
                }
            }
        }
    }
}
