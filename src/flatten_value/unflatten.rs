use {
    super::{FieldPath, FlatRow, Segment},
    serde_json::{Map, Value},
    tap::Pipe,
    tracing::instrument,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("column '{column}' does not fit the structure built so far: {reason}")]
    ShapeConflict { column: String, reason: &'static str },
}

type Result<T> = std::result::Result<T, self::Error>;

struct ValueBuilder<'a>(&'a mut Value);

struct ObjectBuilder<'a>(&'a mut Map<String, Value>);

impl ObjectBuilder<'_> {
    fn get_or_create(&mut self, key: &str) -> &mut Value {
        self.0.entry(key).or_insert(Value::Null)
    }
}

struct ArrayBuilder<'a>(&'a mut Vec<Value>);

impl ArrayBuilder<'_> {
    /// Positions before `index` that were never addressed are left as `null`.
    fn get_or_create(&mut self, index: usize) -> std::result::Result<&mut Value, &'static str> {
        let len = index.checked_add(1).ok_or("sequence index is out of range")?;
        if len > self.0.len() {
            self.0.resize(len, Value::Null);
        }
        Ok(&mut self.0[index])
    }
}

impl ValueBuilder<'_> {
    fn make_array(&mut self) -> std::result::Result<ArrayBuilder<'_>, &'static str> {
        if self.0.is_null() {
            *self.0 = Value::Array(Default::default());
        }
        match &mut *self.0 {
            Value::Array(values) => Ok(ArrayBuilder(values)),
            Value::Bool(_) => Err("found bool, expected array or null"),
            Value::Number(_) => Err("found number, expected array or null"),
            Value::String(_) => Err("found string, expected array or null"),
            Value::Object(_) => Err("found object, expected array or null"),
            Value::Null => unreachable!("replaced above"),
        }
    }

    fn make_object(&mut self) -> std::result::Result<ObjectBuilder<'_>, &'static str> {
        if self.0.is_null() {
            *self.0 = Value::Object(Default::default());
        }
        match &mut *self.0 {
            Value::Object(map) => Ok(ObjectBuilder(map)),
            Value::Bool(_) => Err("found bool, expected object or null"),
            Value::Number(_) => Err("found number, expected object or null"),
            Value::String(_) => Err("found string, expected object or null"),
            Value::Array(_) => Err("found array, expected object or null"),
            Value::Null => unreachable!("replaced above"),
        }
    }

    fn apply(&mut self, path: FieldPath<'_>, value: Value) -> std::result::Result<(), &'static str> {
        match path.pop_start() {
            Some((current, rest)) => match current {
                Segment::Idx(idx) => self.make_array().and_then(|mut arr| {
                    arr.get_or_create(idx)
                        .and_then(|slot| ValueBuilder(slot).apply(rest, value))
                }),
                Segment::Field(key) => self
                    .make_object()
                    .and_then(|mut obj| ValueBuilder(obj.get_or_create(key.as_ref())).apply(rest, value)),
            },
            None => match self.0.is_null() {
                true => {
                    *self.0 = value;
                    Ok(())
                }
                false => Err("a value is already present at this path"),
            },
        }
    }
}

/// `null` and `""` cells are absent in the nested direction: they never create a key or an
/// element.
fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// A flattened row has at least one column per sequence slot, so no real index reaches
/// `columns`. Anything larger would only allocate a run of `null`s.
fn check_indices(path: &FieldPath<'_>, columns: usize) -> std::result::Result<(), &'static str> {
    match path
        .segments()
        .iter()
        .any(|segment| matches!(segment, Segment::Idx(idx) if *idx >= columns))
    {
        true => Err("sequence index exceeds the number of columns"),
        false => Ok(()),
    }
}

/// Rebuilds one nested item from a flat row, inverting [`super::flatten::flattened`].
///
/// Canonical decimal segments become sequence positions, any other segment a mapping key.
/// A row without a single present cell comes back as an empty mapping.
#[instrument(level = "trace", skip(row), fields(columns = row.len()))]
pub fn unflattened(row: &FlatRow, level_sep: &str) -> Result<Value> {
    let mut out = Value::Null;
    row.iter()
        .filter(|(_, value)| !is_absent(value))
        .try_for_each(|(column, value)| {
            let path = FieldPath::parse(column, level_sep);
            check_indices(&path, row.len())
                .and_then(|()| ValueBuilder(&mut out).apply(path, value.clone()))
                .map_err(|reason| self::Error::ShapeConflict {
                    column: column.clone(),
                    reason,
                })
        })
        .map(|()| match out {
            Value::Null => Value::Object(Default::default()),
            out => out,
        })
        .pipe(|out| {
            tracing::trace!(?out, "unflattened row");
            out
        })
}
