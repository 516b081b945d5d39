use {
    serde_json::{Map, Value},
    std::{borrow::Cow, fmt},
    tap::{Pipe, Tap},
};

/// Separator placed between the segments of a column name unless configured otherwise.
pub const DEFAULT_LEVEL_SEP: &str = ".";

/// One level deep mapping from column name to scalar.
pub type FlatRow = Map<String, Value>;

/// The three shapes an item can take.
///
/// `Null`, `Bool`, `Number` and `String` are all leaves and pass through untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Scalar(Value),
    Sequence(Vec<Value>),
    Mapping(Map<String, Value>),
}

impl From<Value> for Shape {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Shape::Sequence(items),
            Value::Object(map) => Shape::Mapping(map),
            scalar @ (Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)) => {
                Shape::Scalar(scalar)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment<'a> {
    Idx(usize),
    Field(Cow<'a, str>),
}

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Idx(idx) => write!(f, "{idx}"),
            Segment::Field(cow) => f.write_str(cow),
        }
    }
}

impl<'a> Segment<'a> {
    /// Canonical decimal indices (`0`, `7`, `12`) address sequence positions, anything else
    /// (including `007` or `+1`) is a mapping key.
    ///
    /// This is narrower than "any non-negative integer": flattening only ever writes canonical
    /// decimals, so `007` coming back as the key `"007"` keeps a mapping with such a key intact.
    pub fn parse(segment: &'a str) -> Segment<'a> {
        let canonical = !segment.is_empty()
            && segment.bytes().all(|b| b.is_ascii_digit())
            && (segment == "0" || !segment.starts_with('0'));
        canonical
            .then(|| segment.parse::<usize>().ok())
            .flatten()
            .map(Segment::Idx)
            .unwrap_or_else(|| segment.pipe(Cow::Borrowed).pipe(Segment::Field))
    }

    pub fn to_owned(&self) -> Segment<'static> {
        match self {
            Segment::Idx(idx) => Segment::Idx(*idx),
            Segment::Field(cow) => cow.to_string().pipe(Cow::<str>::Owned).pipe(Segment::Field),
        }
    }
}

/// Path from the root of an item down to one of its leaves.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FieldPath<'a>(Vec<Segment<'a>>);

impl<'a> FieldPath<'a> {
    /// Splits a column name back into segments. The empty name is the root itself.
    pub fn parse(column: &'a str, level_sep: &str) -> FieldPath<'a> {
        match column.is_empty() {
            true => FieldPath::default(),
            false => column.split(level_sep).map(Segment::parse).collect::<Vec<_>>().pipe(FieldPath),
        }
    }

    pub fn segments(&self) -> &[Segment<'a>] {
        &self.0
    }

    pub fn pop_start(mut self) -> Option<(Segment<'a>, Self)> {
        match self.0.len() {
            0 => None,
            _ => Some((self.0.remove(0), self)),
        }
    }

    pub fn to_owned(&self) -> FieldPath<'static> {
        self.0
            .iter()
            .map(Segment::to_owned)
            .collect::<Vec<_>>()
            .pipe(FieldPath)
    }

    pub fn join(&self, segment: Segment<'a>) -> Self {
        self.clone().tap_mut(|p| p.0.push(segment))
    }

    /// Builds the column name from the innermost segment outwards: a parent is prefixed to its
    /// child's name with `level_sep`, unless the child's name is empty, in which case the
    /// parent's segment alone becomes the name.
    pub fn column_name(&self, level_sep: &str) -> String {
        self.0.iter().rev().fold(String::new(), |name, segment| match name.is_empty() {
            true => segment.to_string(),
            false => format!("{segment}{level_sep}{name}"),
        })
    }
}

pub fn boxed_iter<'a, T, I>(iter: I) -> Box<dyn Iterator<Item = T> + 'a>
where
    T: 'a,
    I: Iterator<Item = T> + 'a,
{
    Box::new(iter)
}

pub mod flatten;
pub mod unflatten;
