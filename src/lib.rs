pub mod flatten_value;
pub mod nested_csv;

pub use {
    flatten_value::{DEFAULT_LEVEL_SEP, FlatRow, flatten::flattened, unflatten::unflattened},
    nested_csv::{
        options::{Encoding, ParseOptions, QuoteStyle, RenderOptions, Terminator, WriterOptions},
        read::{Error as ParseError, OrderedRows, parse, parse_nested},
        table::{Header, ItemSource, Labels, Lazy, Table, tabulize},
        write::{
            CsvLines, DEFAULT_RESULTS_FIELD, Error as RenderError, render, render_lines,
            render_paginated, render_serialized, to_items,
        },
    },
};
