//! Typed value carrier used throughout the table and expression engines
//!
//! A single tagged union rather than a class hierarchy: the backend schema
//! fixes each column's storage type at table-creation time, and every row
//! is passed through as a `Vec<Value>` encoded with one switch (see
//! `Value::to_csv_field`).

use std::fmt;

/// The column storage tag, mapped to a backend SQL type by `ColumnType::sql_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int2,
    Int4,
    Int8,
    Flt4,
    Flt8,
    Text,
}

impl ColumnType {
    /// Maps a storage tag to the default backend SQL type name. Callers
    /// needing a backend-specific override should not use this directly.
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Int2 => "smallint",
            ColumnType::Int4 => "integer",
            ColumnType::Int8 => "bigint",
            ColumnType::Flt4 => "real",
            ColumnType::Flt8 => "double precision",
            ColumnType::Text => "text",
        }
    }
}

impl std::str::FromStr for ColumnType {
    type Err = crate::errors::ArchiverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int2" => Ok(ColumnType::Int2),
            "int4" => Ok(ColumnType::Int4),
            "int8" => Ok(ColumnType::Int8),
            "flt4" => Ok(ColumnType::Flt4),
            "flt8" => Ok(ColumnType::Flt8),
            "text" => Ok(ColumnType::Text),
            other => Err(crate::errors::ArchiverError::config(format!(
                "unknown storage type tag: {other}"
            ))),
        }
    }
}

/// A single typed column value, or the absence of one.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    /// NULL in the backing store, or a read-back of such a NULL.
    Invalid,
}

impl Value {
    /// Encodes this value into a single CSV field using the
    /// CSV-with-single-quote-quoting staging format: text is wrapped in
    /// `'...'` with embedded quotes doubled, numbers are written in plain
    /// decimal, and NULL becomes an empty field. Kept independent of any
    /// CSV crate so both backends' bulk loaders parse it identically.
    pub fn to_csv_field(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{f}"),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Invalid => String::new(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Value::Invalid)
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Invalid => write!(f, "INVALID"),
        }
    }
}

/// One physical column of a keyword table: its name and storage type.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

/// A keyword's schema field, prior to column flattening.
#[derive(Debug, Clone)]
pub enum FieldSpec {
    Simple { name: String, ty: ColumnType },
    /// A repeated value with `min..=max` occurrences.
    Repeated {
        name: String,
        ty: ColumnType,
        min: usize,
        max: usize,
    },
    /// A compound value made of named sub-fields.
    Compound {
        name: String,
        fields: Vec<(String, ColumnType)>,
    },
}

/// Implements the column-flattening rule from the data model: a simple
/// field becomes one column; a repeated field with `min==max==1` becomes
/// one unindexed column, otherwise `max(min,max)` indexed columns
/// `name_0..name_{k-1}`; a compound field becomes one column per
/// sub-field named `name_sub`.
pub fn flatten_fields(fields: &[FieldSpec]) -> Vec<ColumnSpec> {
    let mut columns = Vec::new();
    for field in fields {
        match field {
            FieldSpec::Simple { name, ty } => columns.push(ColumnSpec {
                name: name.clone(),
                ty: *ty,
            }),
            FieldSpec::Repeated { name, ty, min, max } => {
                let count = (*max).max(*min);
                if *min == 1 && *max == 1 {
                    columns.push(ColumnSpec {
                        name: name.clone(),
                        ty: *ty,
                    });
                } else {
                    for i in 0..count {
                        columns.push(ColumnSpec {
                            name: format!("{name}_{i}"),
                            ty: *ty,
                        });
                    }
                }
            }
            FieldSpec::Compound { name, fields } => {
                for (sub, ty) in fields {
                    columns.push(ColumnSpec {
                        name: format!("{name}_{sub}"),
                        ty: *ty,
                    });
                }
            }
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_field_is_one_column() {
        let cols = flatten_fields(&[FieldSpec::Simple {
            name: "alive".into(),
            ty: ColumnType::Int4,
        }]);
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].name, "alive");
    }

    #[test]
    fn singleton_repeated_field_has_no_index_suffix() {
        let cols = flatten_fields(&[FieldSpec::Repeated {
            name: "val".into(),
            ty: ColumnType::Flt8,
            min: 1,
            max: 1,
        }]);
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].name, "val");
    }

    #[test]
    fn repeated_field_expands_to_indexed_columns() {
        let cols = flatten_fields(&[FieldSpec::Repeated {
            name: "val".into(),
            ty: ColumnType::Flt8,
            min: 2,
            max: 3,
        }]);
        let names: Vec<_> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["val_0", "val_1", "val_2"]);
    }

    #[test]
    fn compound_field_expands_per_subfield() {
        let cols = flatten_fields(&[FieldSpec::Compound {
            name: "pos".into(),
            fields: vec![("ra".into(), ColumnType::Flt8), ("dec".into(), ColumnType::Flt8)],
        }]);
        let names: Vec<_> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["pos_ra", "pos_dec"]);
    }

    #[test]
    fn text_csv_field_escapes_quotes() {
        let v = Value::Text("o'clock".into());
        assert_eq!(v.to_csv_field(), "'o''clock'");
    }

    #[test]
    fn invalid_csv_field_is_empty() {
        assert_eq!(Value::Invalid.to_csv_field(), "");
    }
}
