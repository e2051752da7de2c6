//! Parses the dump-file header which describes an incoming dataset.
//!
//! Every record stream starts with a small, line based header which names the dataset, lists
//! its fields along with their declared type tags and carries some optional metadata. The header
//! is terminated by an empty line, after which the raw records follow:
//!
//! ```text
//! name: crimes
//! encoding: binary
//! metadata: tbin 2013-12-01_00:00:00_3600s
//! field: location nc_dim_quadtree_25
//! field: crime nc_dim_cat_1
//! valname: crime 0 ASSAULT
//! field: time nc_dim_time_2
//! field: count nc_var_uint_4
//! ```
//!
//! The [DumpFileDescription](DumpFileDescription) is the parsed form of this header. Its
//! **Display** implementation reproduces the header line by line so that the front-end can hand
//! it through to a worker process which then parses the very same text again.
//!
//! A [Schema](Schema) is built on top of a description and contains the view the cube needs:
//! the ordered list of dimensions (categorical, quadtree and time fields) along with the
//! designated time dimension and the measure being aggregated.
//!
//! # Example
//!
//! ```
//! # use nanocube::schema::{DumpFileDescription, Schema};
//! let description = DumpFileDescription::parse("
//! name: test
//! encoding: binary
//! field: src nc_dim_quadtree_10
//! field: kind nc_dim_cat_1
//! field: time nc_dim_time_2
//! ").unwrap();
//!
//! let schema = Schema::new(description).unwrap();
//! assert_eq!(schema.dimension_count(), 3);
//! assert_eq!(schema.dimension_index("kind"), Some(1));
//! assert_eq!(schema.time_dimension(), 2);
//! ```
use std::fmt::{Display, Formatter};
use std::io::BufRead;

use anyhow::{anyhow, Context};
use linked_hash_map::LinkedHashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

const CATEGORICAL_PREFIX: &str = "nc_dim_cat_";
const QUADTREE_PREFIX: &str = "nc_dim_quadtree_";
const TIME_PREFIX: &str = "nc_dim_time_";
const MEASURE_PREFIX: &str = "nc_var_uint_";

/// Number of bytes a quadtree coordinate occupies in a record (two u32 for x and y).
pub const QUADTREE_RECORD_SIZE: usize = 8;

/// Describes the semantic kind of a field as derived from its type tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A categorical dimension stored in the given number of bytes.
    Categorical {
        /// The number of bytes per value.
        bytes: usize,
    },
    /// A spatial dimension indexed by a quadtree with the given number of levels.
    Quadtree {
        /// The depth of the quadtree.
        levels: usize,
    },
    /// The time dimension, stored as bin index in the given number of bytes.
    Time {
        /// The number of bytes per value.
        bytes: usize,
    },
    /// An unsigned measure stored in the given number of bytes.
    Measure {
        /// The number of bytes per value.
        bytes: usize,
    },
    /// A type tag we do not understand. If the tag ends with a number, this is used as record
    /// size so that such a field can at least be skipped.
    Unknown {
        /// The trailing size parameter of the tag, if present.
        bytes: Option<usize>,
    },
}

impl FieldKind {
    /// Derives the kind from the given type tag.
    ///
    /// Returns an error if the tag carries a known prefix but no numeric parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// # use nanocube::schema::FieldKind;
    /// assert_eq!(FieldKind::from_type_name("nc_dim_cat_2").unwrap(), FieldKind::Categorical { bytes: 2 });
    /// assert_eq!(FieldKind::from_type_name("nc_dim_quadtree_25").unwrap(), FieldKind::Quadtree { levels: 25 });
    /// assert_eq!(FieldKind::from_type_name("float_8").unwrap(), FieldKind::Unknown { bytes: Some(8) });
    /// assert_eq!(FieldKind::from_type_name("nc_var_uint_x").is_err(), true);
    /// ```
    pub fn from_type_name(type_name: &str) -> anyhow::Result<FieldKind> {
        let parameter = type_name
            .rfind('_')
            .map(|pos| &type_name[pos + 1..])
            .and_then(|number| number.parse::<usize>().ok());

        let known = |prefix: &str| type_name.starts_with(prefix);
        let required = || {
            parameter.ok_or_else(|| {
                anyhow!(
                    "The field type '{}' is missing its numeric parameter.",
                    type_name
                )
            })
        };

        if known(CATEGORICAL_PREFIX) {
            Ok(FieldKind::Categorical { bytes: required()? })
        } else if known(QUADTREE_PREFIX) {
            Ok(FieldKind::Quadtree {
                levels: required()?,
            })
        } else if known(TIME_PREFIX) {
            Ok(FieldKind::Time { bytes: required()? })
        } else if known(MEASURE_PREFIX) {
            Ok(FieldKind::Measure { bytes: required()? })
        } else {
            Ok(FieldKind::Unknown { bytes: parameter })
        }
    }

    /// Determines if this field is a dimension of the cube (in contrast to a measure).
    pub fn is_dimension(&self) -> bool {
        matches!(
            self,
            FieldKind::Categorical { .. } | FieldKind::Quadtree { .. } | FieldKind::Time { .. }
        )
    }

    /// Returns the number of bytes a value of this kind occupies within a binary record.
    pub fn record_size(&self) -> Option<usize> {
        match self {
            FieldKind::Categorical { bytes }
            | FieldKind::Time { bytes }
            | FieldKind::Measure { bytes } => Some(*bytes),
            FieldKind::Quadtree { .. } => Some(QUADTREE_RECORD_SIZE),
            FieldKind::Unknown { bytes } => *bytes,
        }
    }
}

/// A single field as declared in the header.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// The name of the field.
    pub name: String,
    /// The type tag exactly as declared.
    pub type_name: String,
    /// The kind derived from the type tag.
    pub kind: FieldKind,
    /// Human readable labels for categorical values (in declaration order).
    pub valnames: Vec<(u64, String)>,
}

impl Field {
    /// Returns the label of the given value, if one was declared.
    pub fn label(&self, value: u64) -> Option<&str> {
        self.valnames
            .iter()
            .find(|(candidate, _)| *candidate == value)
            .map(|(_, label)| label.as_str())
    }
}

/// The parsed form of a dump-file header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DumpFileDescription {
    /// The name of the dataset.
    pub name: String,
    /// The encoding of the records following the header.
    pub encoding: String,
    /// Additional metadata in declaration order (e.g. **tbin**).
    pub metadata: LinkedHashMap<String, String>,
    /// All declared fields in order.
    pub fields: Vec<Field>,
}

impl DumpFileDescription {
    /// Parses the given header text.
    ///
    /// Parsing stops at the first empty line (the separator between header and records) - any
    /// leading empty lines are skipped. Unknown keys are logged and ignored.
    pub fn parse(header: &str) -> anyhow::Result<DumpFileDescription> {
        let mut description = DumpFileDescription::default();
        let mut seen_content = false;

        for (line_number, line) in header.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                if seen_content {
                    break;
                }
                continue;
            }
            seen_content = true;

            let (key, value) = line
                .split_once(':')
                .map(|(key, value)| (key.trim(), value.trim()))
                .ok_or_else(|| anyhow!("Malformed header line {}: '{}'", line_number + 1, line))?;

            match key {
                "name" => description.name = value.to_owned(),
                "encoding" => description.encoding = value.to_owned(),
                "metadata" => {
                    let (meta_key, meta_value) = value.split_once(' ').unwrap_or((value, ""));
                    let _ = description
                        .metadata
                        .insert(meta_key.to_owned(), meta_value.trim().to_owned());
                }
                "field" => {
                    let mut parts = value.split_whitespace();
                    let (name, type_name) = match (parts.next(), parts.next()) {
                        (Some(name), Some(type_name)) => (name, type_name),
                        _ => {
                            return Err(anyhow!(
                                "A field needs a name and a type (line {}): '{}'",
                                line_number + 1,
                                line
                            ))
                        }
                    };
                    description.fields.push(Field {
                        name: name.to_owned(),
                        type_name: type_name.to_owned(),
                        kind: FieldKind::from_type_name(type_name)
                            .with_context(|| format!("Invalid field '{}'", name))?,
                        valnames: Vec::new(),
                    });
                }
                "valname" => description.parse_valname(value, line_number + 1)?,
                _ => log::warn!("Ignoring unknown header entry '{}' in line {}.", key, line_number + 1),
            }
        }

        Ok(description)
    }

    fn parse_valname(&mut self, value: &str, line_number: usize) -> anyhow::Result<()> {
        let mut parts = value.splitn(3, ' ');
        let (field_name, number, label) = match (parts.next(), parts.next(), parts.next()) {
            (Some(field_name), Some(number), Some(label)) => (field_name, number, label),
            _ => {
                return Err(anyhow!(
                    "A valname needs a field, a value and a label (line {}).",
                    line_number
                ))
            }
        };
        let number = number
            .parse::<u64>()
            .with_context(|| format!("Invalid valname value in line {}", line_number))?;

        match self.fields.iter_mut().find(|field| field.name == field_name) {
            Some(field) => {
                field.valnames.push((number, label.to_owned()));
                Ok(())
            }
            None => Err(anyhow!(
                "A valname refers to the undeclared field '{}' (line {}).",
                field_name,
                line_number
            )),
        }
    }

    /// Determines the index of the first time field.
    pub fn time_field_index(&self) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| matches!(field.kind, FieldKind::Time { .. }))
    }
}

impl Display for DumpFileDescription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "name: {}", self.name)?;
        writeln!(f, "encoding: {}", self.encoding)?;
        for (key, value) in self.metadata.iter() {
            if value.is_empty() {
                writeln!(f, "metadata: {}", key)?;
            } else {
                writeln!(f, "metadata: {} {}", key, value)?;
            }
        }
        for field in &self.fields {
            writeln!(f, "field: {} {}", field.name, field.type_name)?;
            for (value, label) in &field.valnames {
                writeln!(f, "valname: {} {} {}", field.name, value, label)?;
            }
        }

        Ok(())
    }
}

/// Appends the given header line and reports whether the separating empty line was reached.
///
/// Empty lines in front of the first field are skipped.
fn push_header_line(header: &mut String, line: &str) -> bool {
    if line.trim().is_empty() {
        !header.is_empty()
    } else {
        header.push_str(line);
        false
    }
}

/// Reads the header text from the given reader.
///
/// Consumes all lines up to and including the first empty line (or until the input is
/// exhausted). Everything after this separator is left in the reader so that the records
/// can be consumed from the very same reader.
pub fn read_header(reader: &mut impl BufRead) -> anyhow::Result<String> {
    let mut header = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        if BufRead::read_line(reader, &mut line)
            .context("Failed to read the dump file header")?
            == 0
            || push_header_line(&mut header, &line)
        {
            return Ok(header);
        }
    }
}

/// Reads the header text from the given async reader.
///
/// Behaves exactly like [read_header] so that the front-end forwards the very same header the
/// worker would have read.
pub async fn read_header_async<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> anyhow::Result<String> {
    let mut header = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        if AsyncBufReadExt::read_line(reader, &mut line)
            .await
            .context("Failed to read the dump file header")?
            == 0
            || push_header_line(&mut header, &line)
        {
            return Ok(header);
        }
    }
}

/// A dimension of the cube.
#[derive(Debug, Clone)]
pub struct Dimension {
    /// The name of the dimension (the field name).
    pub name: String,
    /// The index of the underlying field within the description.
    pub field_index: usize,
    /// The kind of the dimension (categorical, quadtree or time).
    pub kind: FieldKind,
}

/// The schema of a cube as derived from a [DumpFileDescription](DumpFileDescription).
///
/// Contains all dimensions in field order. The time dimension is part of this list, its
/// position is reported by [time_dimension](Schema::time_dimension).
#[derive(Debug, Clone)]
pub struct Schema {
    description: DumpFileDescription,
    dimensions: Vec<Dimension>,
    time_dimension: usize,
    measure: Option<usize>,
}

impl Schema {
    /// Builds a schema from the given description.
    ///
    /// Fails if no time dimension is present.
    pub fn new(description: DumpFileDescription) -> anyhow::Result<Schema> {
        let dimensions: Vec<Dimension> = description
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.kind.is_dimension())
            .map(|(field_index, field)| Dimension {
                name: field.name.clone(),
                field_index,
                kind: field.kind,
            })
            .collect();

        let time_dimension = dimensions
            .iter()
            .position(|dimension| matches!(dimension.kind, FieldKind::Time { .. }))
            .ok_or_else(|| anyhow!("The dataset '{}' has no time dimension.", description.name))?;

        let measure = description
            .fields
            .iter()
            .position(|field| matches!(field.kind, FieldKind::Measure { .. }));

        Ok(Schema {
            description,
            dimensions,
            time_dimension,
            measure,
        })
    }

    /// Provides access to the underlying header description.
    pub fn description(&self) -> &DumpFileDescription {
        &self.description
    }

    /// Returns all dimensions in order.
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Returns the number of dimensions (including time).
    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    /// Resolves the index of the dimension with the given name.
    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions
            .iter()
            .position(|dimension| dimension.name == name)
    }

    /// Returns the name of the dimension at the given index.
    ///
    /// # Panics
    /// Panics if the index is out of range.
    pub fn dimension_name(&self, index: usize) -> &str {
        &self.dimensions[index].name
    }

    /// Returns the index of the time dimension.
    pub fn time_dimension(&self) -> usize {
        self.time_dimension
    }

    /// Returns the field index of the measure being aggregated (if any).
    pub fn measure_field(&self) -> Option<usize> {
        self.measure
    }

    /// Returns the label declared for the given value of the given dimension.
    pub fn label(&self, dimension: usize, value: u64) -> Option<&str> {
        self.dimensions
            .get(dimension)
            .and_then(|dimension| self.description.fields[dimension.field_index].label(value))
    }
}
