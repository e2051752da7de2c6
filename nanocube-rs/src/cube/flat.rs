//! A column oriented cube which answers queries by scanning all records.
//!
//! Each dimension is stored as a column of raw values. Quadtree coordinates are packed into a
//! single value (x in the upper, y in the lower 32 bits) at the finest level of the tree.
//! Paths and prefixes are derived from these raw values while scanning.
use std::io::Read;

use anyhow::{anyhow, bail, Context};
use fnv::FnvHashSet;

use crate::cube::{Cube, LayerReport, Report, Summary};
use crate::query::{Address, QueryDescription, QueryError, Target, MAX_QUADTREE_LEVEL};
use crate::result::ResultVector;
use crate::schema::{Dimension, FieldKind, Schema};

/// Determines where a field of a record ends up.
#[derive(Debug, Copy, Clone)]
enum Slot {
    Dimension(usize, FieldKind),
    Measure,
    Skip,
}

/// A flat, column oriented implementation of [Cube](Cube).
pub struct FlatCube {
    schema: Schema,
    layout: Vec<(usize, Slot)>,
    record_size: usize,
    columns: Vec<Vec<u64>>,
    measures: Vec<u64>,
    buffer: Vec<u8>,
}

impl FlatCube {
    /// Creates an empty cube for the given schema.
    ///
    /// Fails if the records aren't binary encoded or if the size of a field cannot be
    /// determined.
    pub fn new(schema: Schema) -> anyhow::Result<FlatCube> {
        let description = schema.description();
        if !description.encoding.is_empty() && description.encoding != "binary" {
            bail!(
                "Records encoded as '{}' are not supported. Use 'binary'.",
                description.encoding
            );
        }

        let mut layout = Vec::with_capacity(description.fields.len());
        let mut dimension = 0;
        for (index, field) in description.fields.iter().enumerate() {
            let size = field.kind.record_size().ok_or_else(|| {
                anyhow!(
                    "Cannot determine the size of field {} ({}).",
                    field.name,
                    field.type_name
                )
            })?;

            let slot = match field.kind {
                FieldKind::Quadtree { levels } if levels > MAX_QUADTREE_LEVEL => bail!(
                    "The quadtree {} has {} levels but at most {} are supported.",
                    field.name,
                    levels,
                    MAX_QUADTREE_LEVEL
                ),
                FieldKind::Categorical { bytes }
                | FieldKind::Time { bytes }
                | FieldKind::Measure { bytes }
                    if bytes == 0 || bytes > 8 =>
                {
                    bail!(
                        "The field {} uses {} bytes but only 1 to 8 are supported.",
                        field.name,
                        bytes
                    )
                }
                kind if kind.is_dimension() => {
                    dimension += 1;
                    Slot::Dimension(dimension - 1, kind)
                }
                FieldKind::Measure { .. } if schema.measure_field() == Some(index) => {
                    Slot::Measure
                }
                _ => Slot::Skip,
            };

            layout.push((size, slot));
        }

        let record_size = layout.iter().map(|(size, _)| size).sum();
        Ok(FlatCube {
            columns: vec![Vec::new(); schema.dimension_count()],
            schema,
            layout,
            record_size,
            measures: Vec::new(),
            buffer: vec![0; record_size],
        })
    }

    /// Returns the number of bytes per binary record.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    fn read_record(&mut self, reader: &mut dyn Read) -> anyhow::Result<usize> {
        let mut filled = 0;
        while filled < self.record_size {
            match reader.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(bytes) => filled += bytes,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error).context("Failed to read a record."),
            }
        }

        Ok(filled)
    }

    fn decode_record(&self) -> anyhow::Result<(Vec<u64>, u64)> {
        let mut values = vec![0; self.columns.len()];
        let mut measure = 1;
        let mut offset = 0;

        for (size, slot) in &self.layout {
            let data = &self.buffer[offset..offset + size];
            offset += size;

            match slot {
                Slot::Dimension(index, FieldKind::Quadtree { levels }) => {
                    let x = little_endian(&data[0..4]);
                    let y = little_endian(&data[4..8]);
                    if x >> levels != 0 || y >> levels != 0 {
                        bail!(
                            "The coordinate ({}, {}) is outside of the quadtree {}.",
                            x,
                            y,
                            self.schema.dimension_name(*index)
                        );
                    }
                    values[*index] = (x << 32) | y;
                }
                Slot::Dimension(index, _) => values[*index] = little_endian(data),
                Slot::Measure => measure = little_endian(data),
                Slot::Skip => (),
            }
        }

        Ok((values, measure))
    }

    fn scan(
        &self,
        description: &QueryDescription,
        result: &mut ResultVector,
    ) -> Result<(), QueryError> {
        let dimensions = self.schema.dimensions();
        if description.anchors().len() != dimensions.len() {
            return Err(QueryError::Unexpected(format!(
                "The query addresses {} dimensions but the cube has {}.",
                description.anchors().len(),
                dimensions.len()
            )));
        }
        if description.anchored_count() != result.level_count() {
            return Err(QueryError::Unexpected(format!(
                "The result provides {} levels but the query anchors {} dimensions.",
                result.level_count(),
                description.anchored_count()
            )));
        }
        for (dimension, target) in dimensions.iter().zip(description.targets()) {
            validate(dimension, target)?;
        }

        let mut keys = Vec::with_capacity(result.level_count());
        for record in 0..self.measures.len() {
            keys.clear();
            let matched = dimensions.iter().enumerate().all(|(index, dimension)| {
                match resolve(
                    dimension.kind,
                    self.columns[index][record],
                    description.target(index),
                    description.is_anchored(index),
                ) {
                    Some(key) => {
                        if description.is_anchored(index) {
                            keys.push(key);
                        }
                        true
                    }
                    None => false,
                }
            });

            if matched {
                result.add(&keys, self.measures[record]);
            }
        }

        Ok(())
    }
}

impl Cube for FlatCube {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn add(&mut self, reader: &mut dyn Read) -> anyhow::Result<bool> {
        let filled = self.read_record(reader)?;
        if filled == 0 {
            return Ok(false);
        }
        if filled < self.record_size {
            bail!(
                "Found a truncated record of {} bytes (expected {} bytes).",
                filled,
                self.record_size
            );
        }

        let (values, measure) = self.decode_record()?;
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push(value);
        }
        self.measures.push(measure);

        Ok(true)
    }

    fn len(&self) -> usize {
        self.measures.len()
    }

    fn query(
        &self,
        description: &QueryDescription,
        result: &mut ResultVector,
    ) -> Result<(), QueryError> {
        self.scan(description, result)
    }

    fn time_query(
        &self,
        description: &QueryDescription,
        result: &mut ResultVector,
    ) -> Result<(), QueryError> {
        self.scan(description, result)
    }

    fn report(&self) -> Report {
        let mut layers: Vec<LayerReport> = self
            .schema
            .dimensions()
            .iter()
            .zip(&self.columns)
            .map(|(dimension, column)| layer_report(dimension, column))
            .collect();

        let measure_name = self
            .schema
            .measure_field()
            .map(|index| self.schema.description().fields[index].name.clone())
            .unwrap_or_else(|| "count".to_owned());
        layers.push(LayerReport {
            name: measure_name,
            kind: "measure".to_owned(),
            nodes: self.len(),
            leaves: self.len(),
        });

        let allocated_memory = self
            .columns
            .iter()
            .map(|column| column.capacity())
            .sum::<usize>()
            .saturating_add(self.measures.capacity())
            .saturating_mul(std::mem::size_of::<u64>());

        Report {
            records: self.len(),
            allocated_memory,
            layers,
        }
    }

    fn summary(&self) -> Summary {
        let time_column = &self.columns[self.schema.time_dimension()];
        let time_range = time_column
            .iter()
            .min()
            .copied()
            .zip(time_column.iter().max().copied());

        Summary {
            records: self.len(),
            total: self.measures.iter().sum(),
            time_range,
            distinct_values: self
                .schema
                .dimensions()
                .iter()
                .zip(&self.columns)
                .map(|(dimension, column)| {
                    (
                        dimension.name.clone(),
                        column.iter().collect::<FnvHashSet<_>>().len(),
                    )
                })
                .collect(),
        }
    }
}

fn little_endian(data: &[u8]) -> u64 {
    data.iter()
        .rev()
        .fold(0, |value, byte| (value << 8) | u64::from(*byte))
}

fn unpack(raw: u64) -> (u64, u64) {
    (raw >> 32, raw & 0xFFFF_FFFF)
}

fn path_length(kind: FieldKind) -> usize {
    match kind {
        FieldKind::Quadtree { levels } => levels,
        _ => 1,
    }
}

fn prefix(kind: FieldKind, raw: u64, length: usize) -> Address {
    match kind {
        FieldKind::Quadtree { levels } => {
            let (x, y) = unpack(raw);
            Address::from_path(
                (levels - length..levels)
                    .rev()
                    .map(|bit| ((x >> bit) & 1) | (((y >> bit) & 1) << 1))
                    .collect(),
            )
        }
        _ if length == 0 => Address::root(),
        _ => Address::value(raw),
    }
}

fn contains(kind: FieldKind, raw: u64, address: &Address) -> bool {
    if address.is_empty() {
        return true;
    }

    match kind {
        FieldKind::Quadtree { levels } => {
            let (x, y) = unpack(raw);
            let shift = levels - address.len();
            (x >> shift, y >> shift) == address.tile()
        }
        _ => address.path() == [raw],
    }
}

fn in_range(kind: FieldKind, raw: u64, low: &Address, high: &Address) -> bool {
    match kind {
        FieldKind::Quadtree { levels } => {
            let (x, y) = unpack(raw);
            let shift = levels - low.len();
            let ((low_x, low_y), (high_x, high_y)) = (low.tile(), high.tile());
            let (x, y) = (x >> shift, y >> shift);
            x >= low_x.min(high_x)
                && x <= low_x.max(high_x)
                && y >= low_y.min(high_y)
                && y <= low_y.max(high_y)
        }
        _ => raw >= low.path()[0] && raw <= high.path()[0],
    }
}

/// Determines if the raw value matches the target and returns the key to aggregate under.
///
/// An anchored ROOT is keyed by the full value of the record, an unanchored one matches
/// everything under the empty path.
fn resolve(kind: FieldKind, raw: u64, target: &Target, anchored: bool) -> Option<Address> {
    match target {
        Target::Root if anchored => Some(prefix(kind, raw, path_length(kind))),
        Target::Root => Some(Address::root()),
        Target::Find(address) if contains(kind, raw, address) => Some(address.clone()),
        Target::Dive { base, depth } if contains(kind, raw, base) => {
            Some(prefix(kind, raw, base.len() + depth))
        }
        Target::Range { low, high } if in_range(kind, raw, low, high) => Some(low.clone()),
        Target::Intervals { base, width, count } if raw >= *base => {
            let bin = (raw - base) / width;
            if bin < *count {
                Some(Address::value(bin))
            } else {
                None
            }
        }
        Target::Sequence(targets) => targets
            .iter()
            .find_map(|target| resolve(kind, raw, target, anchored)),
        _ => None,
    }
}

fn validate_address(dimension: &Dimension, address: &Address) -> Result<(), QueryError> {
    match dimension.kind {
        FieldKind::Quadtree { levels } => {
            if address.len() > levels {
                return Err(QueryError::Domain(format!(
                    "The address {} exceeds the {} levels of {}.",
                    address, levels, dimension.name
                )));
            }
            if address.path().iter().any(|step| *step > 3) {
                return Err(QueryError::Domain(format!(
                    "The address {} is not a valid quadtree path for {}.",
                    address, dimension.name
                )));
            }
        }
        FieldKind::Categorical { bytes } | FieldKind::Time { bytes } => {
            if address.len() > 1 {
                return Err(QueryError::Domain(format!(
                    "The address {} is too deep for {}.",
                    address, dimension.name
                )));
            }
            if let Some(value) = address.path().first() {
                if bytes < 8 && value >> (8 * bytes) != 0 {
                    return Err(QueryError::Domain(format!(
                        "The value {} exceeds the {} bytes of {}.",
                        value, bytes, dimension.name
                    )));
                }
            }
        }
        _ => (),
    }

    Ok(())
}

/// Ensures that the target can be applied to the given dimension.
fn validate(dimension: &Dimension, target: &Target) -> Result<(), QueryError> {
    let is_quadtree = matches!(dimension.kind, FieldKind::Quadtree { .. });

    match target {
        Target::Root => Ok(()),
        Target::Find(address) => validate_address(dimension, address),
        Target::Dive { base, depth } => {
            validate_address(dimension, base)?;
            if base.len().saturating_add(*depth) > path_length(dimension.kind) {
                Err(QueryError::Domain(format!(
                    "Cannot dive {} levels below {} in {}.",
                    depth, base, dimension.name
                )))
            } else {
                Ok(())
            }
        }
        Target::Range { low, high } => {
            validate_address(dimension, low)?;
            validate_address(dimension, high)?;
            if is_quadtree && low.len() != high.len() {
                Err(QueryError::Domain(format!(
                    "The range {}..{} of {} must use addresses of the same level.",
                    low, high, dimension.name
                )))
            } else if !is_quadtree && (low.len() != 1 || high.len() != 1) {
                Err(QueryError::Domain(format!(
                    "The range {}..{} of {} must use two values.",
                    low, high, dimension.name
                )))
            } else {
                Ok(())
            }
        }
        Target::Intervals { width, .. } => {
            if is_quadtree {
                Err(QueryError::Domain(format!(
                    "Interval sequences cannot be applied to the quadtree {}.",
                    dimension.name
                )))
            } else if *width == 0 {
                Err(QueryError::Domain(format!(
                    "The intervals of {} must have a positive width.",
                    dimension.name
                )))
            } else {
                Ok(())
            }
        }
        Target::Sequence(targets) => targets
            .iter()
            .try_for_each(|target| validate(dimension, target)),
    }
}

fn layer_report(dimension: &Dimension, column: &[u64]) -> LayerReport {
    match dimension.kind {
        FieldKind::Quadtree { levels } => {
            let mut nodes = FnvHashSet::default();
            let mut leaves = FnvHashSet::default();
            for raw in column {
                let (x, y) = unpack(*raw);
                for level in 1..=levels {
                    let shift = levels - level;
                    let _ = nodes.insert((level, x >> shift, y >> shift));
                }
                let _ = leaves.insert(*raw);
            }

            LayerReport {
                name: dimension.name.clone(),
                kind: format!("quadtree with {} levels", levels),
                nodes: nodes.len() + usize::from(!column.is_empty()),
                leaves: leaves.len(),
            }
        }
        kind => {
            let leaves = column.iter().collect::<FnvHashSet<_>>().len();
            LayerReport {
                name: dimension.name.clone(),
                kind: match kind {
                    FieldKind::Time { .. } => "time".to_owned(),
                    _ => "categorical".to_owned(),
                },
                nodes: leaves + usize::from(!column.is_empty()),
                leaves,
            }
        }
    }
}
