//! Contains the result model of a query.
//!
//! A [ResultVector](ResultVector) is a tree with one level per anchored dimension. Each edge is
//! labeled with the [Address](crate::query::Address) matched in that dimension, each leaf holds
//! the aggregated value. Results can be rendered as JSON for browsers or serialized into a
//! compact binary form for programmatic clients.
//!
//! # Binary layout
//!
//! All numbers are little endian:
//! * `u32` number of levels, followed by each level name as `u16` length and UTF-8 bytes
//! * the tree in pre-order: an inner node is a `u32` child count followed by each child as `u8`
//!   path length, the `u64` path elements and the child node itself. A leaf (a node at the depth
//!   of the level count) is its `u64` value.
use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use bytes::{Buf, BufMut};
use serde_json::{json, Map, Value};

use crate::query::Address;
use crate::schema::{FieldKind, Schema};

/// A node of the result tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultNode {
    value: u64,
    children: BTreeMap<Address, ResultNode>,
}

impl ResultNode {
    /// Returns the aggregated value of this node and everything below.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Returns the children keyed by their address.
    pub fn children(&self) -> &BTreeMap<Address, ResultNode> {
        &self.children
    }
}

/// The result of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultVector {
    levels: Vec<String>,
    root: ResultNode,
}

impl ResultVector {
    /// Creates an empty result with the given level names.
    pub fn new(levels: Vec<String>) -> ResultVector {
        ResultVector {
            levels,
            root: ResultNode::default(),
        }
    }

    /// Returns the level names.
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Returns the number of levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Returns the root node.
    pub fn root(&self) -> &ResultNode {
        &self.root
    }

    /// Adds the given value at the leaf identified by one key per level.
    ///
    /// # Panics
    /// Panics if the number of keys doesn't match the number of levels.
    pub fn add(&mut self, keys: &[Address], value: u64) {
        assert_eq!(keys.len(), self.levels.len());

        let mut node = &mut self.root;
        node.value += value;
        for key in keys {
            node = node.children.entry(key.clone()).or_default();
            node.value += value;
        }
    }

    /// Returns the value stored at the node identified by the given keys.
    ///
    /// # Example
    ///
    /// ```
    /// # use nanocube::result::ResultVector;
    /// # use nanocube::query::Address;
    /// let mut result = ResultVector::new(vec!["a".to_owned()]);
    /// result.add(&[Address::value(1)], 5);
    /// result.add(&[Address::value(1)], 2);
    /// result.add(&[Address::value(2)], 1);
    ///
    /// assert_eq!(result.value_at(&[Address::value(1)]), Some(7));
    /// assert_eq!(result.value_at(&[]), Some(8));
    /// assert_eq!(result.value_at(&[Address::value(3)]), None);
    /// ```
    pub fn value_at(&self, keys: &[Address]) -> Option<u64> {
        let mut node = &self.root;
        for key in keys {
            node = node.children.get(key)?;
        }

        Some(node.value)
    }

    /// Renders the result as JSON using the schema to attach labels to categorical values.
    ///
    /// Each level is listed as `anchor:<dimension>` in the `layers` array.
    pub fn to_json(&self, schema: &Schema) -> Value {
        let dimensions: Vec<Option<usize>> = self
            .levels
            .iter()
            .map(|level| schema.dimension_index(level))
            .collect();
        let layers: Vec<String> = self
            .levels
            .iter()
            .map(|level| format!("anchor:{}", level))
            .collect();

        json!({
            "layers": layers,
            "root": Value::Object(self.node_to_json(&self.root, 0, &dimensions, schema)),
        })
    }

    fn node_to_json(
        &self,
        node: &ResultNode,
        depth: usize,
        dimensions: &[Option<usize>],
        schema: &Schema,
    ) -> Map<String, Value> {
        let mut object = Map::new();
        if depth == self.levels.len() {
            let _ = object.insert("val".to_owned(), json!(node.value));
            return object;
        }

        let children = node
            .children
            .iter()
            .map(|(address, child)| {
                let mut child_object = Map::new();
                let _ = child_object.insert("path".to_owned(), json!(address.path()));
                if let Some(label) = dimensions[depth]
                    .filter(|dimension| {
                        matches!(
                            schema.dimensions()[*dimension].kind,
                            FieldKind::Categorical { .. }
                        )
                    })
                    .filter(|_| address.len() == 1)
                    .and_then(|dimension| schema.label(dimension, address.path()[0]))
                {
                    let _ = child_object.insert("label".to_owned(), json!(label));
                }
                child_object.extend(self.node_to_json(child, depth + 1, dimensions, schema));
                Value::Object(child_object)
            })
            .collect();

        let _ = object.insert("children".to_owned(), Value::Array(children));
        object
    }

    /// Serializes the result into its binary form.
    ///
    /// Fails if a level name, a child count or a path exceeds the width of its length field.
    pub fn serialize(&self) -> anyhow::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.put_u32_le(u32::try_from(self.levels.len()).context("Too many levels.")?);
        for level in &self.levels {
            let length = u16::try_from(level.len())
                .with_context(|| format!("The level name of {} bytes is too long.", level.len()))?;
            buffer.put_u16_le(length);
            buffer.put_slice(level.as_bytes());
        }
        self.serialize_node(&self.root, 0, &mut buffer)?;

        Ok(buffer)
    }

    fn serialize_node(
        &self,
        node: &ResultNode,
        depth: usize,
        buffer: &mut Vec<u8>,
    ) -> anyhow::Result<()> {
        if depth == self.levels.len() {
            buffer.put_u64_le(node.value);
            return Ok(());
        }

        buffer.put_u32_le(u32::try_from(node.children.len()).context("Too many children.")?);
        for (address, child) in &node.children {
            buffer.put_u8(u8::try_from(address.len()).context("The path is too long.")?);
            for step in address.path() {
                buffer.put_u64_le(*step);
            }
            self.serialize_node(child, depth + 1, buffer)?;
        }

        Ok(())
    }

    /// Reads a result from its binary form.
    pub fn deserialize(mut data: &[u8]) -> anyhow::Result<ResultVector> {
        let level_count = read_u32(&mut data)? as usize;
        let mut levels = Vec::with_capacity(level_count.min(64));
        for _ in 0..level_count {
            let length = read_u16(&mut data)? as usize;
            ensure_remaining(data, length)?;
            let name = std::str::from_utf8(&data[..length])
                .context("A level name is not valid UTF-8.")?
                .to_owned();
            data.advance(length);
            levels.push(name);
        }

        let mut result = ResultVector::new(levels);
        result.root = read_node(&mut data, 0, level_count)?;
        if data.has_remaining() {
            return Err(anyhow!(
                "Found {} trailing bytes after the result.",
                data.remaining()
            ));
        }

        Ok(result)
    }
}

fn read_node(data: &mut &[u8], depth: usize, levels: usize) -> anyhow::Result<ResultNode> {
    if depth == levels {
        return Ok(ResultNode {
            value: read_u64(data)?,
            children: BTreeMap::new(),
        });
    }

    let mut node = ResultNode::default();
    for _ in 0..read_u32(data)? {
        ensure_remaining(data, 1)?;
        let length = data.get_u8() as usize;
        let mut path = Vec::with_capacity(length);
        for _ in 0..length {
            path.push(read_u64(data)?);
        }
        let child = read_node(data, depth + 1, levels)?;
        node.value += child.value;
        let _ = node.children.insert(Address::from_path(path), child);
    }

    Ok(node)
}

fn ensure_remaining(data: &[u8], length: usize) -> anyhow::Result<()> {
    if data.len() < length {
        Err(anyhow!("Unexpected end of result data."))
    } else {
        Ok(())
    }
}

fn read_u16(data: &mut &[u8]) -> anyhow::Result<u16> {
    ensure_remaining(data, 2)?;
    Ok(data.get_u16_le())
}

fn read_u32(data: &mut &[u8]) -> anyhow::Result<u32> {
    ensure_remaining(data, 4)?;
    Ok(data.get_u32_le())
}

fn read_u64(data: &mut &[u8]) -> anyhow::Result<u64> {
    ensure_remaining(data, 8)?;
    Ok(data.get_u64_le())
}

#[cfg(test)]
mod tests {
    use crate::query::Address;
    use crate::result::ResultVector;
    use crate::schema::{DumpFileDescription, Schema};

    fn schema() -> Schema {
        Schema::new(
            DumpFileDescription::parse(
                "field: location nc_dim_quadtree_2
field: crime nc_dim_cat_1
valname: crime 0 ASSAULT
valname: crime 1 THEFT
field: time nc_dim_time_2",
            )
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn json_contains_paths_labels_and_values() {
        let mut result = ResultVector::new(vec!["crime".to_owned()]);
        result.add(&[Address::value(1)], 3);
        result.add(&[Address::value(7)], 2);

        let json = result.to_json(&schema());
        assert_eq!(json["layers"][0], "anchor:crime");
        let children = json["root"]["children"].as_array().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0]["path"][0], 1);
        assert_eq!(children[0]["label"], "THEFT");
        assert_eq!(children[0]["val"], 3);
        assert_eq!(children[1]["label"].is_null(), true);
        assert_eq!(children[1]["val"], 2);
    }

    #[test]
    fn a_result_without_levels_is_a_single_value() {
        let mut result = ResultVector::new(Vec::new());
        result.add(&[], 4);
        result.add(&[], 6);

        let json = result.to_json(&schema());
        assert_eq!(json["root"]["val"], 10);

        let data = result.serialize().unwrap();
        assert_eq!(data, vec![0, 0, 0, 0, 10, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn binary_results_can_be_read_back() {
        let mut result =
            ResultVector::new(vec!["location".to_owned(), "crime".to_owned()]);
        result.add(&[Address::quadtree(1, 2, 2).unwrap(), Address::value(0)], 5);
        result.add(&[Address::quadtree(1, 2, 2).unwrap(), Address::value(1)], 1);
        result.add(&[Address::root(), Address::value(1)], 2);

        let data = result.serialize().unwrap();
        assert_eq!(ResultVector::deserialize(&data).unwrap(), result);
        assert_eq!(ResultVector::deserialize(&data[..data.len() - 1]).is_err(), true);
    }

    #[test]
    fn binary_levels_carry_the_bare_dimension_name() {
        let mut result = ResultVector::new(vec!["crime".to_owned()]);
        result.add(&[Address::value(1)], 3);

        let data = result.serialize().unwrap();
        assert_eq!(&data[..11], b"\x01\x00\x00\x00\x05\x00crime");
        assert_eq!(result.to_json(&schema())["layers"][0], "anchor:crime");
    }

    #[test]
    fn oversized_level_names_cannot_be_serialized() {
        let mut result = ResultVector::new(vec!["x".repeat(usize::from(u16::MAX) + 1)]);
        result.add(&[Address::value(1)], 3);
        assert_eq!(result.serialize().is_err(), true);

        let mut result = ResultVector::new(vec!["x".repeat(usize::from(u16::MAX))]);
        result.add(&[Address::value(1)], 3);
        let data = result.serialize().unwrap();
        assert_eq!(ResultVector::deserialize(&data).unwrap(), result);
    }
}
