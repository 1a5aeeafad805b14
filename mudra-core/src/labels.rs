use anyhow::{Context, Error, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Sign name to dense class index. Indices are handed out in insertion order
/// and never change once assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "HashMap<String, u32>")]
pub struct LabelMap {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = Self::new();
        for name in names {
            map.get_or_insert(&name.into());
        }
        map
    }

    pub fn get_or_insert(&mut self, name: &str) -> u32 {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }

        let idx = self.names.len() as u32;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    pub fn name_of(&self, idx: u32) -> Option<&str> {
        self.names.get(idx as usize).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("opening label map {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing label map {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("creating label map {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

impl Serialize for LabelMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.names.len()))?;
        for (idx, name) in self.names.iter().enumerate() {
            map.serialize_entry(name, &idx)?;
        }
        map.end()
    }
}

impl TryFrom<HashMap<String, u32>> for LabelMap {
    type Error = Error;

    fn try_from(raw: HashMap<String, u32>) -> Result<Self> {
        let mut slots: Vec<Option<String>> = vec![None; raw.len()];

        for (name, idx) in raw.iter() {
            let slot = slots.get_mut(*idx as usize).ok_or_else(|| {
                Error::msg(format!(
                    "label '{name}' has index {idx}, outside 0..{}",
                    raw.len()
                ))
            })?;
            if let Some(other) = slot {
                return Err(Error::msg(format!(
                    "labels '{other}' and '{name}' share index {idx}"
                )));
            }
            *slot = Some(name.clone());
        }

        // every slot is filled: n distinct indices all below n
        let names: Vec<String> = slots.into_iter().flatten().collect();
        Ok(Self {
            index: raw,
            names,
        })
    }
}
