//! Class-index to label tables

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Mapping from class index to human-readable label.
///
/// Accepts either an index-keyed map (`{"0": "Rice Blast", "2": "Healthy"}`)
/// or a plain list in index order. Gaps are allowed and resolve to a
/// synthetic `Class {index}` label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLabels", into = "BTreeMap<String, String>")]
pub struct ClassLabels {
    labels: BTreeMap<usize, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLabels {
    Map(BTreeMap<LabelKey, String>),
    List(Vec<String>),
}

#[derive(Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(untagged)]
enum LabelKey {
    Index(u64),
    Text(String),
}

impl TryFrom<RawLabels> for ClassLabels {
    type Error = String;

    fn try_from(raw: RawLabels) -> Result<Self, Self::Error> {
        match raw {
            RawLabels::List(list) => Ok(list.into_iter().enumerate().collect()),
            RawLabels::Map(map) => {
                let mut labels = BTreeMap::new();
                for (key, label) in map {
                    let index = match key {
                        LabelKey::Index(i) => usize::try_from(i)
                            .map_err(|_| format!("class index {} is out of range", i))?,
                        LabelKey::Text(text) => text.trim().parse::<usize>().map_err(|_| {
                            format!("class key '{}' is not a non-negative integer", text)
                        })?,
                    };
                    labels.insert(index, label);
                }
                Ok(Self { labels })
            }
        }
    }
}

impl From<ClassLabels> for BTreeMap<String, String> {
    fn from(labels: ClassLabels) -> Self {
        labels
            .labels
            .into_iter()
            .map(|(index, label)| (index.to_string(), label))
            .collect()
    }
}

impl FromIterator<(usize, String)> for ClassLabels {
    fn from_iter<I: IntoIterator<Item = (usize, String)>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().collect(),
        }
    }
}

impl ClassLabels {
    /// Label configured for `index`, if any
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(&index).map(String::as_str)
    }

    /// Label for `index`, falling back to `Class {index}`
    pub fn label_for(&self, index: usize) -> Cow<'_, str> {
        match self.get(index) {
            Some(label) => Cow::Borrowed(label),
            None => Cow::Owned(format!("Class {}", index)),
        }
    }

    /// Indices in `[0, class_count)` with no configured label
    pub fn missing(&self, class_count: usize) -> Vec<usize> {
        (0..class_count)
            .filter(|index| !self.labels.contains_key(index))
            .collect()
    }

    /// Highest configured index
    pub fn max_index(&self) -> Option<usize> {
        self.labels.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterate `(index, label)` pairs in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.labels.iter().map(|(index, label)| (*index, label.as_str()))
    }
}
