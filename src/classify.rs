//! Feature classification from OSM-style tags.
//!
//! Each category is an independent tag predicate. A feature carries every
//! category whose predicate matches, so malformed data tagged both
//! `highway` and `building` is reported as both.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic terrain/infrastructure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Water,
    River,
    Forest,
    Park,
    Highway,
    Railway,
    Building,
    Peak,
}

impl Category {
    /// All categories in declaration order.
    pub const ALL: [Category; 8] = [
        Category::Water,
        Category::River,
        Category::Forest,
        Category::Park,
        Category::Highway,
        Category::Railway,
        Category::Building,
        Category::Peak,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Lowercase name, used in logs and serialized snapshots.
    pub fn name(self) -> &'static str {
        match self {
            Category::Water => "water",
            Category::River => "river",
            Category::Forest => "forest",
            Category::Park => "park",
            Category::Highway => "highway",
            Category::Railway => "railway",
            Category::Building => "building",
            Category::Peak => "peak",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of categories, one bit per [`Category`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryFlags(u8);

impl CategoryFlags {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(&self, category: Category) -> bool {
        self.0 & category.bit() != 0
    }

    pub fn insert(&mut self, category: Category) {
        self.0 |= category.bit();
    }

    /// Add every category of `other`.
    pub fn merge(&mut self, other: CategoryFlags) {
        self.0 |= other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Categories present, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        Category::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Category> for CategoryFlags {
    fn from_iter<I: IntoIterator<Item = Category>>(iter: I) -> Self {
        let mut flags = CategoryFlags::empty();
        for category in iter {
            flags.insert(category);
        }
        flags
    }
}

/// Values OSM uses for a true boolean tag.
fn is_truthy(value: &str) -> bool {
    matches!(value, "yes" | "true" | "1")
}

/// Map a feature's tags to its categories.
///
/// # Example
/// ```
/// use std::collections::BTreeMap;
/// use route_narrator::{classify, Category};
///
/// let tags = BTreeMap::from([("waterway".to_string(), "river".to_string())]);
/// let flags = classify(&tags);
/// assert!(flags.contains(Category::River));
/// assert!(!flags.contains(Category::Water));
/// ```
pub fn classify(tags: &BTreeMap<String, String>) -> CategoryFlags {
    let tag = |key: &str| tags.get(key).map(String::as_str);
    let mut flags = CategoryFlags::empty();

    if tag("natural") == Some("water") || tag("water").is_some_and(is_truthy) {
        flags.insert(Category::Water);
    }
    if tag("waterway").is_some() {
        flags.insert(Category::River);
    }
    if tag("landuse") == Some("forest") {
        flags.insert(Category::Forest);
    }
    if tag("leisure") == Some("park") {
        flags.insert(Category::Park);
    }
    if tag("highway").is_some() {
        flags.insert(Category::Highway);
    }
    if tag("railway").is_some() {
        flags.insert(Category::Railway);
    }
    if tag("building").is_some() {
        flags.insert(Category::Building);
    }
    if tag("natural") == Some("peak") {
        flags.insert(Category::Peak);
    }

    flags
}
