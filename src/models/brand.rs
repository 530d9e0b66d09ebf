use std::collections::HashSet;

/// The authoritative set of recognized brand names
///
/// Names keep their load order; the first occurrence of a duplicate wins.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    brands: Vec<String>,
    index: HashSet<String>,
}

impl Catalog {
    /// Build a catalog from raw names, trimming them and dropping blanks and duplicates
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalog = Self::default();
        for name in names {
            let name: String = name.into();
            let name = name.trim_start_matches('\u{feff}').trim();
            if name.is_empty() || catalog.index.contains(name) {
                continue;
            }
            catalog.index.insert(name.to_string());
            catalog.brands.push(name.to_string());
        }
        catalog
    }

    pub fn contains(&self, brand: &str) -> bool {
        self.index.contains(brand)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.brands.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.brands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brands.is_empty()
    }
}
