use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub name: String,
    pub price: f64,
}

/// Name -> unit price, in menu order. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    items: IndexMap<String, f64>,
}

impl Menu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later entries with the same name replace earlier ones.
    pub fn insert(&mut self, name: impl Into<String>, price: f64) {
        self.items.insert(name.into(), price);
    }

    pub fn price(&self, name: &str) -> Option<f64> {
        self.items.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.items.iter().map(|(name, price)| (name.as_str(), *price))
    }
}

impl FromIterator<MenuEntry> for Menu {
    fn from_iter<T: IntoIterator<Item = MenuEntry>>(iter: T) -> Self {
        let mut menu = Menu::new();
        for entry in iter {
            menu.insert(entry.name, entry.price);
        }
        menu
    }
}

impl<'a> FromIterator<(&'a str, f64)> for Menu {
    fn from_iter<T: IntoIterator<Item = (&'a str, f64)>>(iter: T) -> Self {
        let mut menu = Menu::new();
        for (name, price) in iter {
            menu.insert(name, price);
        }
        menu
    }
}
