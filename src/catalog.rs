use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// A named segment of the school day. Order in the catalog defines adjacency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: String,
    pub name: String,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl Period {
    fn new(id: &str, name: &str, start: (u32, u32), end: (u32, u32)) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap_or_default(),
        }
    }

    /// `HH:MM~HH:MM`
    pub fn time_range(&self) -> String {
        format!("{}~{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// The fixed period and facility enumerations plus the static similarity table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    periods: Vec<Period>,
    facilities: Vec<String>,
    #[serde(default)]
    similar: HashMap<String, Vec<String>>,
}

const AUDITORIUM: &str = "Auditorium";
const SMART_CLASSROOM: &str = "Smart Classroom C304";
const COMPUTER_LAB_1: &str = "Computer Lab 1 (C212)";
const COMPUTER_LAB_2: &str = "Computer Lab 2 (C213)";
const FOREST_CABIN: &str = "Forest Cabin";
const IPAD_CART_3: &str = "Grade 3 iPad Cart (28)";
const IPAD_CART_4: &str = "Grade 4 iPad Cart (28)";
const IPAD_CART_5: &str = "Grade 5 iPad Cart (28)";
const IPAD_CART_6: &str = "Grade 6 iPad Cart (29)";
const HISTORY_ROOM: &str = "School History Room";

impl Default for Catalog {
    fn default() -> Self {
        let periods = vec![
            Period::new("morning", "Morning Assembly", (7, 50), (8, 30)),
            Period::new("period1", "1st Period", (8, 40), (9, 20)),
            Period::new("period2", "2nd Period", (9, 30), (10, 10)),
            Period::new("period3", "3rd Period", (10, 30), (11, 10)),
            Period::new("period4", "4th Period", (11, 20), (12, 0)),
            Period::new("lunch", "Lunch Break", (12, 0), (12, 40)),
            Period::new("period5", "5th Period", (13, 0), (13, 40)),
            Period::new("period6", "6th Period", (13, 50), (14, 30)),
            Period::new("period7", "7th Period", (14, 40), (15, 20)),
            Period::new("period8", "8th Period", (15, 30), (16, 10)),
        ];
        let facilities = [
            AUDITORIUM,
            SMART_CLASSROOM,
            COMPUTER_LAB_1,
            COMPUTER_LAB_2,
            FOREST_CABIN,
            IPAD_CART_3,
            IPAD_CART_4,
            IPAD_CART_5,
            IPAD_CART_6,
            HISTORY_ROOM,
        ]
        .iter()
        .map(|f| f.to_string())
        .collect();

        let carts = [IPAD_CART_3, IPAD_CART_4, IPAD_CART_5, IPAD_CART_6];
        let mut similar: HashMap<String, Vec<String>> = HashMap::new();
        similar.insert(AUDITORIUM.into(), vec![SMART_CLASSROOM.into()]);
        similar.insert(
            SMART_CLASSROOM.into(),
            vec![COMPUTER_LAB_1.into(), COMPUTER_LAB_2.into()],
        );
        similar.insert(
            COMPUTER_LAB_1.into(),
            vec![COMPUTER_LAB_2.into(), SMART_CLASSROOM.into()],
        );
        similar.insert(
            COMPUTER_LAB_2.into(),
            vec![COMPUTER_LAB_1.into(), SMART_CLASSROOM.into()],
        );
        for cart in carts {
            let others = carts
                .iter()
                .filter(|c| **c != cart)
                .map(|c| c.to_string())
                .collect();
            similar.insert(cart.into(), others);
        }

        Self {
            periods,
            facilities,
            similar,
        }
    }
}

impl Catalog {
    pub fn new(
        periods: Vec<Period>,
        facilities: Vec<String>,
        similar: HashMap<String, Vec<String>>,
    ) -> Result<Self, CatalogError> {
        let catalog = Self {
            periods,
            facilities,
            similar,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let catalog: Catalog = serde_json::from_str(&raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.periods.is_empty() {
            return Err(CatalogError::Invalid("no periods".into()));
        }
        if self.facilities.is_empty() {
            return Err(CatalogError::Invalid("no facilities".into()));
        }
        let mut ids = HashSet::new();
        for p in &self.periods {
            if p.id.is_empty() || p.id.contains('_') {
                return Err(CatalogError::Invalid(format!(
                    "period id {:?} must be non-empty and contain no '_'",
                    p.id
                )));
            }
            if !ids.insert(p.id.as_str()) {
                return Err(CatalogError::Invalid(format!("duplicate period {}", p.id)));
            }
            if p.start >= p.end {
                return Err(CatalogError::Invalid(format!("period {} ends before it starts", p.id)));
            }
        }
        let mut names = HashSet::new();
        for f in &self.facilities {
            if f.trim().is_empty() || !names.insert(f.as_str()) {
                return Err(CatalogError::Invalid(format!("bad or duplicate facility {f:?}")));
            }
        }
        for (facility, class) in &self.similar {
            for name in std::iter::once(facility).chain(class.iter()) {
                if !names.contains(name.as_str()) {
                    return Err(CatalogError::Invalid(format!(
                        "similarity table references unknown facility {name:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn facilities(&self) -> &[String] {
        &self.facilities
    }

    pub fn period(&self, id: &str) -> Option<&Period> {
        self.periods.iter().find(|p| p.id == id)
    }

    pub fn period_index(&self, id: &str) -> Option<usize> {
        self.periods.iter().position(|p| p.id == id)
    }

    pub fn has_facility(&self, name: &str) -> bool {
        self.facilities.iter().any(|f| f == name)
    }

    /// The configured similarity class of a facility, if any.
    pub fn similar_to(&self, facility: &str) -> Option<&[String]> {
        self.similar.get(facility).map(Vec::as_slice)
    }

    /// Period whose `[start, end]` contains `time` (both ends inclusive).
    pub fn current_period(&self, time: NaiveTime) -> Option<&Period> {
        self.periods
            .iter()
            .find(|p| p.start <= time && time <= p.end)
    }
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M").map_err(serde::de::Error::custom)
    }
}
