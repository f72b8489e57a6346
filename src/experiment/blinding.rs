//! Condition blinding. A small JSON file maps two opaque labels (e.g. "A",
//! "B") to the true conditions; the session shuffles the labels once into a
//! fixed two-interview order so the operator never learns which condition
//! runs first.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Positive,
    Negative,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Positive => write!(f, "Positive"),
            Condition::Negative => write!(f, "Negative"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Blinding {
    conditions: BTreeMap<String, Condition>,
    /// Blind labels in interview order: the first interview uses
    /// `order[0]`, the second `order[1]`.
    pub order: [String; 2],
}

impl Blinding {
    /// Reads the assignment file and shuffles a fresh condition order.
    /// The file must exist before a session starts; running unblinded by
    /// accident is worse than not running, hence the hard assertion.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        assert!(
            path.is_file(),
            "blinding file {} must be present for proper blinding",
            path.display()
        );
        let raw = fs::read_to_string(path).expect("blinding file became unreadable");
        let conditions = parse_assignment(&raw);

        let mut labels: Vec<String> = conditions.keys().cloned().collect();
        assert!(
            labels.len() == 2,
            "blinding file must map exactly two labels, found {}",
            labels.len()
        );
        labels.shuffle(&mut rand::thread_rng());
        let order = [labels[0].clone(), labels[1].clone()];

        Blinding { conditions, order }
    }

    /// Rebuilds a blinding with the order recovered from a saved session,
    /// keeping the label-condition assignment from the file.
    pub fn with_order<P: AsRef<Path>>(path: P, order: [String; 2]) -> Self {
        let mut blinding = Self::load(path);
        assert!(
            blinding.conditions.contains_key(&order[0])
                && blinding.conditions.contains_key(&order[1]),
            "saved condition order does not match the blinding file"
        );
        blinding.order = order;
        blinding
    }

    pub fn condition_for_interview(&self, interview: usize) -> Condition {
        self.conditions[&self.order[interview]]
    }

    /// Conditions in interview order.
    pub fn ordered_conditions(&self) -> [Condition; 2] {
        [
            self.condition_for_interview(0),
            self.condition_for_interview(1),
        ]
    }
}

/// The assignment is a JSON object; legacy files hold that object
/// double-encoded as a JSON string, so both forms are accepted.
fn parse_assignment(raw: &str) -> BTreeMap<String, Condition> {
    if let Ok(map) = serde_json::from_str::<BTreeMap<String, Condition>>(raw) {
        return map;
    }
    let inner: String = serde_json::from_str(raw).expect("blinding file is not valid JSON");
    serde_json::from_str(&inner).expect("blinding file is not a label-condition object")
}
