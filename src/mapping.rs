use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FractureError, Result};
use crate::registry::ModelRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyPart {
    Elbow,
    Hand,
    Shoulder,
    Wrist,
    Ankle,
}

impl BodyPart {
    pub fn as_str(self) -> &'static str {
        match self {
            BodyPart::Elbow => "Elbow",
            BodyPart::Hand => "Hand",
            BodyPart::Shoulder => "Shoulder",
            BodyPart::Wrist => "Wrist",
            BodyPart::Ankle => "Ankle",
        }
    }

    /// Fracture classifier trained on the closest anatomy.
    pub fn fracture_model(self) -> ModelRole {
        match self {
            BodyPart::Hand | BodyPart::Wrist => ModelRole::Hand,
            // the elbow model generalises best to long bones
            BodyPart::Elbow | BodyPart::Ankle => ModelRole::Elbow,
            BodyPart::Shoulder => ModelRole::Shoulder,
        }
    }

    pub fn anatomical_location(self) -> &'static str {
        match self {
            BodyPart::Elbow => "Humerus / Olecranon",
            BodyPart::Hand => "Metacarpals / Phalanx",
            BodyPart::Shoulder => "Clavicle / Humerus Head",
            BodyPart::Wrist => "Distal Radius / Ulna",
            BodyPart::Ankle => "Tibia / Fibula",
        }
    }
}

impl fmt::Display for BodyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BodyPart {
    type Err = FractureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "elbow" => Ok(BodyPart::Elbow),
            "hand" => Ok(BodyPart::Hand),
            "shoulder" => Ok(BodyPart::Shoulder),
            "wrist" => Ok(BodyPart::Wrist),
            "ankle" => Ok(BodyPart::Ankle),
            other => Err(FractureError::InvalidInput(format!("unknown body part {other:?}"))),
        }
    }
}

/// A comparable case from the public training datasets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCase {
    pub id: String,
    pub description: String,
    pub source: String,
}

struct ReferencePair {
    fractured: (&'static str, &'static str, &'static str),
    normal: (&'static str, &'static str, &'static str),
}

const HAND_REFS: ReferencePair = ReferencePair {
    fractured: ("KAG_H_01", "Metacarpal fracture with displacement", "Kaggle Dataset #77"),
    normal: ("KAG_H_02", "Normal hand anatomy", "Kaggle Dataset #12"),
};
const WRIST_REFS: ReferencePair = ReferencePair {
    fractured: ("KAG_W_01", "Distal radius fracture pattern", "Kaggle Dataset #104"),
    normal: ("KAG_W_02", "Normal wrist structure", "Kaggle Dataset #8"),
};
const SHOULDER_REFS: ReferencePair = ReferencePair {
    fractured: ("KAG_S_01", "Clavicle fracture alignment", "Kaggle Dataset #211"),
    normal: ("KAG_S_02", "Normal shoulder girdle", "Kaggle Dataset #45"),
};
const ELBOW_REFS: ReferencePair = ReferencePair {
    fractured: ("KAG_E_01", "Olecranon fracture pattern", "Kaggle Dataset #92"),
    normal: ("KAG_E_02", "Normal elbow joint", "Kaggle Dataset #19"),
};

pub fn reference_case(part: BodyPart, fracture_detected: bool) -> ReferenceCase {
    let refs = match part {
        BodyPart::Hand => &HAND_REFS,
        BodyPart::Shoulder => &SHOULDER_REFS,
        BodyPart::Elbow => &ELBOW_REFS,
        BodyPart::Wrist | BodyPart::Ankle => &WRIST_REFS,
    };
    let (id, description, source) = if fracture_detected { refs.fractured } else { refs.normal };
    ReferenceCase {
        id: id.into(),
        description: description.into(),
        source: source.into(),
    }
}

/// Reads part classifier labels, one per line, in output index order.
pub fn load_class_mapping(file_path: &Path) -> Result<Vec<BodyPart>> {
    let file = File::open(file_path)?;
    let reader = BufReader::new(file);

    let mut classes = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let name = line.trim();
        if name.is_empty() {
            continue;
        }
        classes.push(name.parse()?);
    }
    if classes.is_empty() {
        return Err(FractureError::InvalidInput(format!(
            "no class labels in {}",
            file_path.display()
        )));
    }
    Ok(classes)
}
