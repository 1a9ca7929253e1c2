//! Device classification by class code and advertised name

use serde::{Deserialize, Serialize};

/// Semantic device category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Audio,
    Car,
    Phone,
    Speaker,
    Headphones,
    Earphones,
    Smartwatch,
    Other,
}

/// Major and minor device class bits of a Class of Device value
const DEVICE_CLASS_MASK: u32 = 0x1FFC;

const CLASS_TABLE: &[(u32, Category)] = &[
    (1032, Category::Audio),   // Audio/Video headphones
    (1048, Category::Audio),   // Audio/Video hands-free
    (1056, Category::Car),     // Audio/Video car audio
    (516, Category::Phone),    // Phone smartphone
    (1344, Category::Speaker), // Audio/Video loudspeaker
];

// Checked in order, first hit wins
const NAME_TABLE: &[(&[&str], Category)] = &[
    (&["car", "mazda", "toyota"], Category::Car),
    (&["headphone"], Category::Headphones),
    (&["buds", "airpods"], Category::Earphones),
    (&["watch"], Category::Smartwatch),
    (&["phone"], Category::Phone),
    (&["speaker"], Category::Speaker),
];

/// Classify a device
///
/// A known class code always wins over the name. Otherwise the lowercased
/// name is matched against substrings in fixed priority order. Anything
/// unmatched, including a missing name, is [`Category::Other`].
pub fn classify(class_code: u32, name: Option<&str>) -> Category {
    let device_class = class_code & DEVICE_CLASS_MASK;
    if let Some((_, category)) = CLASS_TABLE.iter().find(|(code, _)| *code == device_class) {
        return *category;
    }

    let Some(name) = name else {
        return Category::Other;
    };
    let name = name.to_lowercase();

    NAME_TABLE
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| name.contains(needle)))
        .map(|(_, category)| *category)
        .unwrap_or(Category::Other)
}
