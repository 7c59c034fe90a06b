//! Commentary composition.
//!
//! Both composers walk a fixed priority list and return the first match, so
//! the order of the `if` chains below is observable behavior. Random
//! flourishes live in [`Embellisher`] and only ever append to the
//! deterministic base text.

use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::classify::{Category, CategoryFlags};
use crate::constants::SHORT_ROUTE_METERS;

/// Which route-level message was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SummaryKey {
    Error,
    Water,
    Peak,
    Forest,
    Building,
    ShortHop,
    AllClear,
}

/// Which per-sample message was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleKey {
    WaterAndRiver,
    Water,
    River,
    Peak,
    Forest,
    Park,
    Highway,
    Railway,
    Building,
    Nothing,
}

impl SampleKey {
    /// Base commentary for this key.
    pub fn text(self) -> &'static str {
        match self {
            SampleKey::WaterAndRiver => "Water everywhere: a lake with a river feeding it.",
            SampleKey::Water => "There's open water right next to you.",
            SampleKey::River => "You can hear a river running nearby.",
            SampleKey::Peak => "A summit rises close to the path.",
            SampleKey::Forest => "The trail slips in among the trees.",
            SampleKey::Park => "You're passing through a park.",
            SampleKey::Highway => "Traffic noise: a road crosses your way.",
            SampleKey::Railway => "Railway tracks ahead, look both ways.",
            SampleKey::Building => "Buildings crowd in around you.",
            SampleKey::Nothing => "Nothing interesting around here.",
        }
    }

    pub fn is_interesting(self) -> bool {
        self != SampleKey::Nothing
    }
}

/// Pick the route-level message key.
///
/// Priority: error, water or river, peak, forest, building, then a
/// distance-based fallback.
pub fn summary_key(
    global_flags: &CategoryFlags,
    error_flag: bool,
    distance_meters: f64,
) -> SummaryKey {
    if error_flag {
        SummaryKey::Error
    } else if global_flags.contains(Category::Water) || global_flags.contains(Category::River) {
        SummaryKey::Water
    } else if global_flags.contains(Category::Peak) {
        SummaryKey::Peak
    } else if global_flags.contains(Category::Forest) {
        SummaryKey::Forest
    } else if global_flags.contains(Category::Building) {
        SummaryKey::Building
    } else if distance_meters < SHORT_ROUTE_METERS {
        SummaryKey::ShortHop
    } else {
        SummaryKey::AllClear
    }
}

/// Single highest-priority message for the whole route.
///
/// # Example
/// ```
/// use route_narrator::{compose_summary, CategoryFlags};
///
/// let msg = compose_summary(&CategoryFlags::empty(), false, 50.0);
/// assert!(msg.starts_with("Short hop"));
/// ```
pub fn compose_summary(
    global_flags: &CategoryFlags,
    error_flag: bool,
    distance_meters: f64,
) -> String {
    let km = distance_meters / 1000.0;
    match summary_key(global_flags, error_flag, distance_meters) {
        SummaryKey::Error => {
            "Couldn't read the terrain along this route. Try again in a moment.".to_string()
        }
        SummaryKey::Water => {
            format!("Pack a towel: {:.1} km with water along the way.", km)
        }
        SummaryKey::Peak => format!("{:.1} km with a summit in sight. Save your legs.", km),
        SummaryKey::Forest => format!("{:.1} km, much of it under the trees.", km),
        SummaryKey::Building => format!("{:.1} km of built-up ground. Mind the corners.", km),
        SummaryKey::ShortHop => format!(
            "Short hop of {:.0} m. You'll be there before the kettle boils.",
            distance_meters
        ),
        SummaryKey::AllClear => format!("{:.1} km of open ground. Nothing in your way.", km),
    }
}

/// Pick the per-sample message key.
///
/// Priority: water and river together, water, river, peak, forest, park,
/// highway, railway, building, nothing.
pub fn sample_key(flags: &CategoryFlags) -> SampleKey {
    let has = |c| flags.contains(c);
    if has(Category::Water) && has(Category::River) {
        SampleKey::WaterAndRiver
    } else if has(Category::Water) {
        SampleKey::Water
    } else if has(Category::River) {
        SampleKey::River
    } else if has(Category::Peak) {
        SampleKey::Peak
    } else if has(Category::Forest) {
        SampleKey::Forest
    } else if has(Category::Park) {
        SampleKey::Park
    } else if has(Category::Highway) {
        SampleKey::Highway
    } else if has(Category::Railway) {
        SampleKey::Railway
    } else if has(Category::Building) {
        SampleKey::Building
    } else {
        SampleKey::Nothing
    }
}

/// Message for a single sample's flags.
pub fn compose_for_sample(flags: &CategoryFlags) -> String {
    sample_key(flags).text().to_string()
}

const COMPLETION_MESSAGES: [&str; 4] = [
    "You made it. Boots off!",
    "Destination reached. That wasn't so bad.",
    "Journey complete. Time for a snack.",
    "Arrived. The map is proud of you.",
];

/// Randomized flourishes layered on top of the deterministic messages.
///
/// The random source is injected so tests can seed it.
pub struct Embellisher {
    rng: Box<dyn RngCore + Send>,
}

impl Embellisher {
    pub fn new(rng: Box<dyn RngCore + Send>) -> Self {
        Self { rng }
    }

    fn flourishes(key: SampleKey) -> &'static [&'static str] {
        match key {
            SampleKey::WaterAndRiver | SampleKey::Water | SampleKey::River => {
                &["", "Watch your step.", "Fancy a swim?"]
            }
            SampleKey::Peak => &["", "The view must be something."],
            SampleKey::Forest | SampleKey::Park => {
                &["", "Smells like pine.", "Birdsong everywhere."]
            }
            SampleKey::Highway | SampleKey::Railway => &["", "Stay alert."],
            SampleKey::Building => &["", "Someone's cooking dinner."],
            SampleKey::Nothing => &[""],
        }
    }

    /// Base sample message, possibly followed by a flourish.
    pub fn sample_message(&mut self, key: SampleKey) -> String {
        let base = key.text();
        match Self::flourishes(key).choose(&mut self.rng) {
            Some(extra) if !extra.is_empty() => format!("{} {}", base, extra),
            _ => base.to_string(),
        }
    }

    /// One of the completion messages.
    pub fn completion_message(&mut self) -> String {
        COMPLETION_MESSAGES
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(COMPLETION_MESSAGES[0])
            .to_string()
    }
}

impl std::fmt::Debug for Embellisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embellisher").finish_non_exhaustive()
    }
}

/// True if `message` is one of the completion messages.
pub fn is_completion_message(message: &str) -> bool {
    COMPLETION_MESSAGES.contains(&message)
}
