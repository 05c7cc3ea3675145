//! Driver Model
//!
//! A driver is an atomic matcher over a single input string. Five kinds
//! exist: exact string (with `*` reserved as the structural wildcard),
//! regular expression, date range, integer range, and named value group.
//! Value groups contain string literals plus nested non-string drivers and
//! may reference each other recursively.
//!
//! Driver identity is `(kind, canonical value string)`. Instances are
//! shared through the [`cache::DriverCache`] so that compiling the same
//! textual driver twice yields the same handle.
//!
//! ## Canonical text forms
//!
//! | Kind | Form |
//! |------|------|
//! | String | `s` |
//! | Regex | `RE:pattern` (auto-detected when the text contains `.?` or `.*`) |
//! | DateRange | `DR:<iso-start>\|<iso-end>` |
//! | IntegerRange | `IR:<min>\|<max>` (either side may be blank) |
//! | ValueGroup | `VG:<name-or-uuid>` |

pub mod cache;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// The structural wildcard literal. It never matches by equality; the tree
/// routes mismatched inputs into wildcard sub-trees via failure links.
pub const WILDCARD: &str = "*";

/// Textual prefix for value-group references
pub const GROUP_PREFIX: &str = "VG:";
/// Textual prefix for regex drivers
pub const REGEX_PREFIX: &str = "RE:";
/// Textual prefix for date-range drivers
pub const DATE_RANGE_PREFIX: &str = "DR:";
/// Textual prefix for integer-range drivers
pub const INTEGER_RANGE_PREFIX: &str = "IR:";

/// Earliest representable rule validity instant (Unix epoch)
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(0).single().unwrap_or_default()
}

/// Far-future sentinel used when a validity end is left open
pub fn distant_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Shared, reference-counted driver handle
pub type DriverHandle = Arc<Driver>;

/// Discriminant for the five driver kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    String,
    Regex,
    DateRange,
    IntegerRange,
    ValueGroup,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::String => "string",
            DriverKind::Regex => "regex",
            DriverKind::DateRange => "date_range",
            DriverKind::IntegerRange => "integer_range",
            DriverKind::ValueGroup => "value_group",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An atomic matcher at one input position.
///
/// Equality and hashing depend only on `(kind, value)`; for group drivers
/// the value is the group name, so two groups with the same name are
/// interchangeable in the cache regardless of membership.
#[derive(Debug)]
pub struct Driver {
    value: String,
    payload: DriverPayload,
}

#[derive(Debug)]
enum DriverPayload {
    /// Exact string equality; `*` is the structural wildcard
    Literal,
    Regex(Regex),
    /// Inclusive at both ends
    DateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Min is inclusive. An explicit max is inclusive; a blank max falls
    /// back to the signed 32-bit platform maximum treated as exclusive.
    IntegerRange {
        min: i64,
        max: i64,
        max_exclusive: bool,
    },
    Group(GroupData),
}

/// Mutable membership of a value-group driver. Interior mutability lets the
/// cache create a placeholder first and link members once all referenced
/// groups exist, which is what makes cyclic references resolvable.
#[derive(Debug)]
struct GroupData {
    /// Backfilled when a group referenced by name ahead of its definition
    /// turns out to carry a concrete id
    id: RwLock<Uuid>,
    literals: RwLock<HashSet<String>>,
    sub_drivers: RwLock<Vec<DriverHandle>>,
}

impl Driver {
    /// Exact-string driver
    pub fn literal(value: &str) -> Driver {
        Driver {
            value: value.to_string(),
            payload: DriverPayload::Literal,
        }
    }

    /// Regex driver; the pattern is compiled eagerly so malformed patterns
    /// fail at construction, not at evaluation
    pub fn regex(pattern: &str) -> EngineResult<Driver> {
        let compiled = Regex::new(pattern).map_err(|e| EngineError::InvalidRegex {
            pattern: pattern.to_string(),
            source: Box::new(e),
        })?;
        Ok(Driver {
            value: pattern.to_string(),
            payload: DriverPayload::Regex(compiled),
        })
    }

    /// Date-range driver from the canonical body `<iso-start>|<iso-end>`.
    /// A blank side falls back to the epoch / far-future sentinel.
    pub fn date_range(body: &str) -> EngineResult<Driver> {
        let (start_text, end_text) = body.split_once('|').ok_or_else(|| {
            EngineError::MalformedDriver {
                text: format!("{DATE_RANGE_PREFIX}{body}"),
                reason: "expected '<iso-start>|<iso-end>'".to_string(),
            }
        })?;
        let start = if start_text.is_empty() {
            epoch()
        } else {
            parse_instant(start_text)?
        };
        let end = if end_text.is_empty() {
            distant_future()
        } else {
            parse_instant(end_text)?
        };
        Ok(Driver {
            value: body.to_string(),
            payload: DriverPayload::DateRange { start, end },
        })
    }

    /// Integer-range driver from the canonical body `<min>|<max>`. Either
    /// side may be blank, denoting the signed 32-bit platform bound.
    pub fn integer_range(body: &str) -> EngineResult<Driver> {
        let (min_text, max_text) = body.split_once('|').ok_or_else(|| {
            EngineError::MalformedDriver {
                text: format!("{INTEGER_RANGE_PREFIX}{body}"),
                reason: "expected '<min>|<max>'".to_string(),
            }
        })?;
        let min = if min_text.is_empty() {
            i64::from(i32::MIN)
        } else {
            min_text
                .parse::<i64>()
                .map_err(|_| EngineError::InvalidInteger(min_text.to_string()))?
        };
        let (max, max_exclusive) = if max_text.is_empty() {
            (i64::from(i32::MAX), true)
        } else {
            let max = max_text
                .parse::<i64>()
                .map_err(|_| EngineError::InvalidInteger(max_text.to_string()))?;
            (max, false)
        };
        Ok(Driver {
            value: body.to_string(),
            payload: DriverPayload::IntegerRange {
                min,
                max,
                max_exclusive,
            },
        })
    }

    /// Empty value-group driver. Membership is linked afterwards with
    /// [`Driver::set_sub_values`].
    pub fn group(id: Uuid, name: &str) -> Driver {
        Driver {
            value: name.to_string(),
            payload: DriverPayload::Group(GroupData {
                id: RwLock::new(id),
                literals: RwLock::new(HashSet::new()),
                sub_drivers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Parse a non-group canonical text into a driver. Group references
    /// carry registry state and resolve through the cache instead.
    pub(crate) fn from_text(text: &str) -> EngineResult<Driver> {
        if let Some(body) = text.strip_prefix(REGEX_PREFIX) {
            Driver::regex(body)
        } else if let Some(body) = text.strip_prefix(DATE_RANGE_PREFIX) {
            Driver::date_range(body)
        } else if let Some(body) = text.strip_prefix(INTEGER_RANGE_PREFIX) {
            Driver::integer_range(body)
        } else if text.contains(".?") || text.contains(".*") {
            // Historical shortcut: unprefixed text with a regex marker is a regex
            Driver::regex(text)
        } else {
            Ok(Driver::literal(text))
        }
    }

    /// The canonical value portion: literal text, regex pattern, range body
    /// or group name
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> DriverKind {
        match self.payload {
            DriverPayload::Literal => DriverKind::String,
            DriverPayload::Regex(_) => DriverKind::Regex,
            DriverPayload::DateRange { .. } => DriverKind::DateRange,
            DriverPayload::IntegerRange { .. } => DriverKind::IntegerRange,
            DriverPayload::Group(_) => DriverKind::ValueGroup,
        }
    }

    /// Canonical external encoding; doubles as the cache key
    pub fn canonical_text(&self) -> String {
        match self.payload {
            DriverPayload::Literal => self.value.clone(),
            DriverPayload::Regex(_) => format!("{REGEX_PREFIX}{}", self.value),
            DriverPayload::DateRange { .. } => format!("{DATE_RANGE_PREFIX}{}", self.value),
            DriverPayload::IntegerRange { .. } => format!("{INTEGER_RANGE_PREFIX}{}", self.value),
            DriverPayload::Group(_) => format!("{GROUP_PREFIX}{}", self.value),
        }
    }

    /// Whether this is the structural wildcard slot
    pub fn is_wildcard(&self) -> bool {
        matches!(self.payload, DriverPayload::Literal) && self.value == WILDCARD
    }

    /// Group id, for value-group drivers
    pub fn group_id(&self) -> Option<Uuid> {
        match &self.payload {
            DriverPayload::Group(data) => Some(*data.id.read()),
            _ => None,
        }
    }

    /// Overwrite a placeholder group's id once its definition arrives
    pub(crate) fn set_group_id(&self, id: Uuid) {
        if let DriverPayload::Group(data) = &self.payload {
            *data.id.write() = id;
        }
    }

    /// Evaluate this driver against one input string.
    ///
    /// The wildcard literal only matches the input `*` here; structural
    /// wildcard handling belongs to the tree. A date-range driver treats
    /// the literal input `*` as a match; an integer-range driver does not.
    pub fn matches(&self, input: &str) -> bool {
        match &self.payload {
            DriverPayload::Literal => self.value == input,
            DriverPayload::Regex(re) => re.is_match(input),
            DriverPayload::DateRange { start, end } => {
                if input == WILDCARD {
                    return true;
                }
                match parse_instant(input) {
                    Ok(t) => *start <= t && t <= *end,
                    Err(_) => false,
                }
            }
            DriverPayload::IntegerRange {
                min,
                max,
                max_exclusive,
            } => match input.parse::<i64>() {
                Ok(n) => n >= *min && if *max_exclusive { n < *max } else { n <= *max },
                Err(_) => false,
            },
            DriverPayload::Group(_) => {
                let mut visited = HashSet::new();
                self.group_matches(input, &mut visited)
            }
        }
    }

    /// Group matching: any contained literal equals the input or any
    /// contained driver matches it. The visited set makes cyclic group
    /// references terminate.
    fn group_matches(&self, input: &str, visited: &mut HashSet<String>) -> bool {
        let DriverPayload::Group(data) = &self.payload else {
            return self.matches(input);
        };
        if !visited.insert(self.value.clone()) {
            return false;
        }
        if data.literals.read().contains(input) {
            return true;
        }
        let subs = data.sub_drivers.read().clone();
        subs.iter().any(|d| match &d.payload {
            DriverPayload::Group(_) => d.group_matches(input, visited),
            _ => d.matches(input),
        })
    }

    /// Replace a group's membership. Literal drivers become member strings;
    /// everything else (regexes, nested groups) becomes a sub-driver.
    ///
    /// No-op on non-group drivers.
    pub fn set_sub_values(&self, drivers: Vec<DriverHandle>) {
        let DriverPayload::Group(data) = &self.payload else {
            return;
        };
        let mut literals = HashSet::new();
        let mut subs = Vec::new();
        for driver in drivers {
            if driver.kind() == DriverKind::String {
                literals.insert(driver.value.clone());
            } else {
                subs.push(driver);
            }
        }
        *data.literals.write() = literals;
        *data.sub_drivers.write() = subs;
    }

    /// Non-string members of a group driver. With `recursive`, nested
    /// groups are expanded (cycle-safe) and included in the result.
    pub fn sub_drivers(&self, recursive: bool) -> Vec<DriverHandle> {
        let DriverPayload::Group(data) = &self.payload else {
            return Vec::new();
        };
        let direct = data.sub_drivers.read().clone();
        if !recursive {
            return direct;
        }
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(self.value.clone());
        let mut out = Vec::new();
        let mut stack = direct;
        while let Some(driver) = stack.pop() {
            if driver.kind() == DriverKind::ValueGroup {
                if !visited.insert(driver.value.clone()) {
                    continue;
                }
                stack.extend(driver.sub_drivers(false));
            }
            out.push(driver);
        }
        out
    }

    /// Literal members of a group driver. With `recursive`, the transitive
    /// closure across nested groups is returned; cycles terminate.
    pub fn group_literals(&self, recursive: bool) -> HashSet<String> {
        let DriverPayload::Group(data) = &self.payload else {
            return HashSet::new();
        };
        let mut literals = data.literals.read().clone();
        if recursive {
            for sub in self.sub_drivers(true) {
                if let DriverPayload::Group(nested) = &sub.payload {
                    literals.extend(nested.literals.read().iter().cloned());
                }
            }
        }
        literals
    }
}

impl PartialEq for Driver {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.value == other.value
    }
}

impl Eq for Driver {}

impl Hash for Driver {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.value.hash(state);
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_text())
    }
}

/// Parse an ISO-8601 instant in UTC
pub fn parse_instant(text: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| EngineError::InvalidInstant(text.to_string()))
}
