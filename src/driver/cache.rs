//! Driver Cache
//!
//! Shared interning registry for drivers: a two-level mapping
//! `value -> kind -> driver` so that creating the same textual driver twice
//! yields the same handle. Compiled rules hold [`DriverHandle`]s into this
//! registry, which is what lets the tree merge equal driver paths by
//! pointer-cheap equality.
//!
//! Value groups resolve in two passes: a referenced group that does not
//! exist yet is created as an empty placeholder (registered under both its
//! name and its id), and its membership is linked via
//! [`Driver::set_sub_values`] once the defining side arrives. Forward
//! references and cycles both terminate this way.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::driver::{Driver, DriverHandle, DriverKind, GROUP_PREFIX};
use crate::error::EngineResult;
use crate::ruleset::ValueGroup;

/// Two-level driver interning cache: `value -> kind -> driver`.
///
/// Concurrent: readers and writers go through the sharded map directly.
/// Insertion is first-writer-wins, so two threads interning the same text
/// concurrently both end up with the surviving handle.
#[derive(Debug, Default)]
pub struct DriverCache {
    drivers: DashMap<String, HashMap<DriverKind, DriverHandle>>,
}

impl DriverCache {
    pub fn new() -> Self {
        DriverCache {
            drivers: DashMap::new(),
        }
    }

    /// Look up a driver by its value portion and kind
    pub fn get(&self, value: &str, kind: DriverKind) -> Option<DriverHandle> {
        self.drivers
            .get(value)
            .and_then(|by_kind| by_kind.get(&kind).cloned())
    }

    /// Create-or-get a driver from canonical text. Group references
    /// (`VG:<name-or-uuid>`) resolve to the registered group, creating an
    /// empty placeholder for forward references; embedded group expansions
    /// (`VG:<name>:v1:...:VG:<sub>:...`) define the groups inline.
    pub fn get_or_create(&self, text: &str) -> EngineResult<DriverHandle> {
        if let Some(body) = text.strip_prefix(GROUP_PREFIX) {
            if body.contains(':') {
                return self.group_from_expansion(body);
            }
            return Ok(self.group_reference(body));
        }
        self.get_or_create_basic(text)
    }

    /// Intern a value group definition: create-or-get its driver, then
    /// resolve and link its membership. Entries of the form `VG:<ref>`
    /// become nested group references; everything else goes through the
    /// regular driver text path.
    pub fn intern_group(&self, group: &ValueGroup) -> EngineResult<DriverHandle> {
        self.define_group(Some(group.id), &group.name, &group.values, Vec::new())
    }

    /// Register an externally built driver handle under its canonical key.
    /// A handle already cached for that key wins and is returned instead,
    /// so equal drivers stay shared.
    pub fn adopt(&self, driver: &DriverHandle) -> DriverHandle {
        let handle =
            self.insert_first_writer_wins(driver.value(), driver.kind(), Arc::clone(driver));
        if let Some(id) = handle.group_id() {
            self.insert_first_writer_wins(&id.to_string(), DriverKind::ValueGroup, Arc::clone(&handle));
        }
        handle
    }

    /// Number of distinct interned values
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// All drivers of one kind currently interned
    pub fn drivers_by_kind(&self, kind: DriverKind) -> Vec<DriverHandle> {
        self.drivers
            .iter()
            .filter_map(|entry| entry.value().get(&kind).cloned())
            .collect()
    }

    fn get_or_create_basic(&self, text: &str) -> EngineResult<DriverHandle> {
        let (kind, value) = classify(text);
        if let Some(existing) = self.get(value, kind) {
            return Ok(existing);
        }
        let driver = Arc::new(Driver::from_text(text)?);
        Ok(self.insert_first_writer_wins(value, kind, driver))
    }

    /// Resolve `body` (a group name or uuid) to a group driver, creating a
    /// placeholder when the group has not been defined yet
    fn group_reference(&self, body: &str) -> DriverHandle {
        if let Some(existing) = self.get(body, DriverKind::ValueGroup) {
            return existing;
        }
        let id = body.parse::<Uuid>().unwrap_or_else(|_| Uuid::new_v4());
        let placeholder = Arc::new(Driver::group(id, body));
        self.insert_first_writer_wins(body, DriverKind::ValueGroup, placeholder)
    }

    /// Create-or-get a group driver under `name` (aliased under `id`), then
    /// link its membership from `member_texts` plus any pre-resolved subs
    fn define_group(
        &self,
        id: Option<Uuid>,
        name: &str,
        member_texts: &[String],
        extra_subs: Vec<DriverHandle>,
    ) -> EngineResult<DriverHandle> {
        let handle = self.group_handle(id, name);
        let mut members = extra_subs;
        for text in member_texts {
            if let Some(reference) = text.strip_prefix(GROUP_PREFIX) {
                members.push(self.group_reference(reference));
            } else {
                members.push(self.get_or_create_basic(text)?);
            }
        }
        handle.set_sub_values(members);
        Ok(handle)
    }

    /// Find an existing group handle by id or name, or create one. The
    /// handle ends up registered under both keys so later references by
    /// either alias resolve to the same driver.
    fn group_handle(&self, id: Option<Uuid>, name: &str) -> DriverHandle {
        let by_id = id.and_then(|id| self.get(&id.to_string(), DriverKind::ValueGroup));
        let by_name = self.get(name, DriverKind::ValueGroup);
        let handle = match (by_id, by_name) {
            (Some(handle), _) | (None, Some(handle)) => {
                if let Some(id) = id {
                    handle.set_group_id(id);
                }
                handle
            }
            (None, None) => Arc::new(Driver::group(id.unwrap_or_else(Uuid::new_v4), name)),
        };
        let handle = self.insert_first_writer_wins(name, DriverKind::ValueGroup, handle);
        if let Some(id) = id {
            self.insert_first_writer_wins(&id.to_string(), DriverKind::ValueGroup, Arc::clone(&handle));
        }
        handle
    }

    /// Parse an embedded group expansion `name:v1:...:VG:sub:x:...`. The
    /// first segment names the outer group; later segments define nested
    /// groups that become members of the first.
    fn group_from_expansion(&self, body: &str) -> EngineResult<DriverHandle> {
        let segments: Vec<&str> = body
            .split(GROUP_PREFIX)
            .map(|s| s.trim_end_matches(':'))
            .filter(|s| !s.is_empty())
            .collect();
        let mut nested = Vec::new();
        for segment in segments.iter().skip(1) {
            let (name, values) = split_segment(segment);
            nested.push(self.define_group(None, name, &values, Vec::new())?);
        }
        let (name, values) = split_segment(segments.first().copied().unwrap_or(body));
        self.define_group(None, name, &values, nested)
    }

    fn insert_first_writer_wins(
        &self,
        value: &str,
        kind: DriverKind,
        driver: DriverHandle,
    ) -> DriverHandle {
        let mut by_kind = self.drivers.entry(value.to_string()).or_default();
        Arc::clone(by_kind.entry(kind).or_insert(driver))
    }
}

/// Determine `(kind, value)` from canonical text without compiling anything
fn classify(text: &str) -> (DriverKind, &str) {
    if let Some(body) = text.strip_prefix(crate::driver::REGEX_PREFIX) {
        (DriverKind::Regex, body)
    } else if let Some(body) = text.strip_prefix(crate::driver::DATE_RANGE_PREFIX) {
        (DriverKind::DateRange, body)
    } else if let Some(body) = text.strip_prefix(crate::driver::INTEGER_RANGE_PREFIX) {
        (DriverKind::IntegerRange, body)
    } else if text.contains(".?") || text.contains(".*") {
        (DriverKind::Regex, text)
    } else {
        (DriverKind::String, text)
    }
}

/// Split a `name:v1:v2` segment into the group name and its member texts
fn split_segment(segment: &str) -> (&str, Vec<String>) {
    let mut parts = segment.split(':');
    let name = parts.next().unwrap_or(segment);
    let values: Vec<String> = parts
        .filter(|p| !p.is_empty())
        .map(ToString::to_string)
        .collect();
    (name, values)
}
