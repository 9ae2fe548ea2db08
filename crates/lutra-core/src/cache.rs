// ── State cache ──
//
// Last-known-good value per (device, channel). Mutated only by the event
// router; used to suppress redundant publishes and to answer current-state
// queries. Not persisted -- it is rebuilt from the zone status dump that
// follows every hub (re)connect.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::model::{ChannelValue, DeviceId};

/// Outcome of applying an observation to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The value changed; `previous` is `None` for a first observation.
    Changed { previous: Option<ChannelValue> },
    /// Value-equal re-observation: a no-op, and no publish follows.
    Unchanged,
}

#[derive(Debug, Clone, Copy)]
struct ChannelEntry {
    value: ChannelValue,
    observed_at: DateTime<Utc>,
    due_republish: bool,
}

/// Cache of the last observed value for every known channel.
///
/// Absence of an entry means "unknown", never an error.
#[derive(Debug, Default)]
pub struct StateCache {
    entries: DashMap<(DeviceId, u8), ChannelEntry>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an observation. Idempotent for value-equal duplicates: the
    /// cached timestamp already reflects an equal observation, so the
    /// re-application is a no-op.
    pub fn apply(
        &self,
        device: DeviceId,
        channel: u8,
        value: ChannelValue,
        observed_at: DateTime<Utc>,
    ) -> Applied {
        use dashmap::mapref::entry::Entry;

        match self.entries.entry((device, channel)) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.value == value {
                    return Applied::Unchanged;
                }
                let previous = Some(entry.value);
                entry.value = value;
                entry.observed_at = observed_at;
                Applied::Changed { previous }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ChannelEntry {
                    value,
                    observed_at,
                    due_republish: false,
                });
                Applied::Changed { previous: None }
            }
        }
    }

    /// Current cached value, if the channel has ever been observed.
    pub fn current(&self, device: DeviceId, channel: u8) -> Option<ChannelValue> {
        self.entries.get(&(device, channel)).map(|entry| entry.value)
    }

    /// Current value plus when it last changed.
    pub fn last_change(
        &self,
        device: DeviceId,
        channel: u8,
    ) -> Option<(ChannelValue, DateTime<Utc>)> {
        self.entries
            .get(&(device, channel))
            .map(|entry| (entry.value, entry.observed_at))
    }

    /// Mark every entry due for republish without touching any value.
    /// Used after a hub reconnect to resynchronize broker subscribers.
    pub fn force_refresh_all(&self) {
        for mut entry in self.entries.iter_mut() {
            entry.due_republish = true;
        }
    }

    /// Drain entries marked due for republish, in stable key order.
    pub fn take_due(&self) -> Vec<(DeviceId, u8, ChannelValue)> {
        let mut due = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.due_republish {
                entry.due_republish = false;
                let (device, channel) = *entry.key();
                due.push((device, channel, entry.value));
            }
        }
        due.sort_by_key(|(device, channel, _)| (*device, *channel));
        due
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_observation_is_a_change_from_nothing() {
        let cache = StateCache::new();
        let applied = cache.apply(DeviceId(1), 0, ChannelValue::On, Utc::now());
        assert_eq!(applied, Applied::Changed { previous: None });
        assert_eq!(cache.current(DeviceId(1), 0), Some(ChannelValue::On));
    }

    #[test]
    fn duplicate_observation_is_unchanged() {
        let cache = StateCache::new();
        let first = Utc::now();
        cache.apply(DeviceId(1), 0, ChannelValue::Level(40), first);
        let applied = cache.apply(
            DeviceId(1),
            0,
            ChannelValue::Level(40),
            first + chrono::Duration::seconds(5),
        );
        assert_eq!(applied, Applied::Unchanged);
        // The original observation timestamp stands.
        let (_, observed_at) = cache.last_change(DeviceId(1), 0).expect("cached");
        assert_eq!(observed_at, first);
    }

    #[test]
    fn change_reports_the_previous_value() {
        let cache = StateCache::new();
        cache.apply(DeviceId(1), 0, ChannelValue::Off, Utc::now());
        let applied = cache.apply(DeviceId(1), 0, ChannelValue::On, Utc::now());
        assert_eq!(
            applied,
            Applied::Changed {
                previous: Some(ChannelValue::Off)
            }
        );
    }

    #[test]
    fn channels_are_independent() {
        let cache = StateCache::new();
        cache.apply(DeviceId(1), 0, ChannelValue::On, Utc::now());
        let applied = cache.apply(DeviceId(1), 1, ChannelValue::On, Utc::now());
        assert_eq!(applied, Applied::Changed { previous: None });
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn force_refresh_marks_everything_without_changing_values() {
        let cache = StateCache::new();
        cache.apply(DeviceId(1), 0, ChannelValue::On, Utc::now());
        cache.apply(DeviceId(2), 0, ChannelValue::Level(30), Utc::now());

        assert!(cache.take_due().is_empty());

        cache.force_refresh_all();
        let due = cache.take_due();
        assert_eq!(
            due,
            vec![
                (DeviceId(1), 0, ChannelValue::On),
                (DeviceId(2), 0, ChannelValue::Level(30)),
            ]
        );

        // Draining clears the flags.
        assert!(cache.take_due().is_empty());
        assert_eq!(cache.current(DeviceId(2), 0), Some(ChannelValue::Level(30)));
    }
}
