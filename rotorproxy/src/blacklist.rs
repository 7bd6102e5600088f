//! Strike counter with time-based expiry, gating candidate selection (§4.B).
//! Mutex-guarded map, the same shape as the teacher's
//! `readiness::Ready(Arc<Mutex<HashSet<_>>>)` — a single small lock is the
//! right tool here, not a lock-free structure, since strikes are rare events
//! compared to the inbound hot path (which never touches this at all).

use crate::entry::{ConfigEntry, Fingerprint};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct BlacklistEntry {
	strike_count: u32,
	first_strike_at: Instant,
	expires_at: Instant,
}

#[derive(Debug)]
pub struct Blacklist {
	strikes_to_blacklist: u32,
	duration: Duration,
	entries: Mutex<HashMap<Fingerprint, BlacklistEntry>>,
}

impl Blacklist {
	/// `strikes == 0` disables blacklisting entirely (§4.B).
	pub fn new(strikes_to_blacklist: u32, duration: Duration) -> Blacklist {
		Blacklist {
			strikes_to_blacklist,
			duration,
			entries: Mutex::new(HashMap::new()),
		}
	}

	pub fn disabled() -> Blacklist {
		Blacklist::new(0, Duration::from_secs(600))
	}

	/// Records one strike and returns the new strike count.
	pub fn strike(&self, fingerprint: Fingerprint) -> u32 {
		let now = Instant::now();
		let mut entries = self.entries.lock().unwrap();
		let entry = entries.entry(fingerprint).or_insert(BlacklistEntry {
			strike_count: 0,
			first_strike_at: now,
			expires_at: now + self.duration,
		});
		entry.strike_count += 1;
		entry.expires_at = entry.first_strike_at + self.duration;
		entry.strike_count
	}

	pub fn clear(&self, fingerprint: Fingerprint) {
		self.entries.lock().unwrap().remove(&fingerprint);
	}

	/// True only when an entry exists, has reached the strike threshold, and
	/// has not yet expired. Expired entries are removed as a side effect of
	/// this read (§4.B "lazy expiry", §9 "avoid a sweeper").
	pub fn is_blacklisted(&self, fingerprint: Fingerprint) -> bool {
		self.is_blacklisted_at(fingerprint, Instant::now())
	}

	pub fn is_blacklisted_at(&self, fingerprint: Fingerprint, now: Instant) -> bool {
		if self.strikes_to_blacklist == 0 {
			return false;
		}
		let mut entries = self.entries.lock().unwrap();
		let Some(entry) = entries.get(&fingerprint) else {
			return false;
		};
		if now >= entry.expires_at {
			entries.remove(&fingerprint);
			return false;
		}
		entry.strike_count >= self.strikes_to_blacklist
	}

	pub fn filter_allowed<'a>(&self, entries: &'a [ConfigEntry]) -> Vec<&'a ConfigEntry> {
		entries.iter().filter(|e| !self.is_blacklisted(e.fingerprint)).collect()
	}
}
