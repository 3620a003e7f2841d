use chrono::{DateTime, Duration, Utc};

use crate::cache::entry::EntryMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    TtlExpired,
    OverBudget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEviction {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub size: u64,
    pub reason: EvictionReason,
}

#[derive(Debug, Default, Clone)]
pub struct EvictionPlan {
    pub planned: Vec<PlannedEviction>,
    pub scanned: usize,
    pub total_bytes_before: u64,
    pub valid_bytes_before: u64,
    pub valid_bytes_after: u64,
    pub removed_ttl: usize,
    pub removed_size: usize,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.planned.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.planned.iter().map(|p| p.key.clone()).collect()
    }
}

/// Decide which entries a cleanup pass removes.
///
/// Expired entries always go. When the remaining valid entries still exceed
/// `max_bytes`, the oldest ones are added until the valid total is at or
/// below `target_bytes`. Entries sharing a timestamp are ordered by key.
pub fn plan_evictions(
    entries: Vec<EntryMeta>,
    now: DateTime<Utc>,
    ttl: Duration,
    max_bytes: u64,
    target_bytes: u64,
) -> EvictionPlan {
    let mut plan = EvictionPlan {
        scanned: entries.len(),
        total_bytes_before: entries.iter().map(|e| e.size).sum(),
        ..EvictionPlan::default()
    };

    let mut valid: Vec<EntryMeta> = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.is_valid(ttl, now) {
            valid.push(entry);
        } else {
            plan.planned.push(PlannedEviction {
                key: entry.key,
                stored_at: entry.stored_at,
                size: entry.size,
                reason: EvictionReason::TtlExpired,
            });
            plan.removed_ttl += 1;
        }
    }

    let mut valid_bytes: u64 = valid.iter().map(|e| e.size).sum();
    plan.valid_bytes_before = valid_bytes;

    if valid_bytes > max_bytes {
        valid.sort_by(|a, b| {
            a.stored_at
                .cmp(&b.stored_at)
                .then_with(|| a.key.cmp(&b.key))
        });

        for entry in valid {
            if valid_bytes <= target_bytes {
                break;
            }
            valid_bytes = valid_bytes.saturating_sub(entry.size);
            plan.planned.push(PlannedEviction {
                key: entry.key,
                stored_at: entry.stored_at,
                size: entry.size,
                reason: EvictionReason::OverBudget,
            });
            plan.removed_size += 1;
        }
    }

    plan.valid_bytes_after = valid_bytes;
    plan
}
