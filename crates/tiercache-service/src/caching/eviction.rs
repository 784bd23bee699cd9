use std::time::SystemTime;

use super::StorageTier;
use super::disk::log_storage_error;

/// Outcome of an eviction or purge pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvictionStats {
    pub removed_files: usize,
    pub removed_bytes: u64,

    pub retained_files: usize,
    pub retained_bytes: u64,
}

impl EvictionStats {
    fn removed(&mut self, size: u64) {
        self.removed_files += 1;
        self.removed_bytes += size;
    }

    fn retained(&mut self, size: u64) {
        self.retained_files += 1;
        self.retained_bytes += size;
    }

    fn report(&self, pass: &str) {
        tracing::debug!(
            "Storage {} retained {} files, totaling {} bytes",
            pass,
            self.retained_files,
            self.retained_bytes,
        );
        if self.removed_files > 0 {
            tracing::info!(
                "Storage {} removed {} files, totaling {} bytes",
                pass,
                self.removed_files,
                self.removed_bytes,
            );
        }

        metric!(gauge("caches.size.files") = self.retained_files as u64);
        metric!(gauge("caches.size.bytes") = self.retained_bytes);
        metric!(counter("caches.file.evicted") += self.removed_files as i64, "pass" => pass);
    }
}

struct Candidate {
    id: String,
    size: u64,
    modified: SystemTime,
}

impl StorageTier {
    /// Evicts the least recently written entries until the total size fits into the limit.
    ///
    /// This runs after every write, and is exposed for explicit cleanups.
    pub fn enforce_limits(&self) -> EvictionStats {
        let _guard = self.lock.lock();
        self.evict_to_fit()
    }

    /// Removes every entry that is older than `max_age`.
    ///
    /// Expired entries are otherwise only reported as missing, this is never run on its own.
    pub fn purge_expired(&self) -> EvictionStats {
        let _guard = self.lock.lock();
        let mut stats = EvictionStats::default();
        let now = SystemTime::now();

        for candidate in self.candidates() {
            let Ok(metadata) = self.storage.metadata(&candidate.id) else {
                continue;
            };
            if !self.is_expired(&metadata, now) {
                stats.retained(candidate.size);
                continue;
            }

            tracing::debug!("Removing expired entry `{}`", candidate.id);
            match self.storage.delete(&candidate.id) {
                Ok(()) => stats.removed(candidate.size),
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    log_storage_error("delete", &candidate.id, &err);
                    stats.retained(candidate.size);
                }
            }
        }

        stats.report("purge");
        stats
    }

    /// Lists all entries along with their size and modification time.
    ///
    /// Entries that cannot be inspected weigh nothing and sort first.
    fn candidates(&self) -> Vec<Candidate> {
        let ids = match self.storage.list_entries() {
            Ok(ids) => ids,
            Err(err) => {
                log_storage_error("list", "", &err);
                return vec![];
            }
        };

        ids.into_iter()
            .map(|id| match self.storage.metadata(&id) {
                Ok(metadata) => Candidate {
                    id,
                    size: metadata.size,
                    modified: metadata.modified,
                },
                Err(err) => {
                    log_storage_error("stat", &id, &err);
                    Candidate {
                        id,
                        size: 0,
                        modified: SystemTime::UNIX_EPOCH,
                    }
                }
            })
            .collect()
    }

    /// The eviction pass itself. Callers must hold `self.lock`.
    pub(super) fn evict_to_fit(&self) -> EvictionStats {
        let mut candidates = self.candidates();
        let mut stats = EvictionStats::default();

        let total_size: u64 = candidates.iter().map(|c| c.size).sum();
        if total_size <= self.max_disk_size {
            for candidate in &candidates {
                stats.retained(candidate.size);
            }
            return stats;
        }

        // oldest first, ties broken by identifier
        candidates.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.id.cmp(&b.id)));

        let mut to_free = total_size - self.max_disk_size;
        for candidate in candidates {
            if to_free == 0 {
                stats.retained(candidate.size);
                continue;
            }

            tracing::trace!("Evicting entry `{}`", candidate.id);
            match self.storage.delete(&candidate.id) {
                Ok(()) => {
                    stats.removed(candidate.size);
                    to_free = to_free.saturating_sub(candidate.size);
                }
                // already gone, so its bytes are freed all the same
                Err(err) if err.is_not_found() => {
                    to_free = to_free.saturating_sub(candidate.size);
                }
                Err(err) => {
                    log_storage_error("evict", &candidate.id, &err);
                    stats.retained(candidate.size);
                }
            }
        }

        stats.report("eviction");
        stats
    }
}
