use crate::domain::model::PartnerRecord;
use std::collections::HashMap;

/// Partner records keyed by upstream partner id, kept in first-insertion order.
#[derive(Debug, Default, Clone)]
pub struct PartnerSet {
    records: Vec<PartnerRecord>,
    index: HashMap<String, usize>,
    conflicts: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub merged: usize,
    pub conflicts: usize,
}

impl PartnerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `incoming` into the set.
    ///
    /// A record whose id is already present only contributes its locations;
    /// the first-seen name, level, address and contact fields are kept.
    pub fn merge(&mut self, incoming: Vec<PartnerRecord>) -> MergeStats {
        let mut stats = MergeStats::default();

        for record in incoming {
            let Some(&position) = self.index.get(&record.partner_id) else {
                self.index
                    .insert(record.partner_id.clone(), self.records.len());
                self.records.push(record);
                stats.added += 1;
                continue;
            };

            let existing = &mut self.records[position];
            if !existing.same_details(&record) {
                tracing::warn!(
                    "⚠️ Partner {} differs between sources: keeping '{}' ({}), ignoring '{}' ({})",
                    record.partner_id,
                    existing.company_name,
                    existing.address,
                    record.company_name,
                    record.address
                );
                stats.conflicts += 1;
            }

            for location in record.locations {
                if !existing.locations.contains(&location) {
                    existing.locations.push(location);
                }
            }
            stats.merged += 1;
        }

        self.conflicts += stats.conflicts;
        stats
    }

    pub fn records(&self) -> &[PartnerRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<PartnerRecord> {
        self.records
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
