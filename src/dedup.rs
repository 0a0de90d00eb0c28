//! Merging repeated sightings of the same tag within one read

use std::collections::HashMap;

use crate::message::bytes_to_hex;
use crate::types::TagReadRecord;

/// Which fields make two reads "the same tag"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupPolicy {
    pub unique_by_antenna: bool,
    pub unique_by_data: bool,
    /// On collision keep the stronger read, still carrying the summed count
    pub record_highest_rssi: bool,
}

impl DedupPolicy {
    fn key(&self, record: &TagReadRecord) -> String {
        let mut key = record.epc_hex();
        if self.unique_by_antenna {
            key.push(';');
            key.push_str(&record.antenna.to_string());
        }
        if self.unique_by_data {
            key.push(';');
            key.push_str(&bytes_to_hex(&record.data));
        }
        key
    }
}

/// Collapse records by policy key, preserving first-seen order.
pub fn deduplicate(records: Vec<TagReadRecord>, policy: DedupPolicy) -> Vec<TagReadRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<TagReadRecord> = Vec::with_capacity(records.len());

    for record in records {
        let key = policy.key(&record);
        match index.get(&key) {
            None => {
                index.insert(key, merged.len());
                merged.push(record);
            }
            Some(&at) => {
                let existing = &mut merged[at];
                let total = existing.read_count + record.read_count;
                if policy.record_highest_rssi && record.rssi > existing.rssi {
                    *existing = record;
                }
                existing.read_count = total;
            }
        }
    }

    merged
}
