//! Append-only change log helpers.
//!
//! Sequence numbers are dense per version scope: the first record in a
//! scope gets 1 and every later record gets `max + 1`. Stores compute the
//! maximum inside the same transaction that inserts the record, under the
//! area lock, so concurrent appends cannot collide.

use chrono::Utc;
use territory_types::{AreaId, ChangeId, ChangeInput, ChangeRecord, HistoryFilter};

use crate::error::HistoryError;

/// The sequence number following the scope's current maximum.
///
/// # Errors
///
/// Returns [`HistoryError::Inconsistent`] if the sequence would overflow.
pub fn next_sequence(max: Option<i64>) -> Result<i64, HistoryError> {
    max.unwrap_or(0)
        .checked_add(1)
        .ok_or_else(|| HistoryError::Inconsistent(String::from("sequence number overflow")))
}

/// Build a new, live change record.
///
/// `version_number` is the scope: the area's active version at record
/// time, or `None` while the area has no version.
pub fn new_record(
    area_id: AreaId,
    version_number: Option<i32>,
    sequence_number: i64,
    input: ChangeInput,
) -> ChangeRecord {
    ChangeRecord {
        id: ChangeId::new(),
        area_id,
        version_area_id: version_number.map(|_| area_id),
        version_number,
        sequence_number,
        entity_type: input.payload.entity_type(),
        entity_id: Some(input.payload.entity_id(area_id)),
        payload: input.payload,
        is_undone: false,
        created_by: input.created_by,
        created_at: Utc::now(),
    }
}

/// Select and order records for a history query.
///
/// Filtered by scope and undone flag, ordered by descending sequence number
/// (creation time breaks ties across scopes), then cut to the limit.
pub fn select<'a>(
    records: impl Iterator<Item = &'a ChangeRecord>,
    filter: &HistoryFilter,
) -> Vec<ChangeRecord> {
    let mut selected: Vec<ChangeRecord> = records
        .filter(|r| {
            filter
                .version_number
                .is_none_or(|n| r.version_number == Some(n))
        })
        .filter(|r| filter.include_undone || !r.is_undone)
        .cloned()
        .collect();

    selected.sort_by(|a, b| {
        b.sequence_number
            .cmp(&a.sequence_number)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });

    if let Some(limit) = filter.limit {
        selected.truncate(limit);
    }
    selected
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use territory_types::{AreaPatch, ChangePayload, EntityType, LayerId};

    use super::*;

    fn input() -> ChangeInput {
        ChangeInput::new(ChangePayload::UpdateArea {
            changes: AreaPatch::default(),
            previous: AreaPatch::default(),
        })
    }

    #[test]
    fn first_sequence_is_one() {
        assert_eq!(next_sequence(None).ok(), Some(1));
        assert_eq!(next_sequence(Some(41)).ok(), Some(42));
        assert!(next_sequence(Some(i64::MAX)).is_err());
    }

    #[test]
    fn unversioned_record_has_no_scope() {
        let area_id = AreaId::new();
        let record = new_record(area_id, None, 1, input().by("alice"));
        assert_eq!(record.scope(), None);
        assert_eq!(record.entity_type, EntityType::Area);
        assert_eq!(record.entity_id, Some(area_id.into_inner()));
        assert_eq!(record.created_by.as_deref(), Some("alice"));
        assert!(!record.is_undone);
    }

    #[test]
    fn versioned_record_points_at_its_area() {
        let area_id = AreaId::new();
        let layer_id = LayerId::new();
        let record = new_record(
            area_id,
            Some(3),
            7,
            ChangeInput::new(ChangePayload::AddPostalCodes {
                layer_id,
                codes: BTreeSet::from([String::from("10115")]),
                previous: None,
            }),
        );
        assert_eq!(record.scope(), Some((area_id, 3)));
        assert_eq!(record.entity_id, Some(layer_id.into_inner()));
    }

    #[test]
    fn select_orders_newest_first_and_filters() {
        let area_id = AreaId::new();
        let mut records: Vec<ChangeRecord> = (1..=4)
            .map(|seq| new_record(area_id, None, seq, input()))
            .collect();
        if let Some(r) = records.get_mut(1) {
            r.is_undone = true;
        }

        let all = select(records.iter(), &HistoryFilter::default());
        let seqs: Vec<i64> = all.iter().map(|r| r.sequence_number).collect();
        assert_eq!(seqs, vec![4, 3, 2, 1]);

        let live = select(
            records.iter(),
            &HistoryFilter {
                include_undone: false,
                limit: Some(2),
                version_number: None,
            },
        );
        let seqs: Vec<i64> = live.iter().map(|r| r.sequence_number).collect();
        assert_eq!(seqs, vec![4, 3]);

        let scoped = select(
            records.iter(),
            &HistoryFilter {
                version_number: Some(1),
                ..HistoryFilter::default()
            },
        );
        assert!(scoped.is_empty());
    }
}
