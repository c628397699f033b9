//! Leaderboard ordering

use std::cmp::Ordering;

use super::Entry;
use crate::config::SessionType;

/// Compare optional times with missing values after any time
fn missing_last(lhs: Option<u64>, rhs: Option<u64>) -> Ordering {
    match (lhs, rhs) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Practice and qualifying: fastest lap first
pub fn time_compare(lhs: &Entry, rhs: &Entry) -> Ordering {
    missing_last(lhs.best_lap(), rhs.best_lap())
}

/// Race: most laps first, then whoever completed them earlier, then by car
pub fn race_compare(lhs: &Entry, rhs: &Entry) -> Ordering {
    rhs.laps
        .cmp(&lhs.laps)
        .then_with(|| missing_last(lhs.time, rhs.time))
        .then_with(|| lhs.id.cmp(&rhs.id))
}

/// Comparator for a session type
pub fn comparator(mode: SessionType) -> fn(&Entry, &Entry) -> Ordering {
    match mode {
        SessionType::Practice | SessionType::Qualifying => time_compare,
        SessionType::Race => race_compare,
    }
}

/// Rank entries. Ties keep the input order.
pub fn rank<'a>(entries: impl IntoIterator<Item = &'a Entry>, mode: SessionType) -> Vec<Entry> {
    let mut ranking: Vec<Entry> = entries.into_iter().cloned().collect();
    ranking.sort_by(comparator(mode));
    ranking
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn race_entry(id: u8, laps: u32, time: Option<u64>) -> Entry {
        Entry {
            laps,
            time,
            ..Entry::new(id)
        }
    }

    fn timed_entry(id: u8, best: Option<u64>) -> Entry {
        Entry {
            best: vec![best],
            ..Entry::new(id)
        }
    }

    fn ids(ranking: &[Entry]) -> Vec<u8> {
        ranking.iter().map(|e| e.id).collect()
    }

    #[test]
    fn test_race_order() {
        let entries = [
            race_entry(0, 5, Some(120_000)),
            race_entry(1, 5, Some(119_000)),
            race_entry(2, 3, None),
        ];
        assert_eq!(ids(&rank(&entries, SessionType::Race)), vec![1, 0, 2]);
    }

    #[test]
    fn test_race_ties_by_car() {
        let entries = [
            race_entry(3, 4, Some(50_000)),
            race_entry(1, 4, Some(50_000)),
            race_entry(2, 4, None),
            race_entry(0, 4, None),
        ];
        assert_eq!(ids(&rank(&entries, SessionType::Race)), vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_qualifying_order() {
        let entries = [
            timed_entry(0, None),
            timed_entry(1, Some(31_250)),
            timed_entry(2, Some(30_980)),
        ];
        assert_eq!(ids(&rank(&entries, SessionType::Qualifying)), vec![2, 1, 0]);
        assert_eq!(ids(&rank(&entries, SessionType::Practice)), vec![2, 1, 0]);
    }
}
