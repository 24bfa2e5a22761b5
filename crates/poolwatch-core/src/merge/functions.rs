// ── Merge function library ──
//
// One merge per resource shape. Every function is total over `Value`:
// anything it does not recognise yields `None` (leave the cache alone).

use serde_json::{Map, Value};

use super::Merge;
use crate::address::ScopedAddress;

/// Blocks kept by the block list merge.
pub const BLOCK_CAP: usize = 50;
/// Payments kept by the payment list merge.
pub const PAYMENT_CAP: usize = 50;
/// Shares kept by the per-miner share list merge.
pub const SHARE_CAP: usize = 200;

const LAST_ACTIVITY: &str = "lastSubmittedSolutionTime";

// ── Object overlay ───────────────────────────────────────────────────

/// Shallow `{...old, ...delta}`. Nested objects are replaced, not merged.
pub fn overlay() -> Merge {
    Merge::new(|old, delta| {
        let (Value::Object(old), Value::Object(delta)) = (old, delta) else {
            return None;
        };
        let mut next = old.clone();
        for (field, value) in delta {
            next.insert(field.clone(), value.clone());
        }
        (next != *old).then_some(Value::Object(next))
    })
}

// ── Prepend and cap ──────────────────────────────────────────────────

/// `[delta, ...old]` truncated to `cap`. Redelivered deltas are kept twice.
pub fn prepend_capped(cap: usize) -> Merge {
    Merge::new(move |old, delta| prepend(old, delta, cap, None))
}

/// Like [`prepend_capped`], but an older element whose `field` equals the
/// delta's is dropped first.
pub fn prepend_capped_dedup_by(cap: usize, field: impl Into<String>) -> Merge {
    let field = field.into();
    Merge::new(move |old, delta| prepend(old, delta, cap, Some(&field)))
}

fn prepend(old: &Value, item: &Value, cap: usize, dedup_by: Option<&str>) -> Option<Value> {
    let Value::Array(items) = old else {
        return None;
    };
    if !item.is_object() {
        return None;
    }

    let identity = dedup_by.and_then(|field| {
        item.get(field)
            .filter(|id| !id.is_null())
            .map(|id| (field, id))
    });
    let is_duplicate =
        |existing: &Value| identity.is_some_and(|(field, id)| existing.get(field) == Some(id));

    let mut next = Vec::with_capacity(cap.min(items.len() + 1));
    next.push(item.clone());
    next.extend(
        items
            .iter()
            .filter(|existing| !is_duplicate(existing))
            .take(cap.saturating_sub(1))
            .cloned(),
    );
    next.truncate(cap);
    Some(Value::Array(next))
}

// ── Share list ───────────────────────────────────────────────────────

/// Prepend `delta.newShare` when `delta.address` falls inside `scope`.
pub fn share_prepend(scope: ScopedAddress, cap: usize) -> Merge {
    Merge::new(move |old, delta| {
        let source = delta.get("address")?.as_str()?;
        if !scope.accepts(source) {
            return None;
        }
        prepend(old, delta.get("newShare")?, cap, None)
    })
}

// ── Miner profile ────────────────────────────────────────────────────

/// Record a share's time on the matching worker and keep the profile's
/// top-level last activity at the newest time across itself and every
/// worker.
pub fn profile_activity(scope: ScopedAddress) -> Merge {
    Merge::new(move |old, delta| {
        let raw_source = delta.get("address")?.as_str()?;
        if !scope.accepts(raw_source) {
            return None;
        }
        let source = ScopedAddress::parse(raw_source)?;
        let time = delta.get("newShare")?.get("time")?;
        let at = time.as_f64()?;

        let Value::Object(profile) = old else {
            return None;
        };
        let mut next = profile.clone();

        if let Some(Value::Array(workers)) = next.get_mut("workers") {
            for worker in workers.iter_mut().filter(|w| worker_matches(w, &source)) {
                let Value::Object(worker) = worker else {
                    continue;
                };
                let newer = worker
                    .get(LAST_ACTIVITY)
                    .and_then(Value::as_f64)
                    .is_none_or(|current| at > current);
                if newer {
                    worker.insert(LAST_ACTIVITY.to_owned(), time.clone());
                }
            }
        }

        let newest = newest_activity(&next, time, at);
        next.insert(LAST_ACTIVITY.to_owned(), newest);
        (next != *profile).then_some(Value::Object(next))
    })
}

fn worker_matches(worker: &Value, source: &ScopedAddress) -> bool {
    let by_address = worker
        .get("address")
        .and_then(Value::as_str)
        .and_then(ScopedAddress::parse)
        .is_some_and(|address| address == *source);
    let by_name = match (source.worker(), worker.get("name").and_then(Value::as_str)) {
        (Some(wanted), Some(name)) => wanted.eq_ignore_ascii_case(name),
        _ => false,
    };
    by_address || by_name
}

/// Max of the delta time, the profile's own value and every worker's.
fn newest_activity(profile: &Map<String, Value>, time: &Value, at: f64) -> Value {
    let workers = profile
        .get("workers")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|w| w.get(LAST_ACTIVITY));

    std::iter::once(profile.get(LAST_ACTIVITY))
        .flatten()
        .chain(workers)
        .filter_map(|v| v.as_f64().map(|n| (n, v)))
        .fold((at, time), |best, (n, v)| if n > best.0 { (n, v) } else { best })
        .1
        .clone()
}

// ── Chart series ─────────────────────────────────────────────────────

/// Append one point from `delta.newShare` to a parallel-array chart:
/// its `time` to `timestamps`, and `newShare[name]` (or null) to every
/// `series[name]`. All arrays keep only the last `maxPoints` entries,
/// falling back to `default_max_points` when the chart carries none.
/// A chart whose series are already out of step with `timestamps` is left
/// alone.
pub fn chart_append(scope: ScopedAddress, default_max_points: usize) -> Merge {
    Merge::new(move |old, delta| {
        let source = delta.get("address")?.as_str()?;
        if !scope.accepts(source) {
            return None;
        }
        let share = delta.get("newShare")?;
        let time = share.get("time")?;
        time.as_f64()?;

        let Value::Object(chart) = old else {
            return None;
        };
        let Some(Value::Array(timestamps)) = chart.get("timestamps") else {
            return None;
        };
        let max_points = chart
            .get("maxPoints")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(default_max_points);

        let mut next = chart.clone();

        let points = timestamps.len();
        let mut timestamps = timestamps.clone();
        timestamps.push(time.clone());
        keep_last(&mut timestamps, max_points);

        if let Some(series) = chart.get("series") {
            let Value::Object(series) = series else {
                return None;
            };
            let mut patched = Map::with_capacity(series.len());
            for (name, values) in series {
                let Value::Array(values) = values else {
                    return None;
                };
                if values.len() != points {
                    return None;
                }
                let mut values = values.clone();
                values.push(share.get(name).cloned().unwrap_or(Value::Null));
                keep_last(&mut values, max_points);
                patched.insert(name.clone(), Value::Array(values));
            }
            next.insert("series".to_owned(), Value::Object(patched));
        }

        let last_update = timestamps
            .iter()
            .filter_map(|v| v.as_f64().map(|n| (n, v)))
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map_or_else(|| time.clone(), |(_, v)| v.clone());
        next.insert("timestamps".to_owned(), Value::Array(timestamps));
        next.insert("lastUpdate".to_owned(), last_update);

        Some(Value::Object(next))
    })
}

fn keep_last(values: &mut Vec<Value>, max: usize) {
    if values.len() > max {
        values.drain(..values.len() - max);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn scope(raw: &str) -> ScopedAddress {
        ScopedAddress::parse(raw).unwrap()
    }

    fn share_delta(address: &str, time: u64) -> Value {
        json!({ "address": address, "newShare": { "time": time, "difficulty": 8 } })
    }

    // ── overlay ──

    #[test]
    fn overlay_is_shallow() {
        let old = json!({ "hashrate": 10, "fees": { "pool": 1, "tx": 2 }, "miners": 4 });
        let delta = json!({ "hashrate": 12, "fees": { "pool": 3 } });
        let next = overlay().apply(&old, &delta).unwrap();
        assert_eq!(next, json!({ "hashrate": 12, "fees": { "pool": 3 }, "miners": 4 }));
        assert_eq!(old["hashrate"], 10, "old value is not mutated");
    }

    #[test]
    fn overlay_ignores_non_objects_and_noops() {
        let old = json!({ "hashrate": 10 });
        assert!(overlay().apply(&old, &json!([1, 2])).is_none());
        assert!(overlay().apply(&json!(null), &json!({ "a": 1 })).is_none());
        assert!(overlay().apply(&old, &json!({ "hashrate": 10 })).is_none());
    }

    // ── prepend ──

    #[test]
    fn block_prepend_puts_newest_first() {
        let old = json!([{ "epoch": 99 }]);
        let next = prepend_capped(BLOCK_CAP)
            .apply(&old, &json!({ "epoch": 100 }))
            .unwrap();
        assert_eq!(next, json!([{ "epoch": 100 }, { "epoch": 99 }]));
    }

    #[test]
    fn prepend_never_exceeds_cap() {
        let merge = prepend_capped(PAYMENT_CAP);
        let mut list = json!([]);
        for n in 0..120 {
            list = merge.apply(&list, &json!({ "tx": n })).unwrap();
            assert!(list.as_array().unwrap().len() <= PAYMENT_CAP);
        }
        let items = list.as_array().unwrap();
        assert_eq!(items.len(), PAYMENT_CAP);
        assert_eq!(items[0]["tx"], 119);
        assert_eq!(items[PAYMENT_CAP - 1]["tx"], 70);
    }

    #[test]
    fn redelivery_duplicates_without_dedup() {
        let merge = prepend_capped(BLOCK_CAP);
        let block = json!({ "hash": "abc", "epoch": 7 });
        let once = merge.apply(&json!([]), &block).unwrap();
        let twice = merge.apply(&once, &block).unwrap();
        assert_eq!(twice, json!([block.clone(), block]));
    }

    #[test]
    fn dedup_by_replaces_older_copy() {
        let merge = prepend_capped_dedup_by(BLOCK_CAP, "hash");
        let old = json!([{ "hash": "b", "epoch": 8 }, { "hash": "a", "epoch": 7 }]);
        let next = merge
            .apply(&old, &json!({ "hash": "a", "epoch": 7, "confirmed": true }))
            .unwrap();
        assert_eq!(
            next,
            json!([
                { "hash": "a", "epoch": 7, "confirmed": true },
                { "hash": "b", "epoch": 8 }
            ])
        );
    }

    #[test]
    fn prepend_rejects_malformed_input() {
        let merge = prepend_capped(BLOCK_CAP);
        assert!(merge.apply(&json!({ "not": "a list" }), &json!({ "epoch": 1 })).is_none());
        assert!(merge.apply(&json!([]), &json!(null)).is_none());
        assert!(merge.apply(&json!([]), &json!(42)).is_none());
    }

    // ── shares ──

    #[test]
    fn worker_scope_filters_other_workers() {
        let merge = share_prepend(scope("kaspa:qr0abc.workerA"), SHARE_CAP);
        let old = json!([{ "time": 1 }]);

        assert!(merge.apply(&old, &share_delta("kaspa:qr0abc.workerB", 2)).is_none());

        let next = merge
            .apply(&old, &share_delta("KASPA:QR0ABC.WORKERA", 2))
            .unwrap();
        assert_eq!(next[0]["time"], 2);
        assert_eq!(next.as_array().unwrap().len(), 2);
    }

    #[test]
    fn base_scope_takes_any_worker_of_that_miner() {
        let merge = share_prepend(scope("kaspa:qr0abc"), SHARE_CAP);
        assert!(merge.apply(&json!([]), &share_delta("kaspa:qr0abc.rig9", 5)).is_some());
        assert!(merge.apply(&json!([]), &share_delta("kaspa:qzzz.rig9", 5)).is_none());
    }

    #[test]
    fn share_list_never_exceeds_cap() {
        let merge = share_prepend(scope("kaspa:qr0abc.rig01"), SHARE_CAP);
        let mut list = json!([]);
        for n in 0..450 {
            let source = if n % 2 == 0 { "kaspa:qr0abc.rig01" } else { "KASPA:QR0ABC.RIG01" };
            list = merge.apply(&list, &share_delta(source, n)).unwrap();
            assert!(list.as_array().unwrap().len() <= SHARE_CAP);
        }
        let shares = list.as_array().unwrap();
        assert_eq!(shares.len(), SHARE_CAP);
        assert_eq!(shares[0]["time"], 449);
        assert_eq!(shares[SHARE_CAP - 1]["time"], 250);
    }

    #[test]
    fn share_delta_missing_fields_is_ignored() {
        let merge = share_prepend(scope("kaspa:qr0abc"), SHARE_CAP);
        assert!(merge.apply(&json!([]), &json!({ "address": "kaspa:qr0abc" })).is_none());
        assert!(merge.apply(&json!([]), &json!({ "newShare": { "time": 1 } })).is_none());
    }

    // ── profile ──

    fn profile() -> Value {
        json!({
            "address": "kaspa:qr0abc",
            "lastSubmittedSolutionTime": 1000,
            "workers": [
                { "name": "rig01", "address": "kaspa:qr0abc.rig01", "lastSubmittedSolutionTime": 900 },
                { "name": "rig02", "lastSubmittedSolutionTime": 1200 }
            ]
        })
    }

    #[test]
    fn profile_patch_updates_worker_and_top_level() {
        let merge = profile_activity(scope("kaspa:qr0abc"));
        let next = merge
            .apply(&profile(), &share_delta("kaspa:qr0abc.rig01", 1500))
            .unwrap();
        assert_eq!(next["workers"][0]["lastSubmittedSolutionTime"], 1500);
        assert_eq!(next["workers"][1]["lastSubmittedSolutionTime"], 1200);
        assert_eq!(next["lastSubmittedSolutionTime"], 1500);
    }

    #[test]
    fn profile_patch_matches_worker_by_name_ignoring_case() {
        let merge = profile_activity(scope("kaspa:qr0abc"));
        let next = merge
            .apply(&profile(), &share_delta("kaspa:qr0abc.RIG02", 1300))
            .unwrap();
        assert_eq!(next["workers"][1]["lastSubmittedSolutionTime"], 1300);
    }

    #[test]
    fn top_level_tracks_max_across_all_workers() {
        let merge = profile_activity(scope("kaspa:qr0abc"));
        let mut current = json!({
            "lastSubmittedSolutionTime": 100,
            "workers": [
                { "name": "a", "lastSubmittedSolutionTime": 100 },
                { "name": "b", "lastSubmittedSolutionTime": 5000 }
            ]
        });
        for (worker, time) in [("a", 300), ("b", 200), ("a", 250), ("c", 400)] {
            if let Some(next) =
                merge.apply(&current, &share_delta(&format!("kaspa:qr0abc.{worker}"), time))
            {
                current = next;
            }
            let workers_max = current["workers"]
                .as_array()
                .unwrap()
                .iter()
                .filter_map(|w| w["lastSubmittedSolutionTime"].as_u64())
                .max()
                .unwrap();
            let top = current["lastSubmittedSolutionTime"].as_u64().unwrap();
            assert!(top >= workers_max);
        }
        assert_eq!(current["lastSubmittedSolutionTime"], 5000);
        assert_eq!(current["workers"][0]["lastSubmittedSolutionTime"], 300);
    }

    #[test]
    fn profile_ignores_foreign_or_malformed_deltas() {
        let merge = profile_activity(scope("kaspa:qr0abc"));
        assert!(merge.apply(&profile(), &share_delta("kaspa:other.rig01", 9999)).is_none());
        assert!(merge
            .apply(&profile(), &json!({ "address": "kaspa:qr0abc.rig01", "newShare": {} }))
            .is_none());
        assert!(merge
            .apply(&profile(), &json!({ "address": "kaspa:qr0abc.rig01", "newShare": { "time": "soon" } }))
            .is_none());
    }

    // ── chart ──

    #[test]
    fn chart_appends_and_slides_window() {
        let merge = chart_append(scope("kaspa:qr0abc"), 100);
        let old = json!({
            "timestamps": [1, 2, 3],
            "series": { "difficulty": [10, 20, 30] },
            "maxPoints": 3
        });
        let next = merge.apply(&old, &share_delta("kaspa:qr0abc", 4)).unwrap();
        assert_eq!(next["timestamps"], json!([2, 3, 4]));
        assert_eq!(next["series"]["difficulty"], json!([20, 30, 8]));
        assert_eq!(next["lastUpdate"], 4);
        assert_eq!(next["maxPoints"], 3);
    }

    #[test]
    fn chart_series_stay_aligned() {
        let merge = chart_append(scope("kaspa:qr0abc"), 5);
        let mut chart = json!({
            "timestamps": [],
            "series": { "difficulty": [], "hashrate": [] }
        });
        for t in 1..=12 {
            chart = merge.apply(&chart, &share_delta("kaspa:qr0abc", t)).unwrap();
            let len = chart["timestamps"].as_array().unwrap().len();
            assert_eq!(chart["series"]["difficulty"].as_array().unwrap().len(), len);
            assert_eq!(chart["series"]["hashrate"].as_array().unwrap().len(), len);
            assert!(len <= 5);
        }
        assert_eq!(chart["timestamps"], json!([8, 9, 10, 11, 12]));
        assert_eq!(chart["series"]["hashrate"], json!([null, null, null, null, null]));
    }

    #[test]
    fn chart_rejects_malformed_shapes() {
        let merge = chart_append(scope("kaspa:qr0abc"), 5);
        let delta = share_delta("kaspa:qr0abc", 1);
        assert!(merge.apply(&json!({ "series": {} }), &delta).is_none());
        assert!(merge
            .apply(&json!({ "timestamps": [], "series": { "x": 1 } }), &delta)
            .is_none());
        assert!(merge
            .apply(&json!({ "timestamps": [] }), &json!({ "newShare": {} }))
            .is_none());
        assert!(merge
            .apply(&json!({ "timestamps": [] }), &share_delta("kaspa:else", 1))
            .is_none());
        assert!(merge
            .apply(&json!({ "timestamps": [] }), &json!({ "newShare": { "time": 1 } }))
            .is_none());
    }

    #[test]
    fn misaligned_chart_is_left_alone() {
        let merge = chart_append(scope("kaspa:qr0abc"), 100);
        let old = json!({
            "timestamps": [1, 2, 3],
            "series": { "difficulty": [10, 20] },
            "maxPoints": 3
        });
        assert!(merge.apply(&old, &share_delta("kaspa:qr0abc", 4)).is_none());
    }
}
