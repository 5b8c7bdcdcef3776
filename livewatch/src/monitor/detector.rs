//! Change detection between two consecutive snapshots.
//!
//! The detector is a pure function: it never reads clocks or stores and
//! always produces the same events for the same inputs.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::{Event, PostKind, PriorSnapshot, Snapshot};

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Events in emission order: post events before live events.
    pub events: Vec<Event>,
    /// The snapshot to store, with session fields carried over from the prior.
    pub snapshot: Snapshot,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Reminder spacing of one binding subscribed to hourly live reminders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourlyCadence {
    pub binding_id: String,
    pub interval: Duration,
}

impl HourlyCadence {
    pub fn new(binding_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            binding_id: binding_id.into(),
            interval,
        }
    }
}

fn elapsed_secs(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - since).num_seconds().max(0) as u64
}

fn non_empty(preferred: &str, fallback: &str) -> String {
    if preferred.is_empty() {
        fallback.to_string()
    } else {
        preferred.to_string()
    }
}

/// Compare `fresh` against `prior` and derive the events of this cycle.
///
/// `fresh` only needs the observed fields; session start, peak viewers and
/// the per-binding hourly ticks are reconciled here and returned in
/// [`Detection::snapshot`]. `cadences` lists the bindings subscribed to
/// hourly reminders.
pub fn detect(
    prior: &PriorSnapshot,
    mut fresh: Snapshot,
    now: DateTime<Utc>,
    cadences: &[HourlyCadence],
) -> Detection {
    let Some(prior) = prior.as_snapshot() else {
        // Baseline: record the current session without announcing anything.
        if fresh.is_live() {
            fresh.live_session_start = Some(now);
            fresh.peak_viewers = fresh.viewers;
            fresh.hourly_ticks = start_ticks(cadences, now);
        } else {
            clear_live_fields(&mut fresh);
        }
        return Detection {
            events: Vec::new(),
            snapshot: fresh,
        };
    };

    let mut events = Vec::new();

    if fresh.display_name.is_none() {
        fresh.display_name = prior.display_name.clone();
    }

    match fresh.latest_post.take() {
        Some(post) => {
            if prior.latest_post_id() != Some(post.id.as_str()) {
                let event = match post.kind {
                    PostKind::Video => Event::NewVideoPost { post: post.clone() },
                    PostKind::Plain | PostKind::Repost => Event::NewPost { post: post.clone() },
                };
                events.push(event);
            }
            fresh.latest_post = Some(post);
        }
        None => fresh.latest_post = prior.latest_post.clone(),
    }

    match (prior.is_live(), fresh.is_live()) {
        (false, true) => {
            fresh.live_session_start = Some(now);
            fresh.peak_viewers = fresh.viewers;
            fresh.hourly_ticks = start_ticks(cadences, now);
            events.push(Event::LiveStarted {
                title: fresh.live_title.clone(),
                url: fresh.live_url.clone(),
                viewers: fresh.viewers,
                started_at: now,
            });
        }
        (true, true) => {
            let session_start = prior.live_session_start.unwrap_or(now);
            fresh.live_session_start = Some(session_start);
            fresh.peak_viewers = prior.peak_viewers.max(fresh.viewers);

            let mut due = Vec::new();
            fresh.hourly_ticks = BTreeMap::new();
            for cadence in cadences {
                let tick = match prior.hourly_ticks.get(&cadence.binding_id) {
                    // Subscribed mid-session: the cadence starts now.
                    None => now,
                    Some(&last) => {
                        let interval = TimeDelta::from_std(cadence.interval).unwrap_or(TimeDelta::MAX);
                        if now - last >= interval {
                            due.push(cadence.binding_id.clone());
                            now
                        } else {
                            last
                        }
                    }
                };
                fresh.hourly_ticks.insert(cadence.binding_id.clone(), tick);
            }

            if !due.is_empty() {
                events.push(Event::LiveHourlyTick {
                    title: non_empty(&fresh.live_title, &prior.live_title),
                    url: non_empty(&fresh.live_url, &prior.live_url),
                    viewers: fresh.viewers,
                    duration_secs: elapsed_secs(session_start, now),
                    peak_viewers: fresh.peak_viewers,
                    bindings: due,
                });
            }
        }
        (true, false) => {
            let duration_secs = prior
                .live_session_start
                .map(|start| elapsed_secs(start, now))
                .unwrap_or(0);
            events.push(Event::LiveEnded {
                title: non_empty(&prior.live_title, &fresh.live_title),
                url: non_empty(&prior.live_url, &fresh.live_url),
                duration_secs,
                peak_viewers: prior.peak_viewers,
            });
            clear_live_fields(&mut fresh);
        }
        (false, false) => clear_live_fields(&mut fresh),
    }

    Detection {
        events,
        snapshot: fresh,
    }
}

fn start_ticks(cadences: &[HourlyCadence], now: DateTime<Utc>) -> BTreeMap<String, DateTime<Utc>> {
    cadences
        .iter()
        .map(|cadence| (cadence.binding_id.clone(), now))
        .collect()
}

fn clear_live_fields(snapshot: &mut Snapshot) {
    snapshot.live_session_start = None;
    snapshot.peak_viewers = 0;
    snapshot.hourly_ticks.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, LiveStatus, PostInfo};
    use rstest::rstest;

    const HOUR: Duration = Duration::from_secs(3600);

    fn hourly() -> Vec<HourlyCadence> {
        vec![HourlyCadence::new("b1", HOUR)]
    }

    fn ticked(at: DateTime<Utc>) -> BTreeMap<String, DateTime<Utc>> {
        BTreeMap::from([("b1".to_string(), at)])
    }

    fn post(id: &str, kind: PostKind) -> PostInfo {
        PostInfo {
            id: id.to_string(),
            kind,
            published_at: None,
            text: format!("post {}", id),
            title: String::new(),
            url: format!("https://example.com/p/{}", id),
        }
    }

    fn offline(at: DateTime<Utc>, post_id: Option<&str>) -> Snapshot {
        let mut s = Snapshot::offline(at);
        s.latest_post = post_id.map(|id| post(id, PostKind::Plain));
        s
    }

    fn online(at: DateTime<Utc>, viewers: u64) -> Snapshot {
        let mut s = Snapshot::offline(at);
        s.live_status = LiveStatus::Online;
        s.live_title = "Stream".to_string();
        s.live_url = "https://live.example.com/1".to_string();
        s.viewers = viewers;
        s
    }

    fn kinds(detection: &Detection) -> Vec<EventKind> {
        detection.events.iter().map(Event::kind).collect()
    }

    #[test]
    fn test_absent_prior_produces_no_events() {
        let now = Utc::now();
        let mut fresh = online(now, 40);
        fresh.latest_post = Some(post("1", PostKind::Video));

        let detection = detect(&PriorSnapshot::Absent, fresh, now, &hourly());
        assert!(detection.is_empty());
        assert_eq!(detection.snapshot.live_session_start, Some(now));
        assert_eq!(detection.snapshot.peak_viewers, 40);
        assert_eq!(detection.snapshot.hourly_ticks, ticked(now));
    }

    #[test]
    fn test_new_plain_post() {
        let now = Utc::now();
        let prior = PriorSnapshot::Present(offline(now - TimeDelta::seconds(60), Some("5")));

        let detection = detect(&prior, offline(now, Some("6")), now, &hourly());
        assert_eq!(kinds(&detection), vec![EventKind::NewPost]);
        assert_eq!(detection.snapshot.latest_post_id(), Some("6"));
    }

    #[rstest]
    #[case(PostKind::Video, EventKind::NewVideoPost)]
    #[case(PostKind::Plain, EventKind::NewPost)]
    #[case(PostKind::Repost, EventKind::NewPost)]
    fn test_post_kind_selects_event(#[case] kind: PostKind, #[case] expected: EventKind) {
        let now = Utc::now();
        let prior = PriorSnapshot::Present(offline(now, Some("100")));
        let mut fresh = offline(now, None);
        fresh.latest_post = Some(post("101", kind));

        let detection = detect(&prior, fresh, now, &hourly());
        assert_eq!(kinds(&detection), vec![expected]);
    }

    #[test]
    fn test_first_post_after_none_is_reported() {
        let now = Utc::now();
        let prior = PriorSnapshot::Present(offline(now, None));
        let detection = detect(&prior, offline(now, Some("1")), now, &hourly());
        assert_eq!(kinds(&detection), vec![EventKind::NewPost]);
    }

    #[test]
    fn test_missing_post_keeps_prior() {
        let now = Utc::now();
        let prior = PriorSnapshot::Present(offline(now, Some("9")));
        let detection = detect(&prior, offline(now, None), now, &hourly());
        assert!(detection.is_empty());
        assert_eq!(detection.snapshot.latest_post_id(), Some("9"));
    }

    #[test]
    fn test_live_started_resets_peak() {
        let now = Utc::now();
        let mut before = offline(now - TimeDelta::minutes(1), None);
        before.peak_viewers = 999;
        let prior = PriorSnapshot::Present(before);

        let detection = detect(&prior, online(now, 10), now, &hourly());
        assert_eq!(kinds(&detection), vec![EventKind::LiveStarted]);
        assert_eq!(detection.snapshot.live_session_start, Some(now));
        assert_eq!(detection.snapshot.peak_viewers, 10);
    }

    #[test]
    fn test_post_events_precede_live_events() {
        let now = Utc::now();
        let prior = PriorSnapshot::Present(offline(now, Some("1")));
        let mut fresh = online(now, 5);
        fresh.latest_post = Some(post("2", PostKind::Plain));

        let detection = detect(&prior, fresh, now, &hourly());
        assert_eq!(
            kinds(&detection),
            vec![EventKind::NewPost, EventKind::LiveStarted]
        );
    }

    #[test]
    fn test_peak_never_decreases_while_live() {
        let start = Utc::now();
        let mut prior = PriorSnapshot::Absent;
        let mut peaks = Vec::new();
        for (i, viewers) in [50u64, 80, 30, 120, 60].into_iter().enumerate() {
            let now = start + TimeDelta::seconds(30 * i as i64);
            let detection = detect(&prior, online(now, viewers), now, &hourly());
            peaks.push(detection.snapshot.peak_viewers);
            prior = PriorSnapshot::Present(detection.snapshot);
        }
        assert_eq!(peaks, vec![50, 80, 80, 120, 120]);
    }

    #[test]
    fn test_hourly_tick_reports_stored_peak() {
        let now = Utc::now();
        let start = now - TimeDelta::minutes(90);
        let mut before = online(now - TimeDelta::seconds(30), 140);
        before.live_session_start = Some(start);
        before.peak_viewers = 150;
        before.hourly_ticks = ticked(now - TimeDelta::minutes(61));
        let prior = PriorSnapshot::Present(before);

        let detection = detect(&prior, online(now, 120), now, &hourly());
        assert_eq!(detection.events.len(), 1);
        match &detection.events[0] {
            Event::LiveHourlyTick {
                viewers,
                peak_viewers,
                duration_secs,
                bindings,
                ..
            } => {
                assert_eq!(*viewers, 120);
                assert_eq!(*peak_viewers, 150);
                assert_eq!(*duration_secs, 90 * 60);
                assert_eq!(bindings, &vec!["b1".to_string()]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(detection.snapshot.hourly_ticks, ticked(now));
        assert_eq!(detection.snapshot.live_session_start, Some(start));
    }

    #[test]
    fn test_no_tick_before_interval() {
        let now = Utc::now();
        let mut before = online(now, 10);
        before.live_session_start = Some(now - TimeDelta::minutes(20));
        before.hourly_ticks = ticked(now - TimeDelta::minutes(20));
        let ticks = before.hourly_ticks.clone();
        let prior = PriorSnapshot::Present(before);

        let detection = detect(&prior, online(now, 10), now, &hourly());
        assert!(detection.is_empty());
        assert_eq!(detection.snapshot.hourly_ticks, ticks);
    }

    #[test]
    fn test_live_ended_reports_duration_and_peak() {
        let now = Utc::now();
        let start = now - TimeDelta::seconds(3723);
        let mut before = online(now - TimeDelta::seconds(30), 70);
        before.live_session_start = Some(start);
        before.peak_viewers = 200;
        let prior = PriorSnapshot::Present(before);

        let detection = detect(&prior, offline(now, None), now, &hourly());
        assert_eq!(
            detection.events,
            vec![Event::LiveEnded {
                title: "Stream".to_string(),
                url: "https://live.example.com/1".to_string(),
                duration_secs: 3723,
                peak_viewers: 200,
            }]
        );
        assert_eq!(detection.snapshot.live_session_start, None);
        assert_eq!(detection.snapshot.peak_viewers, 0);
        assert!(detection.snapshot.hourly_ticks.is_empty());
    }

    #[test]
    fn test_identical_inputs_are_idempotent() {
        let now = Utc::now();
        let prior = PriorSnapshot::Present(offline(now, Some("5")));
        let first = detect(&prior, offline(now, Some("6")), now, &hourly());
        assert_eq!(first.events.len(), 1);

        let prior = PriorSnapshot::Present(first.snapshot);
        let second = detect(&prior, offline(now, Some("6")), now, &hourly());
        assert!(second.is_empty());
    }

    #[test]
    fn test_hourly_cadence_is_per_binding() {
        let start = Utc::now();
        let cadences = vec![
            HourlyCadence::new("hourly", HOUR),
            HourlyCadence::new("half", Duration::from_secs(30 * 60)),
        ];

        let mut prior = PriorSnapshot::Absent;
        let mut due = Vec::new();
        for minutes in (0..=120).step_by(15) {
            let now = start + TimeDelta::minutes(minutes);
            let detection = detect(&prior, online(now, 10), now, &cadences);
            for event in &detection.events {
                if let Event::LiveHourlyTick { bindings, .. } = event {
                    due.push((minutes, bindings.clone()));
                }
            }
            prior = PriorSnapshot::Present(detection.snapshot);
        }

        let half = vec!["half".to_string()];
        let both = vec!["hourly".to_string(), "half".to_string()];
        assert_eq!(
            due,
            vec![(30, half.clone()), (60, both.clone()), (90, half), (120, both)]
        );
    }

    #[test]
    fn test_binding_subscribed_mid_session_starts_its_cadence() {
        let now = Utc::now();
        let mut before = online(now - TimeDelta::seconds(30), 10);
        before.live_session_start = Some(now - TimeDelta::hours(3));
        let prior = PriorSnapshot::Present(before);

        let detection = detect(&prior, online(now, 10), now, &hourly());
        assert!(detection.is_empty());
        assert_eq!(detection.snapshot.hourly_ticks, ticked(now));
    }

    #[test]
    fn test_unsubscribed_bindings_lose_their_ticks() {
        let now = Utc::now();
        let mut before = online(now - TimeDelta::seconds(30), 10);
        before.live_session_start = Some(now - TimeDelta::hours(2));
        before.hourly_ticks = ticked(now - TimeDelta::hours(2));
        let prior = PriorSnapshot::Present(before);

        let detection = detect(&prior, online(now, 10), now, &[]);
        assert!(detection.is_empty());
        assert!(detection.snapshot.hourly_ticks.is_empty());
    }
}
