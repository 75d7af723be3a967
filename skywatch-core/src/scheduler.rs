//! The scheduler loop (C10): the single operator task that drives every
//! telescope through its duty cycle and reacts to alert notifications.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use tokio::sync::Notify;

use crate::alerts::AlertBuffer;
use crate::astro::TwilightKind;
use crate::model::TargetSet;
use crate::store::EventStore;
use crate::telescope::{EnclosureState, ExposureRequest, TelescopeClient};
use crate::visibility;

const FOCUS_INTERVAL_SECS: i64 = 21_600;
const FLAT_INTERVAL_SECS: i64 = 7_200;
const IDLE_POLL: Duration = Duration::from_secs(60);
const ACTIVE_POLL: Duration = Duration::from_secs(15);
const OFF_HOURS_POLL: Duration = Duration::from_secs(300);

const DEFAULT_EXPOSURE_SECS: f64 = 60.0;
const DEFAULT_GAIN: f64 = 100.0;
const DEFAULT_OFFSET: f64 = 10.0;

/// Per-telescope dispatch queue: the split target sets awaiting execution,
/// ordered so the longest queued set is dispatched first (the tail, in
/// spec terms).
#[derive(Debug, Default)]
struct Dispatch {
    sets: VecDeque<TargetSet>,
}

impl Dispatch {
    fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// True iff the cached tail's targets are all still in `filtered`.
    fn tail_still_valid(&self, filtered: &TargetSet) -> bool {
        match self.sets.back() {
            None => false,
            Some(tail) => {
                let filtered_tail: TargetSet = tail
                    .iter()
                    .filter(|t| filtered.iter().any(|f| f.name == t.name))
                    .cloned()
                    .collect();
                filtered_tail.len() == tail.len()
            }
        }
    }
}

/// Site location and operating parameters shared across the loop.
#[derive(Debug, Clone, Copy)]
pub struct SiteParams {
    pub lat_rad: f64,
    pub lon_rad: f64,
    pub max_airmass: f64,
}

/// One telescope's full runtime context: its HTTP client, last-seen
/// bookkeeping, and dispatch queue.
struct TelescopeRuntime {
    name: String,
    client: TelescopeClient,
    dispatch: Dispatch,
}

/// Everything the operator loop needs: the fleet, the shared stores, and
/// the shutdown/notification signals.
pub struct Operator {
    telescopes: Vec<TelescopeRuntime>,
    host_targets: TargetSet,
    event_store: Arc<EventStore>,
    alert_buffer: Arc<AlertBuffer>,
    site: SiteParams,
    wake: Arc<Notify>,
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("telescope_count", &self.telescopes.len())
            .field("host_targets", &self.host_targets.len())
            .finish()
    }
}

impl Operator {
    pub fn new(
        telescopes: Vec<(String, TelescopeClient)>,
        host_targets: TargetSet,
        event_store: Arc<EventStore>,
        alert_buffer: Arc<AlertBuffer>,
        site: SiteParams,
        wake: Arc<Notify>,
    ) -> Self {
        let telescopes = telescopes
            .into_iter()
            .map(|(name, client)| TelescopeRuntime {
                name,
                client,
                dispatch: Dispatch::default(),
            })
            .collect();
        Self {
            telescopes,
            host_targets,
            event_store,
            alert_buffer,
            site,
            wake,
        }
    }

    /// Runs the main cycle until `keep_going` observes `false`. The caller
    /// is expected to flip the shared flag from a signal handler and notify
    /// `wake` so the loop observes the change promptly.
    pub async fn run(&mut self, keep_going: Arc<std::sync::atomic::AtomicBool>) {
        use std::sync::atomic::Ordering;

        while keep_going.load(Ordering::SeqCst) {
            if !crate::astro::is_twilight(self.site.lat_rad, self.site.lon_rad, TwilightKind::Civil) {
                tokio::time::timeout(OFF_HOURS_POLL, self.wake.notified()).await.ok();
                continue;
            }

            let mut any_active = false;
            let n = self.telescopes.len();
            for i in 0..n {
                if self.run_telescope_cycle(i).await {
                    any_active = true;
                }
            }

            let poll = if any_active { ACTIVE_POLL } else { IDLE_POLL };
            tokio::time::timeout(poll, self.wake.notified()).await.ok();

            if let Some(schedule) = self.alert_buffer.take().await {
                self.handle_notification(schedule).await;
            }
        }
        self.stop_all_controllers().await;
    }

    /// Runs one telescope through a single cycle step. Returns `true` if
    /// this telescope was marked active this cycle.
    async fn run_telescope_cycle(&mut self, index: usize) -> bool {
        let name = self.telescopes[index].name.clone();
        let state = match self.telescopes[index].client.state().await {
            Some(s) => s,
            None => {
                tracing::warn!(telescope = %name, "state unavailable, skipping this cycle");
                return false;
            }
        };

        match state.enclosure {
            EnclosureState::Closed => {
                self.telescopes[index].client.open_enclosure().await;
                return false;
            }
            EnclosureState::Opening | EnclosureState::Closing => return false,
            EnclosureState::Opened => {
                if !state.running {
                    self.telescopes[index].client.reset().await;
                    self.telescopes[index].client.start().await;
                }
            }
        }

        if state.queue_size > 0 {
            return true;
        }

        let now = Utc::now();
        if !crate::astro::is_twilight(self.site.lat_rad, self.site.lon_rad, TwilightKind::Astronomical) {
            if now.timestamp() - state.last_flat > FLAT_INTERVAL_SECS {
                if now.hour() < 12 {
                    self.telescopes[index].client.dawn_flats().await;
                } else {
                    self.telescopes[index].client.dusk_flats().await;
                }
            }
            return true;
        }

        if state.last_focused > now.timestamp() || now.timestamp() - state.last_focused > FOCUS_INTERVAL_SECS {
            self.telescopes[index].client.focus().await;
            return true;
        }

        let needs_regen = {
            let dispatch = &self.telescopes[index].dispatch;
            match dispatch.sets.back() {
                None => true,
                Some(tail) => {
                    let filtered = visibility::filter_default(
                        tail,
                        self.site.lat_rad,
                        self.site.lon_rad,
                        TwilightKind::Astronomical,
                        now,
                    );
                    !dispatch.tail_still_valid(&filtered)
                }
            }
        };

        if needs_regen {
            if !self.generate_schedules(now).await {
                tracing::info!(telescope = %name, "no targets visible this cycle");
                return true;
            }
        }

        if let Some(targets) = self.telescopes[index].dispatch.sets.pop_back() {
            if let Err(err) = self.dispatch_targets(index, &targets).await {
                tracing::warn!(telescope = %name, error = %err, "dispatch failed, requeueing");
                self.telescopes[index].dispatch.sets.push_back(targets);
            }
        }

        true
    }

    async fn dispatch_targets(&self, index: usize, targets: &TargetSet) -> crate::error::Result<()> {
        let client = &self.telescopes[index].client;
        for target in targets {
            if !client.point(target.ra_deg, target.dec_deg).await {
                return Err(crate::error::SchedulerError::Internal(format!(
                    "point failed for target {}",
                    target.name
                )));
            }
            let request = ExposureRequest {
                exposure: DEFAULT_EXPOSURE_SECS,
                gain: DEFAULT_GAIN,
                offset: DEFAULT_OFFSET,
                frame_type: "Light".into(),
                object_name: target.name.clone(),
                ra: target.ra_deg,
                dec: target.dec_deg,
            };
            if !client.exposure(&request).await {
                return Err(crate::error::SchedulerError::Internal(format!(
                    "exposure failed for target {}",
                    target.name
                )));
            }
        }
        Ok(())
    }

    /// Fast preemption path: resets every controller, folds the pending
    /// alert into the durable store, and invalidates every cached dispatch.
    async fn handle_notification(&mut self, schedule: crate::model::Schedule) {
        for telescope in &mut self.telescopes {
            telescope.client.reset().await;
            telescope.dispatch.sets.clear();
        }
        if let Err(err) = self.event_store.add(schedule, Utc::now()).await {
            tracing::error!(error = %err, "failed to persist incoming alert schedule");
        }
    }

    /// Picks a source target set (highest-priority visible event, else the
    /// visibility-filtered host schedule) and splits it across telescopes.
    /// Returns `false` if nothing is visible.
    async fn generate_schedules(&mut self, now: chrono::DateTime<Utc>) -> bool {
        if let Err(err) = self.event_store.remove_expired(now).await {
            tracing::error!(error = %err, "failed to prune expired events");
        }

        let n = self.telescopes.len().max(1);
        let events = self.event_store.iter_by_priority().await;
        for event in events {
            let visible = visibility::filter_default(
                &event.targets,
                self.site.lat_rad,
                self.site.lon_rad,
                TwilightKind::Astronomical,
                now,
            );
            if !visible.is_empty() {
                let split = crate::cluster::separate_evenly(&visible, n);
                self.assign_dispatch(split);
                return true;
            }
        }

        let visible_host = visibility::filter_default(
            &self.host_targets,
            self.site.lat_rad,
            self.site.lon_rad,
            TwilightKind::Astronomical,
            now,
        );
        if visible_host.is_empty() {
            return false;
        }
        let split = crate::cluster::separate_by_cluster(&visible_host, n);
        self.assign_dispatch(split);
        true
    }

    fn assign_dispatch(&mut self, mut split: Vec<TargetSet>) {
        split.sort_by_key(|set| set.len());
        for telescope in self.telescopes.iter_mut() {
            let set = split.pop().unwrap_or_default();
            telescope.dispatch.sets.clear();
            telescope.dispatch.sets.push_back(set);
        }
    }

    async fn stop_all_controllers(&self) {
        for telescope in &self.telescopes {
            telescope.client.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Target;

    #[test]
    fn dispatch_tail_invalid_when_a_target_drops_out() {
        let mut dispatch = Dispatch::default();
        dispatch.sets.push_back(vec![Target::new("a", 1.0, 2.0), Target::new("b", 3.0, 4.0)]);
        let filtered = vec![Target::new("a", 1.0, 2.0)];
        assert!(!dispatch.tail_still_valid(&filtered));
    }

    #[test]
    fn dispatch_tail_valid_when_all_targets_survive() {
        let mut dispatch = Dispatch::default();
        dispatch.sets.push_back(vec![Target::new("a", 1.0, 2.0)]);
        let filtered = vec![Target::new("a", 1.0, 2.0), Target::new("c", 5.0, 6.0)];
        assert!(dispatch.tail_still_valid(&filtered));
    }

    #[test]
    fn dispatch_tail_invalid_when_empty() {
        let dispatch = Dispatch::default();
        assert!(!dispatch.tail_still_valid(&vec![Target::new("a", 1.0, 2.0)]));
    }
}
