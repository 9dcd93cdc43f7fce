//! Folds download lifecycle events into a single toolbar state.
//!
//! The aggregator is a plain state machine: every handler mutates the
//! in-memory view and returns the [`Effect`]s the dispatch loop must carry
//! out (icon redraws, timer changes, platform queries, page notifications).
//! Nothing here awaits; query results come back through
//! [`Aggregator::on_search_results`] whenever they land.

use std::collections::{HashMap, HashSet};

use super::{DownloadDelta, DownloadEvent, DownloadId, DownloadItem, DownloadRecord, DownloadState};
use crate::messaging::PageMessage;
use crate::platform::SearchFilter;
use crate::toolbar::IconState;

/// Why a platform query was issued; decides how its result is merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchRequest {
    /// Timer-driven drift correction against in-progress downloads
    Reconcile,
    /// Full read-through resync of the active set
    Resync,
    /// All downloads, to decide between `Finished` and `Default` once idle
    Settle,
    /// Completed downloads the user has now seen in the popup
    Acknowledge,
    /// All downloads, after an erase, to detect an emptied history
    AfterErase,
}

impl SearchRequest {
    pub fn filter(self) -> SearchFilter {
        match self {
            SearchRequest::Reconcile | SearchRequest::Resync => {
                SearchFilter::with_state(DownloadState::InProgress)
            }
            SearchRequest::Acknowledge => SearchFilter::with_state(DownloadState::Complete),
            SearchRequest::Settle | SearchRequest::AfterErase => SearchFilter::all(),
        }
    }
}

/// A query in flight, stamped with the aggregator generation it was issued at.
///
/// Downloads touched by an event after `generation` are newer than anything
/// the query can report, so its result never overrides them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchTicket {
    pub request: SearchRequest,
    pub generation: u64,
}

/// Work requested by the aggregator
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Draw(IconState),
    StartTimer,
    StopTimer,
    Search(SearchTicket),
    NotifyPages(PageMessage),
}

/// Derived view of the aggregator, computed on demand
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateState {
    pub active_count: usize,
    pub mean_progress: f64,
    pub has_unseen_completed: bool,
    /// Completed, unerased downloads the popup has not yet shown
    pub has_finished: bool,
}

impl AggregateState {
    pub fn icon_state(&self) -> IconState {
        if self.active_count > 0 {
            IconState::InProgress(self.mean_progress)
        } else if self.has_unseen_completed || self.has_finished {
            IconState::Finished
        } else {
            IconState::Default
        }
    }
}

/// In-memory download state for one background process.
///
/// Constructed once at startup and kept for the life of the process.
#[derive(Debug, Default)]
pub struct Aggregator {
    active: HashMap<DownloadId, DownloadRecord>,
    unseen: Vec<DownloadId>,
    finished: HashSet<DownloadId>,
    acknowledged: HashSet<DownloadId>,
    popup_open: bool,
    timer_running: bool,
    generation: u64,
    /// Generation of the latest event per download
    touched: HashMap<DownloadId, u64>,
    /// Generations of queries whose result has not come back yet
    outstanding: Vec<u64>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: DownloadEvent) -> Vec<Effect> {
        match event {
            DownloadEvent::Created(item) => self.on_created(&item),
            DownloadEvent::Changed(delta) => self.on_changed(&delta),
            DownloadEvent::Erased { id } => self.on_erased(id),
        }
    }

    pub fn on_created(&mut self, item: &DownloadItem) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.touch(item.id);
        match item.state_or_default() {
            DownloadState::InProgress => {
                tracing::debug!("Download {} created", item.id);
                self.active.insert(item.id, DownloadRecord::from_item(item));
            }
            DownloadState::Complete => {
                tracing::debug!("Download {} created already complete", item.id);
                self.record_completion(item.id);
            }
            DownloadState::Interrupted => {
                tracing::debug!("Download {} created interrupted, not tracked", item.id);
            }
        }
        self.finish(&mut effects, true);
        effects
    }

    pub fn on_changed(&mut self, delta: &DownloadDelta) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut redraw = false;
        let id = delta.id;
        self.touch(id);

        match delta.new_state() {
            Some(DownloadState::Complete) => {
                tracing::debug!("Download {} completed", id);
                self.active.remove(&id);
                self.record_completion(id);
                redraw = true;
            }
            Some(DownloadState::Interrupted) => {
                tracing::debug!("Download {} interrupted", id);
                redraw |= self.active.remove(&id).is_some();
            }
            Some(DownloadState::InProgress) => {
                self.active
                    .entry(id)
                    .or_insert_with(|| DownloadRecord::placeholder(id));
                redraw = true;
            }
            None => {}
        }

        let terminal = matches!(
            delta.new_state(),
            Some(DownloadState::Complete | DownloadState::Interrupted)
        );

        if !terminal {
            let received = delta.bytes_received.as_ref().and_then(|c| c.current);
            let total = delta.total_bytes.as_ref().and_then(|c| c.current);
            if received.is_some() || total.is_some() {
                let record = self
                    .active
                    .entry(id)
                    .or_insert_with(|| DownloadRecord::placeholder(id));
                if let Some(received) = received {
                    record.set_bytes_received(received);
                }
                if let Some(total) = total {
                    record.set_total_bytes(total);
                }
                redraw = true;
            }

            if let Some(paused) = delta.paused.as_ref().and_then(|c| c.current) {
                if let Some(record) = self.active.get_mut(&id) {
                    record.paused = paused;
                }
            }
        }

        // Danger only affects popup styling, never the toolbar glyph.
        if let Some(danger) = delta.danger.as_ref().and_then(|c| c.current) {
            if let Some(record) = self.active.get_mut(&id) {
                record.danger = danger;
            }
        }

        if delta.resolves_filename() {
            tracing::debug!("Download {} resolved its filename", id);
            effects.push(Effect::NotifyPages(PageMessage::ShowGizmo));
        }

        self.finish(&mut effects, redraw);
        effects
    }

    pub fn on_erased(&mut self, id: DownloadId) -> Vec<Effect> {
        tracing::debug!("Download {} erased", id);
        self.touch(id);
        self.active.remove(&id);
        self.unseen.retain(|unseen| *unseen != id);
        self.finished.remove(&id);
        self.acknowledged.remove(&id);

        let mut effects = Vec::new();
        self.finish(&mut effects, true);
        effects.push(self.search(SearchRequest::AfterErase));
        effects
    }

    /// Timer tick: redraw from local state and ask the platform for the truth
    pub fn reconcile(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.finish(&mut effects, true);
        if !self.active.is_empty() {
            effects.push(self.search(SearchRequest::Reconcile));
        }
        effects
    }

    /// Read-through resync of the whole active set
    pub fn refresh(&mut self) -> Vec<Effect> {
        vec![self.search(SearchRequest::Resync)]
    }

    pub fn popup_opened(&mut self) -> Vec<Effect> {
        tracing::debug!(
            "Popup opened, clearing {} unseen completion(s)",
            self.unseen.len()
        );
        self.popup_open = true;
        self.unseen.clear();
        self.acknowledged.extend(self.finished.drain());

        let mut effects = Vec::new();
        self.finish(&mut effects, true);
        effects.push(self.search(SearchRequest::Acknowledge));
        effects.push(self.search(SearchRequest::Resync));
        effects.push(Effect::NotifyPages(PageMessage::InvalidateGizmo));
        effects
    }

    pub fn popup_closed(&mut self) -> Vec<Effect> {
        tracing::debug!("Popup closed");
        self.popup_open = false;
        self.refresh()
    }

    /// Merge a query result. Downloads touched since the query was issued
    /// keep their local state.
    pub fn on_search_results(
        &mut self,
        ticket: SearchTicket,
        items: &[DownloadItem],
    ) -> Vec<Effect> {
        let effects = self.merge_results(ticket, items);
        self.retire(ticket);
        effects
    }

    /// A query that never produced a result; local state stays as it was.
    pub fn on_search_failed(&mut self, ticket: SearchTicket) {
        self.retire(ticket);
    }

    fn merge_results(&mut self, ticket: SearchTicket, items: &[DownloadItem]) -> Vec<Effect> {
        let since = ticket.generation;
        let items: Vec<&DownloadItem> = items
            .iter()
            .filter(|item| !self.is_newer(item.id, since))
            .collect();

        let mut effects = Vec::new();
        match ticket.request {
            SearchRequest::Reconcile => {
                let in_progress: Vec<&DownloadItem> = items
                    .iter()
                    .copied()
                    .filter(|item| item.state_or_default() == DownloadState::InProgress)
                    .collect();
                let has_stale_local = self.active.keys().any(|id| !self.is_newer(*id, since));
                if in_progress.is_empty() && has_stale_local {
                    tracing::debug!("Platform reports no active downloads, resyncing");
                    return self.refresh();
                }
                let authoritative: HashSet<DownloadId> =
                    in_progress.iter().map(|item| item.id).collect();
                let touched = &self.touched;
                self.active.retain(|id, _| {
                    authoritative.contains(id) || touched.get(id).is_some_and(|g| *g > since)
                });
                for item in in_progress {
                    self.active
                        .entry(item.id)
                        .and_modify(|record| record.merge_item(item))
                        .or_insert_with(|| DownloadRecord::from_item(item));
                }
                self.finish(&mut effects, true);
            }
            SearchRequest::Resync => {
                let touched = &self.touched;
                self.active
                    .retain(|id, _| touched.get(id).is_some_and(|g| *g > since));
                for item in items {
                    if item.state_or_default() == DownloadState::InProgress {
                        self.active.insert(item.id, DownloadRecord::from_item(item));
                    }
                }
                if self.active.is_empty() {
                    self.sync_timer(&mut effects);
                    effects.push(self.search(SearchRequest::Settle));
                } else {
                    self.finish(&mut effects, true);
                }
            }
            SearchRequest::Settle => {
                let present: HashSet<DownloadId> = items.iter().map(|item| item.id).collect();
                let touched = &self.touched;
                let keep = |id: &DownloadId| {
                    present.contains(id) || touched.get(id).is_some_and(|g| *g > since)
                };
                self.finished.retain(|id| keep(id));
                self.acknowledged.retain(|id| keep(id));
                for item in items {
                    if item.state_or_default() == DownloadState::Complete
                        && !self.acknowledged.contains(&item.id)
                    {
                        if self.popup_open {
                            self.acknowledged.insert(item.id);
                        } else {
                            self.finished.insert(item.id);
                        }
                    }
                }
                self.finish(&mut effects, true);
            }
            SearchRequest::Acknowledge => {
                for item in items {
                    self.acknowledged.insert(item.id);
                    self.finished.remove(&item.id);
                }
                self.finish(&mut effects, true);
            }
            SearchRequest::AfterErase => {
                if items.is_empty() {
                    tracing::debug!("Download history is empty, resetting toolbar");
                    let touched = &self.touched;
                    let newer = |id: &DownloadId| touched.get(id).is_some_and(|g| *g > since);
                    self.active.retain(|id, _| newer(id));
                    self.unseen.retain(|id| newer(id));
                    self.finished.retain(|id| newer(id));
                    self.acknowledged.retain(|id| newer(id));
                    self.finish(&mut effects, true);
                } else {
                    return self.refresh();
                }
            }
        }
        effects
    }

    pub fn aggregate(&self) -> AggregateState {
        let active_count = self.active.len();
        let mean_progress = if active_count == 0 {
            0.0
        } else {
            let total: f64 = self.active.values().map(|record| record.progress).sum();
            (total / active_count as f64).clamp(0.0, 1.0)
        };
        AggregateState {
            active_count,
            mean_progress,
            has_unseen_completed: !self.unseen.is_empty(),
            has_finished: !self.finished.is_empty(),
        }
    }

    pub fn icon_state(&self) -> IconState {
        self.aggregate().icon_state()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn record(&self, id: DownloadId) -> Option<&DownloadRecord> {
        self.active.get(&id)
    }

    pub fn unseen(&self) -> &[DownloadId] {
        &self.unseen
    }

    pub fn is_popup_open(&self) -> bool {
        self.popup_open
    }

    pub fn timer_running(&self) -> bool {
        self.timer_running
    }

    /// True when any active download is flagged dangerous and not yet accepted
    pub fn has_dangerous(&self) -> bool {
        self.active.values().any(|record| record.danger.is_dangerous())
    }

    fn touch(&mut self, id: DownloadId) {
        self.generation += 1;
        // Only queries already in flight can be older than this event.
        if !self.outstanding.is_empty() {
            self.touched.insert(id, self.generation);
        }
    }

    fn is_newer(&self, id: DownloadId, since: u64) -> bool {
        self.touched.get(&id).is_some_and(|generation| *generation > since)
    }

    fn search(&mut self, request: SearchRequest) -> Effect {
        self.outstanding.push(self.generation);
        Effect::Search(SearchTicket {
            request,
            generation: self.generation,
        })
    }

    /// Forget a finished query and every touch no remaining query can be older than
    fn retire(&mut self, ticket: SearchTicket) {
        if let Some(pos) = self
            .outstanding
            .iter()
            .position(|generation| *generation == ticket.generation)
        {
            self.outstanding.swap_remove(pos);
        }
        match self.outstanding.iter().min().copied() {
            Some(oldest) => self.touched.retain(|_, generation| *generation > oldest),
            None => self.touched.clear(),
        }
    }

    fn record_completion(&mut self, id: DownloadId) {
        if self.popup_open {
            self.acknowledged.insert(id);
        } else {
            if !self.unseen.contains(&id) {
                self.unseen.push(id);
            }
            self.finished.insert(id);
        }
    }

    fn sync_timer(&mut self, effects: &mut Vec<Effect>) {
        let wants_timer = !self.active.is_empty();
        if wants_timer && !self.timer_running {
            self.timer_running = true;
            effects.push(Effect::StartTimer);
        } else if !wants_timer && self.timer_running {
            self.timer_running = false;
            effects.push(Effect::StopTimer);
        }
    }

    fn finish(&mut self, effects: &mut Vec<Effect>, redraw: bool) {
        self.sync_timer(effects);
        if redraw {
            effects.push(Effect::Draw(self.icon_state()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloads::{DangerType, FieldChange};

    fn created(id: DownloadId, received: i64, total: i64) -> DownloadItem {
        DownloadItem {
            id,
            bytes_received: Some(received),
            total_bytes: Some(total),
            state: Some(DownloadState::InProgress),
            ..Default::default()
        }
    }

    fn progress(id: DownloadId, received: i64) -> DownloadDelta {
        DownloadDelta {
            id,
            bytes_received: Some(FieldChange::to(received)),
            ..Default::default()
        }
    }

    fn completed(id: DownloadId) -> DownloadDelta {
        DownloadDelta {
            id,
            state: Some(FieldChange::between(
                DownloadState::InProgress,
                DownloadState::Complete,
            )),
            ..Default::default()
        }
    }

    fn item_with_state(id: DownloadId, state: DownloadState) -> DownloadItem {
        DownloadItem {
            id,
            state: Some(state),
            ..Default::default()
        }
    }

    fn last_draw(effects: &[Effect]) -> Option<IconState> {
        effects.iter().rev().find_map(|effect| match effect {
            Effect::Draw(state) => Some(*state),
            _ => None,
        })
    }

    fn count(effects: &[Effect], wanted: &Effect) -> usize {
        effects.iter().filter(|effect| *effect == wanted).count()
    }

    fn searches(effects: &[Effect]) -> Vec<SearchRequest> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Search(ticket) => Some(ticket.request),
                _ => None,
            })
            .collect()
    }

    fn issued(effects: &[Effect], request: SearchRequest) -> SearchTicket {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Search(ticket) if ticket.request == request => Some(*ticket),
                _ => None,
            })
            .unwrap()
    }

    fn fresh(agg: &Aggregator, request: SearchRequest) -> SearchTicket {
        SearchTicket {
            request,
            generation: agg.generation,
        }
    }

    #[test]
    fn single_download_walks_through_every_icon_state() {
        let mut agg = Aggregator::new();

        let effects = agg.on_created(&created(1, 0, 1000));
        assert_eq!(last_draw(&effects), Some(IconState::InProgress(0.0)));
        assert_eq!(count(&effects, &Effect::StartTimer), 1);

        let effects = agg.on_changed(&progress(1, 500));
        assert_eq!(last_draw(&effects), Some(IconState::InProgress(0.5)));

        let effects = agg.on_changed(&completed(1));
        assert_eq!(agg.active_count(), 0);
        assert_eq!(agg.unseen(), &[1]);
        assert_eq!(last_draw(&effects), Some(IconState::Finished));
        assert_eq!(count(&effects, &Effect::StopTimer), 1);

        let opened = agg.popup_opened();
        assert!(agg.unseen().is_empty());
        assert_eq!(last_draw(&opened), Some(IconState::Default));

        // The popup's own queries confirm: nothing in progress, A complete but seen.
        agg.on_search_results(
            issued(&opened, SearchRequest::Acknowledge),
            &[item_with_state(1, DownloadState::Complete)],
        );
        let effects = agg.on_search_results(issued(&opened, SearchRequest::Resync), &[]);
        assert_eq!(effects.len(), 1);
        assert_eq!(searches(&effects), vec![SearchRequest::Settle]);
        let effects = agg.on_search_results(
            issued(&effects, SearchRequest::Settle),
            &[item_with_state(1, DownloadState::Complete)],
        );
        assert_eq!(last_draw(&effects), Some(IconState::Default));
    }

    #[test]
    fn aggregate_progress_is_unweighted_mean() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 10));
        agg.on_created(&created(2, 0, 10_000));

        let effects = agg.on_changed(&progress(1, 10));
        assert_eq!(agg.aggregate().mean_progress, 0.5);
        assert_eq!(last_draw(&effects), Some(IconState::InProgress(0.5)));
    }

    #[test]
    fn completion_while_popup_open_is_not_unseen() {
        let mut agg = Aggregator::new();
        agg.popup_opened();
        agg.on_created(&created(1, 0, 100));

        let effects = agg.on_changed(&completed(1));
        assert!(agg.unseen().is_empty());
        assert_eq!(last_draw(&effects), Some(IconState::Default));

        agg.popup_closed();
        let effects = agg.on_search_results(
            fresh(&agg, SearchRequest::Settle),
            &[item_with_state(1, DownloadState::Complete)],
        );
        assert_eq!(last_draw(&effects), Some(IconState::Default));
    }

    #[test]
    fn popup_clears_every_queued_completion() {
        let mut agg = Aggregator::new();
        for id in 1..=5 {
            agg.on_created(&created(id, 0, 10));
            agg.on_changed(&completed(id));
        }
        assert_eq!(agg.unseen().len(), 5);
        assert_eq!(agg.icon_state(), IconState::Finished);

        agg.popup_opened();
        assert!(agg.unseen().is_empty());
        assert_eq!(agg.icon_state(), IconState::Default);
    }

    #[test]
    fn timer_restarts_exactly_once_after_stop() {
        let mut agg = Aggregator::new();
        let mut all = agg.on_created(&created(1, 0, 10));
        all.extend(agg.on_created(&created(2, 0, 10)));
        all.extend(agg.on_changed(&progress(2, 5)));
        assert_eq!(count(&all, &Effect::StartTimer), 1);

        let mut all = agg.on_changed(&completed(1));
        all.extend(agg.on_changed(&completed(2)));
        assert_eq!(count(&all, &Effect::StopTimer), 1);
        assert!(!agg.timer_running());

        let mut all = agg.on_created(&created(3, 0, 10));
        all.extend(agg.on_created(&created(4, 0, 10)));
        assert_eq!(count(&all, &Effect::StartTimer), 1);
        assert!(agg.timer_running());
    }

    #[test]
    fn change_for_unknown_id_inserts_on_demand() {
        let mut agg = Aggregator::new();
        let delta = DownloadDelta {
            id: 42,
            bytes_received: Some(FieldChange::to(25)),
            total_bytes: Some(FieldChange::to(100)),
            ..Default::default()
        };
        let effects = agg.on_changed(&delta);
        assert_eq!(agg.active_count(), 1);
        assert_eq!(agg.record(42).map(|r| r.progress), Some(0.25));
        assert_eq!(count(&effects, &Effect::StartTimer), 1);
    }

    #[test]
    fn completion_delta_with_bytes_does_not_reinsert() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        let mut delta = completed(1);
        delta.bytes_received = Some(FieldChange::to(100));
        agg.on_changed(&delta);
        assert_eq!(agg.active_count(), 0);
    }

    #[test]
    fn interrupted_download_leaves_without_badge() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        let delta = DownloadDelta {
            id: 1,
            state: Some(FieldChange::to(DownloadState::Interrupted)),
            ..Default::default()
        };
        let effects = agg.on_changed(&delta);
        assert!(agg.unseen().is_empty());
        assert_eq!(last_draw(&effects), Some(IconState::Default));
    }

    #[test]
    fn danger_change_updates_record_without_redraw() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        let delta = DownloadDelta {
            id: 1,
            danger: Some(FieldChange::to(DangerType::Other)),
            ..Default::default()
        };
        let effects = agg.on_changed(&delta);
        assert!(last_draw(&effects).is_none());
        assert!(agg.has_dangerous());
        assert_eq!(agg.icon_state(), IconState::InProgress(0.0));
    }

    #[test]
    fn filename_resolution_triggers_gizmo() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        let delta = DownloadDelta {
            id: 1,
            filename: Some(FieldChange::between(String::new(), "/dl/file.iso".to_string())),
            ..Default::default()
        };
        let effects = agg.on_changed(&delta);
        assert_eq!(
            count(&effects, &Effect::NotifyPages(PageMessage::ShowGizmo)),
            1
        );
    }

    #[test]
    fn reconcile_matches_authoritative_in_progress_set() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        agg.on_created(&created(2, 0, 100));

        let effects = agg.reconcile();
        assert_eq!(searches(&effects), vec![SearchRequest::Reconcile]);

        let authoritative = [
            DownloadItem {
                bytes_received: Some(80),
                ..created(2, 0, 100)
            },
            created(3, 10, 100),
        ];
        agg.on_search_results(issued(&effects, SearchRequest::Reconcile), &authoritative);
        assert_eq!(agg.active_count(), 2);
        assert!(agg.record(1).is_none());
        assert_eq!(agg.record(2).map(|r| r.progress), Some(0.8));
        assert_eq!(agg.record(3).map(|r| r.progress), Some(0.1));
    }

    #[test]
    fn reconcile_keeps_fields_missing_from_query() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        agg.on_changed(&DownloadDelta {
            id: 1,
            danger: Some(FieldChange::to(DangerType::Other)),
            ..Default::default()
        });

        let sparse = DownloadItem {
            id: 1,
            bytes_received: Some(50),
            ..Default::default()
        };
        agg.on_search_results(fresh(&agg, SearchRequest::Reconcile), &[sparse]);
        let record = agg.record(1).unwrap();
        assert_eq!(record.danger, DangerType::Other);
        assert_eq!(record.progress, 0.5);
    }

    #[test]
    fn empty_reconcile_with_local_downloads_forces_resync() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        let effects = agg.on_search_results(fresh(&agg, SearchRequest::Reconcile), &[]);
        assert_eq!(effects.len(), 1);
        assert_eq!(searches(&effects), vec![SearchRequest::Resync]);
    }

    #[test]
    fn erasing_last_download_resets_everything() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        agg.on_changed(&completed(1));
        assert_eq!(agg.icon_state(), IconState::Finished);

        let effects = agg.on_erased(1);
        assert_eq!(searches(&effects), vec![SearchRequest::AfterErase]);

        let effects = agg.on_search_results(issued(&effects, SearchRequest::AfterErase), &[]);
        assert!(agg.unseen().is_empty());
        assert!(!agg.timer_running());
        assert_eq!(last_draw(&effects), Some(IconState::Default));
    }

    #[test]
    fn erase_with_remaining_history_resyncs() {
        let mut agg = Aggregator::new();
        let effects = agg.on_search_results(
            fresh(&agg, SearchRequest::AfterErase),
            &[item_with_state(5, DownloadState::Complete)],
        );
        assert_eq!(effects.len(), 1);
        assert_eq!(searches(&effects), vec![SearchRequest::Resync]);
    }

    #[test]
    fn erasing_active_download_stops_timer() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        let effects = agg.on_erased(1);
        assert!(effects.contains(&Effect::StopTimer));
        assert!(!agg.timer_running());
    }

    #[test]
    fn settle_reports_completed_history_as_finished() {
        let mut agg = Aggregator::new();
        let effects = agg.on_search_results(
            fresh(&agg, SearchRequest::Settle),
            &[
                item_with_state(1, DownloadState::Complete),
                item_with_state(2, DownloadState::Interrupted),
            ],
        );
        assert_eq!(last_draw(&effects), Some(IconState::Finished));
    }

    #[test]
    fn resync_replaces_active_set_and_starts_timer() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(9, 0, 100));
        let effects = agg.on_search_results(
            fresh(&agg, SearchRequest::Resync),
            &[created(1, 25, 100), created(2, 75, 100)],
        );
        assert!(agg.record(9).is_none());
        assert_eq!(agg.active_count(), 2);
        assert_eq!(last_draw(&effects), Some(IconState::InProgress(0.5)));
        assert!(agg.timer_running());
    }

    #[test]
    fn late_resync_keeps_download_created_after_it_was_issued() {
        let mut agg = Aggregator::new();
        let opened = agg.popup_opened();
        agg.on_created(&created(2, 0, 100));

        let effects = agg.on_search_results(issued(&opened, SearchRequest::Resync), &[]);
        assert_eq!(agg.active_count(), 1);
        assert!(agg.timer_running());
        assert_eq!(count(&effects, &Effect::StopTimer), 0);
        assert!(searches(&effects).is_empty());
        assert_eq!(last_draw(&effects), Some(IconState::InProgress(0.0)));
    }

    #[test]
    fn late_reconcile_keeps_download_created_after_it_was_issued() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        let tick = agg.reconcile();
        agg.on_created(&created(2, 0, 100));

        agg.on_search_results(
            issued(&tick, SearchRequest::Reconcile),
            &[created(1, 50, 100)],
        );
        assert_eq!(agg.active_count(), 2);
        assert_eq!(agg.record(1).map(|r| r.progress), Some(0.5));
        assert!(agg.record(2).is_some());
    }

    #[test]
    fn late_reconcile_does_not_revive_completed_download() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        let tick = agg.reconcile();
        agg.on_changed(&completed(1));

        let effects = agg.on_search_results(
            issued(&tick, SearchRequest::Reconcile),
            &[created(1, 90, 100)],
        );
        assert_eq!(agg.active_count(), 0);
        assert!(!agg.timer_running());
        assert_eq!(last_draw(&effects), Some(IconState::Finished));
    }

    #[test]
    fn late_erase_result_keeps_newer_downloads() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        let erased = agg.on_erased(1);
        agg.on_created(&created(2, 0, 100));

        agg.on_search_results(issued(&erased, SearchRequest::AfterErase), &[]);
        assert_eq!(agg.active_count(), 1);
        assert!(agg.record(2).is_some());
    }

    #[test]
    fn touches_are_forgotten_once_no_query_is_outstanding() {
        let mut agg = Aggregator::new();
        agg.on_created(&created(1, 0, 100));
        let tick = agg.reconcile();
        agg.on_changed(&progress(1, 10));
        assert!(!agg.touched.is_empty());

        agg.on_search_failed(issued(&tick, SearchRequest::Reconcile));
        assert!(agg.touched.is_empty());
        assert!(agg.outstanding.is_empty());
    }

    #[test]
    fn erasing_unseen_completion_clears_badge() {
        let mut agg = Aggregator::new();
        agg.on_created(&item_with_state(2, DownloadState::Complete));
        agg.popup_opened();
        agg.popup_closed();
        agg.on_created(&created(1, 0, 100));
        agg.on_changed(&completed(1));
        assert_eq!(agg.icon_state(), IconState::Finished);

        let effects = agg.on_erased(1);
        assert!(agg.unseen().is_empty());
        assert_eq!(last_draw(&effects), Some(IconState::Default));
    }

    #[test]
    fn created_with_bytes_reports_their_progress() {
        let mut agg = Aggregator::new();
        let effects = agg.on_created(&created(1, 25, 100));
        assert_eq!(agg.record(1).map(|r| r.progress), Some(0.25));
        assert_eq!(last_draw(&effects), Some(IconState::InProgress(0.25)));
    }

    #[test]
    fn icon_state_is_default_only_when_idle_and_clear() {
        let idle = AggregateState {
            active_count: 0,
            mean_progress: 0.0,
            has_unseen_completed: false,
            has_finished: false,
        };
        assert_eq!(idle.icon_state(), IconState::Default);
        assert_eq!(
            AggregateState {
                has_finished: true,
                ..idle
            }
            .icon_state(),
            IconState::Finished
        );
        assert_eq!(
            AggregateState {
                has_unseen_completed: true,
                ..idle
            }
            .icon_state(),
            IconState::Finished
        );
        assert_eq!(
            AggregateState {
                active_count: 2,
                mean_progress: 0.25,
                has_unseen_completed: true,
                has_finished: true,
            }
            .icon_state(),
            IconState::InProgress(0.25)
        );
    }
}
