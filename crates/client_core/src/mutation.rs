use std::{collections::HashSet, fmt, sync::Arc};

use shared::protocol::DeleteTarget;
use tracing::{debug, info, warn};

use crate::{
    cache::{Collection, QueryCache, QueryKey, Row},
    error::MutationError,
    notify::{Notice, Notifier, Subject},
    selection::{selected_rows, RowsView, SelectionState},
    source::{RemoveRows, UpdateRows},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    Pending,
    Committed,
    RolledBack,
}

/// One optimistic write against a single cache key.
///
/// `apply` swaps the new collection in and keeps the previous one as a
/// snapshot. `commit` drops the snapshot, `rollback` restores it, and both
/// finish by refetching the key so the cache converges on the data source.
pub struct OptimisticMutation<R: Row> {
    cache: Arc<QueryCache<R>>,
    key: QueryKey,
    snapshot: Option<Collection<R>>,
    state: MutationState,
}

impl<R: Row> OptimisticMutation<R> {
    pub fn new(cache: Arc<QueryCache<R>>, key: QueryKey) -> Self {
        Self {
            cache,
            key,
            snapshot: None,
            state: MutationState::Idle,
        }
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn snapshot(&self) -> Option<&Collection<R>> {
        self.snapshot.as_ref()
    }

    /// Publishes `change(current)` under the key. When the key is not
    /// cached nothing is written and there is nothing to restore later.
    pub async fn apply<F>(&mut self, change: F) -> Result<(), MutationError>
    where
        F: FnOnce(&Collection<R>) -> Collection<R> + Send,
    {
        self.expect_state("apply", MutationState::Idle)?;
        self.snapshot = self.cache.update(&self.key, change).await;
        self.state = MutationState::Pending;
        debug!(
            key = %self.key,
            cached = self.snapshot.is_some(),
            "optimistic write applied"
        );
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<(), MutationError> {
        self.expect_state("commit", MutationState::Pending)?;
        self.snapshot = None;
        self.state = MutationState::Committed;
        info!(key = %self.key, "mutation committed");
        self.settle().await;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), MutationError> {
        self.expect_state("roll back", MutationState::Pending)?;
        if let Some(snapshot) = self.snapshot.take() {
            self.cache.set(self.key.clone(), snapshot).await;
        }
        self.state = MutationState::RolledBack;
        warn!(key = %self.key, "mutation rolled back");
        self.settle().await;
        Ok(())
    }

    async fn settle(&self) {
        if let Err(error) = self.cache.invalidate(&self.key).await {
            warn!(key = %self.key, %error, "refresh after mutation failed; cached rows marked stale");
        }
    }

    fn expect_state(&self, action: &'static str, expected: MutationState) -> Result<(), MutationError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MutationError::InvalidTransition {
                action,
                state: self.state,
            })
        }
    }
}

/// Rule every selected row must pass before a removal is attempted.
pub struct Eligibility<R> {
    reason: String,
    predicate: Box<dyn Fn(&R) -> bool + Send + Sync>,
}

impl<R> Eligibility<R> {
    /// `reason` is shown when a selected row fails `predicate`.
    pub fn new(
        reason: impl Into<String>,
        predicate: impl Fn(&R) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            reason: reason.into(),
            predicate: Box::new(predicate),
        }
    }

    pub fn any() -> Self {
        Self::new(String::new(), |_| true)
    }

    pub fn allows(&self, row: &R) -> bool {
        (self.predicate)(row)
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl<R> fmt::Debug for Eligibility<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eligibility")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Input to [`MutationCoordinator::remove_selected`].
pub struct RemoveSelected<'a, R> {
    pub key: QueryKey,
    pub view: RowsView<'a, R>,
    pub selection: &'a SelectionState,
    pub disabled: bool,
    pub eligibility: &'a Eligibility<R>,
    pub subject: Subject,
}

/// Input to [`MutationCoordinator::update_rows`]. `rows` are the edited
/// versions of rows already cached under `key`.
pub struct UpdateSelected<R> {
    pub key: QueryKey,
    pub rows: Vec<R>,
    pub disabled: bool,
    pub subject: Subject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Nothing to do; the notice says why.
    Skipped(Notice),
    /// A selected row failed the eligibility rule.
    Rejected(Notice),
    Committed { count: usize },
    RolledBack,
}

/// Runs selection-driven mutations against a shared cache and reports each
/// outcome through a [`Notifier`].
pub struct MutationCoordinator<R: Row> {
    cache: Arc<QueryCache<R>>,
    notifier: Arc<dyn Notifier>,
}

impl<R: Row> MutationCoordinator<R> {
    pub fn new(cache: Arc<QueryCache<R>>, notifier: Arc<dyn Notifier>) -> Self {
        Self { cache, notifier }
    }

    pub fn cache(&self) -> &Arc<QueryCache<R>> {
        &self.cache
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Removes every selected row, all or nothing.
    ///
    /// The rows vanish from the cache before `remove` is awaited. If
    /// `remove` fails the previous collection is restored. Either way the key
    /// is refetched afterwards and exactly one notice is emitted.
    pub async fn remove_selected<O>(
        &self,
        request: RemoveSelected<'_, R>,
        remove: &O,
    ) -> MutationOutcome
    where
        O: RemoveRows<R> + ?Sized,
    {
        if request.disabled {
            return self.skip(Notice::Disabled);
        }

        let selected = selected_rows(request.view, request.selection);
        if selected.is_empty() {
            return self.skip(Notice::SelectRowsFirst);
        }

        if let Some(row) = selected.iter().find(|row| !request.eligibility.allows(row)) {
            info!(
                key = %request.key,
                row = row.id(),
                reason = request.eligibility.reason(),
                "removal rejected"
            );
            let notice = Notice::CannotDelete {
                subject: request.subject,
                reason: request.eligibility.reason().to_string(),
            };
            self.notifier.info(notice.clone());
            return MutationOutcome::Rejected(notice);
        }

        let targets: Vec<DeleteTarget> = selected.iter().map(Row::delete_target).collect();
        let ids: HashSet<String> = targets.iter().map(|target| target.id.clone()).collect();
        let count = targets.len();

        let mut mutation = OptimisticMutation::new(self.cache.clone(), request.key);
        if let Err(error) = mutation
            .apply(move |current| current.without_ids(&ids))
            .await
        {
            return self.fail(&error);
        }

        match remove.remove_rows(&targets).await {
            Ok(removed) => {
                debug!(key = %mutation.key(), requested = count, removed, "rows removed");
                self.notifier.success(Notice::Deleted {
                    subject: request.subject,
                    count,
                });
                if let Err(error) = mutation.commit().await {
                    warn!(%error, "commit after successful removal failed");
                }
                MutationOutcome::Committed { count }
            }
            Err(error) => {
                warn!(key = %mutation.key(), %error, count, "removal failed; restoring rows");
                self.notifier.error(Notice::MutationFailed);
                if let Err(error) = mutation.rollback().await {
                    warn!(%error, "rollback after failed removal failed");
                }
                MutationOutcome::RolledBack
            }
        }
    }

    /// Writes edited rows into the cache, then persists them through
    /// `update`. Rows not present in the cached collection are ignored by the
    /// optimistic write but still sent.
    pub async fn update_rows<O>(&self, request: UpdateSelected<R>, update: &O) -> MutationOutcome
    where
        O: UpdateRows<R> + ?Sized,
    {
        if request.disabled {
            return self.skip(Notice::Disabled);
        }
        if request.rows.is_empty() {
            return self.skip(Notice::SelectRowsFirst);
        }

        let count = request.rows.len();
        let replacements = request.rows.clone();
        let mut mutation = OptimisticMutation::new(self.cache.clone(), request.key);
        if let Err(error) = mutation
            .apply(move |current| current.with_replacements(&replacements))
            .await
        {
            return self.fail(&error);
        }

        match update.update_rows(&request.rows).await {
            Ok(saved) => {
                debug!(key = %mutation.key(), requested = count, saved, "rows saved");
                self.notifier.success(Notice::Saved {
                    subject: request.subject,
                    count,
                });
                if let Err(error) = mutation.commit().await {
                    warn!(%error, "commit after successful update failed");
                }
                MutationOutcome::Committed { count }
            }
            Err(error) => {
                warn!(key = %mutation.key(), %error, count, "update failed; restoring rows");
                self.notifier.error(Notice::MutationFailed);
                if let Err(error) = mutation.rollback().await {
                    warn!(%error, "rollback after failed update failed");
                }
                MutationOutcome::RolledBack
            }
        }
    }

    fn skip(&self, notice: Notice) -> MutationOutcome {
        self.notifier.info(notice.clone());
        MutationOutcome::Skipped(notice)
    }

    fn fail(&self, error: &MutationError) -> MutationOutcome {
        warn!(%error, "optimistic write could not start");
        self.notifier.error(Notice::MutationFailed);
        MutationOutcome::RolledBack
    }
}

#[cfg(test)]
#[path = "tests/mutation_tests.rs"]
mod tests;
