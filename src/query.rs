//! Search and facet query composition for the public registry.
//!
//! [`QueryComposer`] holds two independent pieces of input state: the free
//! text (raw, plus a debounced copy) and the active categorical filters, one
//! value per filter key. From them it derives two server queries:
//!
//! - [`RowQuery`]: debounced text, every active filter, and the default
//!   ordering only when there is no text (with text the server orders by
//!   relevance).
//! - [`FacetQuery`]: debounced text only, so facet counts show the full
//!   distribution for the text search rather than one narrowed by the
//!   user's own filter choices.
//!
//! Every change to either query is published once on a `watch` channel.
//! [`SearchSession`] subscribes to it and keeps rows and facet counts in step.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SearchConfig;
use crate::debounce::Debouncer;
use crate::models::{FacetGroup, FilterValue};
use crate::record::SubstanceRecord;
use crate::traits::SearchApi;

// ============ Queries ============

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowQuery {
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub filters: BTreeMap<String, FilterValue>,
}

impl RowQuery {
    pub fn compose(
        text: &str,
        filters: &BTreeMap<String, FilterValue>,
        default_ordering: &str,
    ) -> Self {
        let search = normalize_text(text);
        let ordering = match search {
            Some(_) => None,
            None => Some(default_ordering.to_string()),
        };
        Self {
            search,
            ordering,
            filters: filters.clone(),
        }
    }

    /// Query-string pairs in a stable order.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(self.filters.len() + 1);
        if let Some(search) = &self.search {
            params.push(("search".to_string(), search.clone()));
        }
        if let Some(ordering) = &self.ordering {
            params.push(("ordering".to_string(), ordering.clone()));
        }
        for (key, value) in &self.filters {
            params.push((key.clone(), value.canonical()));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FacetQuery {
    pub search: Option<String>,
}

impl FacetQuery {
    pub fn compose(text: &str) -> Self {
        Self {
            search: normalize_text(text),
        }
    }

    pub fn to_params(&self) -> Vec<(String, String)> {
        self.search
            .iter()
            .map(|s| ("search".to_string(), s.clone()))
            .collect()
    }
}

/// Text that is empty after trimming means "no search".
fn normalize_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Both derived queries, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComposedQuery {
    pub rows: RowQuery,
    pub facets: FacetQuery,
}

// ============ Composer ============

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub debounce: Duration,
    pub default_ordering: String,
}

impl From<&SearchConfig> for SearchSettings {
    fn from(config: &SearchConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            default_ordering: config.default_ordering.clone(),
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

#[derive(Debug, Default)]
struct ComposerState {
    raw_text: String,
    debounced_text: String,
    filters: BTreeMap<String, FilterValue>,
    /// Bumped on every text edit; a debounce commit for an older value is dropped.
    text_generation: u64,
}

struct Shared {
    settings: SearchSettings,
    state: Mutex<ComposerState>,
    tx: watch::Sender<ComposedQuery>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ComposerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn compose(&self, state: &ComposerState) -> ComposedQuery {
        ComposedQuery {
            rows: RowQuery::compose(
                &state.debounced_text,
                &state.filters,
                &self.settings.default_ordering,
            ),
            facets: FacetQuery::compose(&state.debounced_text),
        }
    }

    /// Publish the current queries if they differ from the last published.
    fn publish(&self, state: &ComposerState) {
        let next = self.compose(state);
        self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn commit_text(&self, generation: u64) {
        let mut state = self.lock();
        if state.text_generation != generation {
            tracing::debug!(generation, "discarding superseded search text");
            return;
        }
        state.debounced_text = state.raw_text.clone();
        self.publish(&state);
    }
}

/// Owner of the registry page's search input and filter state.
pub struct QueryComposer {
    shared: Arc<Shared>,
    debouncer: Mutex<Debouncer>,
}

impl QueryComposer {
    pub fn new(settings: SearchSettings) -> Self {
        let state = ComposerState::default();
        let initial = ComposedQuery {
            rows: RowQuery::compose("", &state.filters, &settings.default_ordering),
            facets: FacetQuery::default(),
        };
        let (tx, _rx) = watch::channel(initial);
        Self {
            shared: Arc::new(Shared {
                settings,
                state: Mutex::new(state),
                tx,
            }),
            debouncer: Mutex::new(Debouncer::new()),
        }
    }

    fn debouncer(&self) -> MutexGuard<'_, Debouncer> {
        self.debouncer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a keystroke. The query updates once input has been quiet for
    /// the debounce period.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn set_text(&self, raw: impl Into<String>) {
        let generation = {
            let mut state = self.shared.lock();
            state.raw_text = raw.into();
            state.text_generation += 1;
            state.text_generation
        };
        let shared = self.shared.clone();
        self.debouncer()
            .schedule(self.shared.settings.debounce, async move {
                shared.commit_text(generation);
            });
    }

    /// Apply the pending text now instead of waiting for the quiet period.
    pub fn flush_text(&self) {
        self.debouncer().cancel();
        let generation = self.shared.lock().text_generation;
        self.shared.commit_text(generation);
    }

    /// Clear the search box. Takes effect immediately.
    pub fn clear_text(&self) {
        {
            let mut state = self.shared.lock();
            state.raw_text.clear();
            state.debounced_text.clear();
            state.text_generation += 1;
            self.shared.publish(&state);
        }
        self.debouncer().cancel();
    }

    pub fn raw_text(&self) -> String {
        self.shared.lock().raw_text.clone()
    }

    pub fn debounced_text(&self) -> String {
        self.shared.lock().debounced_text.clone()
    }

    /// Select `value` for `key`, replacing any other value for that key.
    /// Selecting the value that is already active clears the key.
    pub fn toggle_filter(&self, key: &str, value: impl Into<FilterValue>) {
        let value = value.into();
        let mut state = self.shared.lock();
        if state.filters.get(key) == Some(&value) {
            state.filters.remove(key);
        } else {
            state.filters.insert(key.to_string(), value);
        }
        self.shared.publish(&state);
    }

    /// Set or clear one filter key.
    pub fn set_filter(&self, key: &str, value: Option<FilterValue>) {
        let mut state = self.shared.lock();
        match value {
            Some(v) => {
                state.filters.insert(key.to_string(), v);
            }
            None => {
                state.filters.remove(key);
            }
        }
        self.shared.publish(&state);
    }

    /// Drop every active filter in one step.
    pub fn clear_filters(&self) {
        let mut state = self.shared.lock();
        if state.filters.is_empty() {
            return;
        }
        state.filters.clear();
        self.shared.publish(&state);
    }

    pub fn is_active(&self, key: &str, value: &FilterValue) -> bool {
        self.shared.lock().filters.get(key) == Some(value)
    }

    pub fn active_filters(&self) -> BTreeMap<String, FilterValue> {
        self.shared.lock().filters.clone()
    }

    pub fn row_query(&self) -> RowQuery {
        let state = self.shared.lock();
        self.shared.compose(&state).rows
    }

    pub fn facet_query(&self) -> FacetQuery {
        let state = self.shared.lock();
        self.shared.compose(&state).facets
    }

    /// Receive every change of the composed queries.
    pub fn subscribe(&self) -> watch::Receiver<ComposedQuery> {
        self.shared.tx.subscribe()
    }

    /// Cancel the pending debounce. Call from the owning view's teardown.
    pub fn dispose(&self) {
        self.debouncer().cancel();
    }
}

impl Drop for QueryComposer {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ============ Search session ============

/// Latest rows and facet counts for the composed query.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub query: RowQuery,
    pub rows: Vec<SubstanceRecord>,
    pub total: u64,
    pub facets: Vec<FacetGroup>,
    pub loading: bool,
    pub error: Option<String>,
    pub facets_error: Option<String>,
}

/// Background driver that refetches whenever the composed query changes.
pub struct SearchSession {
    results: watch::Receiver<SearchResults>,
    handle: JoinHandle<()>,
}

impl SearchSession {
    /// Fetch for the current query now and again after every change.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(api: Arc<dyn SearchApi>, composer: &QueryComposer) -> Self {
        let mut queries = composer.subscribe();
        let (tx, results) = watch::channel(SearchResults::default());

        let handle = tokio::spawn(async move {
            let mut facets_for: Option<FacetQuery> = None;
            loop {
                let composed = queries.borrow_and_update().clone();
                tx.send_modify(|r| r.loading = true);

                let rows = api.rows(&composed.rows).await;
                // Only a successful read settles the facets for this text.
                let facets = if facets_for.as_ref() != Some(&composed.facets) {
                    let fetched = api.facets(&composed.facets).await;
                    if fetched.is_ok() {
                        facets_for = Some(composed.facets.clone());
                    }
                    Some(fetched)
                } else {
                    None
                };

                tx.send_modify(|r| {
                    r.loading = false;
                    r.query = composed.rows.clone();
                    match rows {
                        Ok(page) => {
                            r.total = page.count;
                            r.rows = page.results;
                            r.error = None;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "row fetch failed");
                            r.rows.clear();
                            r.total = 0;
                            r.error = Some(e.user_message());
                        }
                    }
                    match facets {
                        Some(Ok(groups)) => {
                            r.facets = groups;
                            r.facets_error = None;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "facet fetch failed");
                            r.facets.clear();
                            r.facets_error = Some(e.user_message());
                        }
                        None => {}
                    }
                });

                if queries.changed().await.is_err() {
                    break;
                }
            }
        });

        Self { results, handle }
    }

    pub fn results(&self) -> SearchResults {
        self.results.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchResults> {
        self.results.clone()
    }

    /// Stop refetching. Call from the owning view's teardown.
    pub fn dispose(&self) {
        self.handle.abort();
    }
}

impl Drop for SearchSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
