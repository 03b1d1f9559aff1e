//! Paging of mirror-table writes under a bind-parameter ceiling.
//!
//! PostgreSQL rejects statements with more than 65 535 bind parameters. A
//! mirror write embeds a fixed number of parameters per touched row, so the
//! added/removed IDs of a diff are split into pages of at most
//! [`BatchPlanner::capacity`] rows and written one statement per page.

use std::num::NonZeroUsize;

/// Bind parameters a single statement may use by default.
pub const DEFAULT_MAX_BIND_PARAMETERS: usize = 60_000;

/// Parameters per row of a repository-centric mirror write.
pub const REPO_ROW_PARAMETERS: usize = 4;

/// Parameters per row of a user-centric mirror write.
pub const USER_ROW_PARAMETERS: usize = 5;

/// Parameters a mirror write binds once per statement, after its rows: the
/// added keys and the writer's ID.
pub const MIRROR_STATEMENT_PARAMETERS: usize = 2;

/// One page of a mirror write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page<'a, T> {
    /// IDs whose mirror row gains the writer.
    pub added: &'a [T],
    /// IDs whose mirror row loses the writer.
    pub removed: &'a [T],
}

impl<T> Page<'_, T> {
    /// Rows the page writes.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    /// Whether the page writes nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Splits added/removed queues into pages of bounded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlanner {
    capacity: NonZeroUsize,
}

impl BatchPlanner {
    /// Planner writing at most `capacity` rows per page.
    pub const fn new(capacity: NonZeroUsize) -> Self {
        Self { capacity }
    }

    /// Planner sized so `params_per_row` parameters per row stay within
    /// `max_bind_parameters`. Never plans fewer than one row per page.
    pub fn for_parameter_budget(max_bind_parameters: usize, params_per_row: usize) -> Self {
        let rows = max_bind_parameters
            .checked_div(params_per_row)
            .unwrap_or(max_bind_parameters);
        Self::new(NonZeroUsize::new(rows).unwrap_or(NonZeroUsize::MIN))
    }

    /// Planner for mirror writes: reserves [`MIRROR_STATEMENT_PARAMETERS`]
    /// out of `max_bind_parameters` before sizing rows.
    pub fn for_mirror_budget(max_bind_parameters: usize, params_per_row: usize) -> Self {
        Self::for_parameter_budget(
            max_bind_parameters.saturating_sub(MIRROR_STATEMENT_PARAMETERS),
            params_per_row,
        )
    }

    /// Rows per page.
    pub const fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Take the next page from the queues.
    ///
    /// Added IDs fill the page first and removed IDs use what capacity is
    /// left. Returns the page, the remaining queues and whether either
    /// remaining queue is non-empty.
    pub fn next_page<'a, T>(
        &self,
        add_queue: &'a [T],
        remove_queue: &'a [T],
    ) -> (Page<'a, T>, &'a [T], &'a [T], bool) {
        let quota = self.capacity();
        let (added, rest_add) = add_queue.split_at(add_queue.len().min(quota));
        let remaining = quota - added.len();
        let (removed, rest_remove) = remove_queue.split_at(remove_queue.len().min(remaining));
        let has_more = !rest_add.is_empty() || !rest_remove.is_empty();
        (Page { added, removed }, rest_add, rest_remove, has_more)
    }

    /// Iterate every page of `added` and `removed`.
    ///
    /// Yields nothing when both inputs are empty.
    pub fn pages<'a, T>(&self, added: &'a [T], removed: &'a [T]) -> Pages<'a, T> {
        Pages {
            planner: *self,
            add_queue: added,
            remove_queue: removed,
        }
    }
}

impl Default for BatchPlanner {
    fn default() -> Self {
        Self::for_mirror_budget(DEFAULT_MAX_BIND_PARAMETERS, REPO_ROW_PARAMETERS)
    }
}

/// Iterator returned by [`BatchPlanner::pages`].
#[derive(Debug, Clone)]
pub struct Pages<'a, T> {
    planner: BatchPlanner,
    add_queue: &'a [T],
    remove_queue: &'a [T],
}

impl<'a, T> Iterator for Pages<'a, T> {
    type Item = Page<'a, T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.add_queue.is_empty() && self.remove_queue.is_empty() {
            return None;
        }
        let (page, rest_add, rest_remove, _) =
            self.planner.next_page(self.add_queue, self.remove_queue);
        self.add_queue = rest_add;
        self.remove_queue = rest_remove;
        Some(page)
    }
}
